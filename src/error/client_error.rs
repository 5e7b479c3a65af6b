//! 客户端统一错误类型

use super::application::ApplicationError;
use super::code::ErrorCode;
use super::builder::ErrorBuilder;
use thiserror::Error;

/// 客户端错误
///
/// 变体本身就是错误分类：配置错误、已取消/超时、业务错误为终止错误，
/// 其余失败（网络抖动、传输层重置、暂无可用地址）视为瞬时错误
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// 缺少必要配置（服务名、静态地址、调用上下文等）
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 首次同步解析时协调服务不可用
    #[error("discovery setup failed for {service}: {reason}")]
    DiscoverySetup { service: String, reason: String },

    /// 当前地址集合为空
    #[error("no addresses available for {0}")]
    NoAddress(String),

    /// 通道构建失败
    #[error("dial {target} failed: {reason}")]
    Dial { target: String, reason: String },

    #[error("call cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// 被调方返回的结构化业务错误
    #[error("application error: {0}")]
    Application(#[from] ApplicationError),

    /// 未被识别为业务错误的 gRPC 状态
    #[error("rpc status {}: {}", .0.code(), .0.message())]
    Status(tonic::Status),

    /// 其他传输层失败
    #[error("transport error: {0}")]
    Transport(String),
}

impl ClientError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        ClientError::Configuration(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        ClientError::Transport(msg.into())
    }

    /// 是否为业务错误
    pub fn is_application(&self) -> bool {
        matches!(self, ClientError::Application(_))
    }

    /// 是否为取消或超时
    pub fn is_cancelled_or_expired(&self) -> bool {
        matches!(self, ClientError::Cancelled | ClientError::DeadlineExceeded)
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            ClientError::Configuration(_) => ErrorCode::ConfigurationError,
            ClientError::DiscoverySetup { .. } => ErrorCode::DiscoveryFailed,
            ClientError::NoAddress(_) => ErrorCode::NoAvailableAddress,
            ClientError::Dial { .. } => ErrorCode::ConnectionFailed,
            ClientError::Cancelled => ErrorCode::OperationCancelled,
            ClientError::DeadlineExceeded => ErrorCode::OperationTimeout,
            ClientError::Application(err) => err.code,
            ClientError::Status(_) | ClientError::Transport(_) => ErrorCode::NetworkError,
        }
    }

    /// 包装为业务错误，已是业务错误时原样返回
    pub fn into_application(self, reason: impl Into<String>) -> ApplicationError {
        match self {
            ClientError::Application(err) => err,
            other => ErrorBuilder::new(ErrorCode::RetryExhausted, reason)
                .details(other.to_string())
                .build(),
        }
    }
}

impl From<tonic::transport::Error> for ClientError {
    fn from(err: tonic::transport::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ClientError>;
