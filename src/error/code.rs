//! 错误代码和错误类别定义
//!
//! 客户端侧使用的业务错误代码，跨服务传输时写入 `error-code` 元数据

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// 错误代码按类别分组，每个类别占用1000个代码范围：
/// - 1000-1999: 连接相关错误
/// - 2000-2999: 认证相关错误
/// - 3000-3999: 服务发现相关错误
/// - 6000-6999: 系统相关错误
/// - 7000-7999: 网络相关错误
/// - 9000-9999: 通用错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 连接相关错误 (1000-1999)
    // ============================================================
    ConnectionFailed = 1000,
    ConnectionTimeout = 1001,
    ConnectionClosed = 1002,

    // ============================================================
    // 认证相关错误 (2000-2999)
    // ============================================================
    AuthenticationFailed = 2000,
    PermissionDenied = 2001,

    // ============================================================
    // 服务发现相关错误 (3000-3999)
    // ============================================================
    DiscoveryFailed = 3000,
    NoAvailableAddress = 3001,

    // ============================================================
    // 系统相关错误 (6000-6999)
    // ============================================================
    InternalError = 6000,
    ServiceUnavailable = 6001,
    ResourceExhausted = 6002,
    ConfigurationError = 6003,

    // ============================================================
    // 网络相关错误 (7000-7999)
    // ============================================================
    NetworkError = 7000,
    NetworkTimeout = 7001,

    // ============================================================
    // 通用错误 (9000-9999)
    // ============================================================
    GeneralError = 9000,
    InvalidParameter = 9001,
    NotFound = 9002,
    AlreadyExists = 9003,
    OperationFailed = 9004,
    OperationTimeout = 9005,
    OperationCancelled = 9006,
    RetryExhausted = 9007,
    UnknownError = 9999,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 从数字值创建错误代码
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            1000 => Some(ErrorCode::ConnectionFailed),
            1001 => Some(ErrorCode::ConnectionTimeout),
            1002 => Some(ErrorCode::ConnectionClosed),
            2000 => Some(ErrorCode::AuthenticationFailed),
            2001 => Some(ErrorCode::PermissionDenied),
            3000 => Some(ErrorCode::DiscoveryFailed),
            3001 => Some(ErrorCode::NoAvailableAddress),
            6000 => Some(ErrorCode::InternalError),
            6001 => Some(ErrorCode::ServiceUnavailable),
            6002 => Some(ErrorCode::ResourceExhausted),
            6003 => Some(ErrorCode::ConfigurationError),
            7000 => Some(ErrorCode::NetworkError),
            7001 => Some(ErrorCode::NetworkTimeout),
            9000 => Some(ErrorCode::GeneralError),
            9001 => Some(ErrorCode::InvalidParameter),
            9002 => Some(ErrorCode::NotFound),
            9003 => Some(ErrorCode::AlreadyExists),
            9004 => Some(ErrorCode::OperationFailed),
            9005 => Some(ErrorCode::OperationTimeout),
            9006 => Some(ErrorCode::OperationCancelled),
            9007 => Some(ErrorCode::RetryExhausted),
            9999 => Some(ErrorCode::UnknownError),
            _ => None,
        }
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ConnectionTimeout => "CONNECTION_TIMEOUT",
            ErrorCode::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorCode::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::DiscoveryFailed => "DISCOVERY_FAILED",
            ErrorCode::NoAvailableAddress => "NO_AVAILABLE_ADDRESS",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorCode::GeneralError => "GENERAL_ERROR",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::OperationFailed => "OPERATION_FAILED",
            ErrorCode::OperationTimeout => "OPERATION_TIMEOUT",
            ErrorCode::OperationCancelled => "OPERATION_CANCELLED",
            ErrorCode::RetryExhausted => "RETRY_EXHAUSTED",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// 获取错误代码的类别（用于错误分类）
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Connection,
            2000..=2999 => ErrorCategory::Authentication,
            3000..=3999 => ErrorCategory::Discovery,
            6000..=6999 => ErrorCategory::System,
            7000..=7999 => ErrorCategory::Network,
            _ => ErrorCategory::General,
        }
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Connection,
    Authentication,
    Discovery,
    System,
    Network,
    General,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Connection => write!(f, "CONNECTION"),
            ErrorCategory::Authentication => write!(f, "AUTHENTICATION"),
            ErrorCategory::Discovery => write!(f, "DISCOVERY"),
            ErrorCategory::System => write!(f, "SYSTEM"),
            ErrorCategory::Network => write!(f, "NETWORK"),
            ErrorCategory::General => write!(f, "GENERAL"),
        }
    }
}
