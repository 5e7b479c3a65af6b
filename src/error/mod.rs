//! Flare RPC Client 错误处理模块
//!
//! 提供统一的错误类型、业务错误代码以及与 gRPC 状态之间的转换

pub mod application;
pub mod builder;
pub mod client_error;
pub mod code;
pub mod grpc;

// 重新导出公共类型和函数
pub use application::ApplicationError;
pub use builder::ErrorBuilder;
pub use client_error::{ClientError, Result};
pub use code::{ErrorCategory, ErrorCode};
pub use grpc::{ERROR_CODE_KEY, ERROR_DETAILS_KEY};
