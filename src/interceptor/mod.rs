//! gRPC 客户端拦截器模块
//!
//! 为每次调用注入追踪 ID、认证凭证和剩余超时

pub mod auth;
pub mod client;

pub use auth::{BearerCredentialProvider, Credential, CredentialProvider};
pub use client::{ClientChannel, ClientInterceptor};

/// 追踪 ID 元数据键
pub const TRACE_ID_KEY: &str = "x-trace-id";
