//! Flare RPC Client Library
//!
//! Client-side connectivity for calling gRPC backends: one shared channel per
//! connection key, static or consul-backed address resolution, and a retry
//! orchestrator with a shared deadline and trace id.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;

// gRPC 客户端
pub mod client;
pub mod discovery;
pub mod interceptor;
pub mod retry;
pub mod utils;

// Re-exports
pub use config::{BalancePolicy, ClientConfig, DiscoveryOptions, ResolverKind, RetryConfig, ServiceConfig};
pub use context::RequestContext;
pub use error::{
    ApplicationError, ClientError, ErrorBuilder, ErrorCategory, ErrorCode, Result,
};

pub use client::{CallContext, Connection, ConnectionRegistry, RpcClient};
pub use discovery::{
    AddressSet, ConsulResolver, HealthCatalog, ResolverKey, ResolverRegistry, Resolver,
    StaticResolver,
};
pub use interceptor::{ClientChannel, Credential, CredentialProvider};
pub use retry::{FixedRetryPolicy, RetryPolicy};
