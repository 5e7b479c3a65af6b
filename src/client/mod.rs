//! gRPC 客户端模块
//!
//! `RpcClient::call` 把一次逻辑调用包装成：获取连接、在总超时内有限次重试、
//! 每次尝试注入同一个追踪 ID，并区分瞬时错误与终止错误。
//!
//! ```rust,no_run
//! # use flare_rpc_client::{RpcClient, RequestContext, ServiceConfig, ClientError};
//! # use std::time::Duration;
//! # async fn demo(client: RpcClient) -> Result<(), ClientError> {
//! let ctx = RequestContext::new();
//! let config = ServiceConfig::with_static("order", vec!["10.0.0.1:9000".into()]);
//! let reply = client
//!     .call(Some(&ctx), &config, Duration::from_secs(2), |call, channel| async move {
//!         // let mut client = OrderServiceClient::new(channel);
//!         // client.get_order(call.request(req)).await.map(|r| r.into_inner())
//!         let _ = (call, channel);
//!         Ok::<_, tonic::Status>("reply")
//!     })
//!     .await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod registry;

pub use connection::Connection;
pub use registry::ConnectionRegistry;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;
use tracing::{Instrument, debug, warn};

use crate::config::{ClientConfig, RetryConfig, ServiceConfig};
use crate::context::RequestContext;
use crate::discovery::ResolverRegistry;
use crate::error::{ClientError, Result};
use crate::interceptor::{
    BearerCredentialProvider, ClientChannel, ClientInterceptor, Credential, CredentialProvider,
};
use crate::retry::{Disposition, FixedRetryPolicy, RetryPolicy, classify};
use crate::utils::set_trace_id;

/// 单次调用尝试的上下文
#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Instant,
    trace_id: String,
    attempt: usize,
    address: String,
    metadata: MetadataMap,
    credential: Option<Credential>,
}

impl CallContext {
    /// 整个重试序列共享的取消信号
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// 距离总超时的剩余时间
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// 从 1 开始
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// 本次尝试选中的端点
    pub fn address(&self) -> &str {
        &self.address
    }

    /// 本次尝试的出站元数据（已写入追踪 ID）
    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    /// 本次尝试附带的凭证，服务未开启认证时为 None
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// 构造请求并带上剩余超时
    pub fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        request.set_timeout(self.remaining());
        request
    }
}

/// RPC 客户端
#[derive(Clone)]
pub struct RpcClient {
    registry: Arc<ConnectionRegistry>,
    retry: RetryConfig,
    credentials: Arc<dyn CredentialProvider>,
}

impl RpcClient {
    pub fn new(config: &ClientConfig) -> Self {
        let registry = ConnectionRegistry::with_resolvers(
            Arc::new(ResolverRegistry::new()),
            config.app_root.clone(),
        );
        Self::with_registry(Arc::new(registry), config.retry.clone())
    }

    pub fn with_registry(registry: Arc<ConnectionRegistry>, retry: RetryConfig) -> Self {
        Self {
            registry,
            retry,
            credentials: Arc::new(BearerCredentialProvider),
        }
    }

    pub fn with_credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = provider;
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// 调用服务（默认拦截器：追踪 ID + 剩余超时）
    ///
    /// 开启认证的服务在没有 token 的情况下由凭证提供方决定附带的凭证
    pub async fn call<T, E, F, Fut>(
        &self,
        ctx: Option<&RequestContext>,
        config: &ServiceConfig,
        timeout: Duration,
        call: F,
    ) -> Result<T>
    where
        F: FnMut(CallContext, ClientChannel) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<ClientError>,
    {
        self.execute(ctx, config, None, timeout, call).await
    }

    /// 调用需要认证的服务，凭证由 `auth_token` 派生；服务未开启认证时 token 被忽略
    pub async fn call_with_auth<T, E, F, Fut>(
        &self,
        ctx: Option<&RequestContext>,
        config: &ServiceConfig,
        auth_token: &str,
        timeout: Duration,
        call: F,
    ) -> Result<T>
    where
        F: FnMut(CallContext, ClientChannel) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<ClientError>,
    {
        self.execute(ctx, config, Some(auth_token), timeout, call)
            .await
    }

    async fn execute<T, E, F, Fut>(
        &self,
        ctx: Option<&RequestContext>,
        config: &ServiceConfig,
        auth_token: Option<&str>,
        timeout: Duration,
        call: F,
    ) -> Result<T>
    where
        F: FnMut(CallContext, ClientChannel) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<ClientError>,
    {
        let ctx = ctx.ok_or_else(|| ClientError::configuration("request context is required"))?;
        let span = ctx.span().clone();
        self.run(ctx, config, auth_token, timeout, call)
            .instrument(span)
            .await
    }

    async fn run<T, E, F, Fut>(
        &self,
        ctx: &RequestContext,
        config: &ServiceConfig,
        auth_token: Option<&str>,
        timeout: Duration,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut(CallContext, ClientChannel) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<ClientError>,
    {
        // 整个重试序列共用一个截止时间，不按尝试重置
        let deadline = Instant::now() + timeout;
        let cancel = ctx.cancellation().child_token();
        let _cancel_on_return = cancel.clone().drop_guard();

        let service = config.service_name.as_str();
        let policy = FixedRetryPolicy::for_service(&self.retry, config);

        let connection = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            _ = sleep_until(deadline) => return Err(ClientError::DeadlineExceeded),
            connection = self.registry.get_connection(config) => connection?,
        };

        let credential = self.credential(config, auth_token, connection.is_secure())?;

        let mut last_error = None;
        for attempt in 1..=policy.max_attempts() {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            if Instant::now() >= deadline {
                return Err(ClientError::DeadlineExceeded);
            }

            let result = match connection.pick() {
                Ok((address, channel)) => {
                    let mut metadata = ctx.metadata().clone();
                    set_trace_id(&mut metadata, ctx.trace_id())?;

                    let interceptor = ClientInterceptor::new(metadata.clone())
                        .with_credential(credential.clone())
                        .with_deadline(deadline);
                    let call_ctx = CallContext {
                        cancel: cancel.clone(),
                        deadline,
                        trace_id: ctx.trace_id().to_string(),
                        attempt,
                        address: address.clone(),
                        metadata,
                        credential: credential.clone(),
                    };

                    debug!(service, address = %address, attempt, "call grpc start");
                    let started = Instant::now();

                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(ClientError::Cancelled),
                        _ = sleep_until(deadline) => Err(ClientError::DeadlineExceeded),
                        result = call(call_ctx, interceptor.wrap(channel)) => result.map_err(Into::into),
                    };

                    debug!(
                        service,
                        address = %address,
                        attempt,
                        cost_ms = started.elapsed().as_millis() as u64,
                        "call grpc end"
                    );
                    result
                }
                Err(err) => Err(err),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if classify(&err) == Disposition::Terminal {
                return Err(err);
            }
            warn!(service, attempt, error = %err, "call grpc failed, retrying");

            let retry = policy.should_retry(attempt, &err);
            last_error = Some(err);
            if !retry {
                break;
            }

            let delay = policy.backoff_duration(attempt);
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                    _ = sleep_until(deadline) => return Err(ClientError::DeadlineExceeded),
                    _ = sleep(delay) => {}
                }
            }
        }

        let last = last_error.unwrap_or_else(|| ClientError::NoAddress(service.to_string()));
        Err(ClientError::Application(last.into_application(format!(
            "call {} failed after {} attempts",
            service,
            policy.max_attempts()
        ))))
    }

    /// 只有开启认证的服务才附带凭证，未开启时忽略传入的 token
    fn credential(
        &self,
        config: &ServiceConfig,
        auth_token: Option<&str>,
        secure: bool,
    ) -> Result<Option<Credential>> {
        if !config.is_auth {
            if auth_token.is_some() {
                debug!(service = %config.service_name, "auth disabled, token ignored");
            }
            return Ok(None);
        }

        let credential = self.credentials.credential(auth_token, secure)?;
        if credential.require_transport_security() && !secure {
            return Err(ClientError::configuration(format!(
                "credential for {} requires transport security",
                config.service_name
            )));
        }
        Ok(Some(credential))
    }
}
