//! 调用上下文
//!
//! 由上层（HTTP 请求处理）提供：可取消的上下文、追踪 ID 和日志 span

use tokio_util::sync::CancellationToken;
use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};
use tracing::Span;

use crate::error::{ClientError, Result};

/// 请求上下文
#[derive(Debug, Clone)]
pub struct RequestContext {
    cancel: CancellationToken,
    trace_id: String,
    span: Span,
    metadata: MetadataMap,
}

impl RequestContext {
    /// 创建新的请求上下文，生成随机追踪 ID
    pub fn new() -> Self {
        Self::with_trace_id(uuid::Uuid::new_v4().simple().to_string())
    }

    /// 使用上游传入的追踪 ID
    pub fn with_trace_id(trace_id: impl Into<String>) -> Self {
        let trace_id = trace_id.into();
        let span = tracing::info_span!("request", trace_id = %trace_id);
        Self {
            cancel: CancellationToken::new(),
            trace_id,
            span,
            metadata: MetadataMap::new(),
        }
    }

    /// 绑定外部的取消信号（例如进程退出信号）
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// 派生子上下文：父上下文取消时子上下文一起取消，追踪 ID 不变
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            trace_id: self.trace_id.clone(),
            span: self.span.clone(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// 出站元数据，每次调用尝试都会复制一份并写入追踪 ID
    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    pub fn insert_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        let key: AsciiMetadataKey = key
            .parse()
            .map_err(|_| ClientError::configuration(format!("invalid metadata key: {}", key)))?;
        let value: AsciiMetadataValue = value
            .parse()
            .map_err(|_| ClientError::configuration(format!("invalid metadata value for {}", key.as_str())))?;
        self.metadata.insert(key, value);
        Ok(())
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
