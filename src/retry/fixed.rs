use super::{Disposition, RetryPolicy, attempt_bound, classify};
use crate::config::{RetryConfig, ServiceConfig};
use crate::error::ClientError;
use std::time::Duration;

/// 固定延迟重试策略
#[derive(Debug, Clone)]
pub struct FixedRetryPolicy {
    max_attempts: usize,
    delay: Duration,
}

impl FixedRetryPolicy {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// 针对某个服务的策略，尝试次数受静态地址数限制
    pub fn for_service(retry: &RetryConfig, config: &ServiceConfig) -> Self {
        Self::new(
            attempt_bound(retry.max_attempts, config),
            Duration::from_millis(retry.delay_ms),
        )
    }
}

impl RetryPolicy for FixedRetryPolicy {
    fn should_retry(&self, attempt: usize, error: &ClientError) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        classify(error) == Disposition::Retry
    }

    fn backoff_duration(&self, _attempt: usize) -> Duration {
        self.delay
    }

    fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}
