//! 重试策略模块
//!
//! 错误分类与尝试次数上限

pub mod fixed;

pub use fixed::FixedRetryPolicy;

use std::time::Duration;

use crate::config::{ResolverKind, ServiceConfig};
use crate::error::ClientError;

/// 重试策略 trait
pub trait RetryPolicy {
    fn should_retry(&self, attempt: usize, error: &ClientError) -> bool;
    fn backoff_duration(&self, attempt: usize) -> Duration;
    fn max_attempts(&self) -> usize;
}

/// 单次失败后的处置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// 立即返回给调用方
    Terminal,
    /// 记录日志后进入下一次尝试
    Retry,
}

/// 错误分类：取消/超时、业务错误、配置错误和发现初始化失败为终止错误，其余为瞬时错误
pub fn classify(error: &ClientError) -> Disposition {
    if error.is_cancelled_or_expired() || error.is_application() {
        return Disposition::Terminal;
    }
    match error {
        ClientError::Configuration(_) | ClientError::DiscoverySetup { .. } => Disposition::Terminal,
        _ => Disposition::Retry,
    }
}

/// 单次逻辑调用的尝试次数上限
///
/// 静态地址时不超过地址数 + 1，动态发现时地址数事先未知，直接使用配置值
pub fn attempt_bound(max_attempts: usize, config: &ServiceConfig) -> usize {
    let max_attempts = max_attempts.max(1);
    match config.resolver {
        ResolverKind::Static => max_attempts.min(config.addresses.len() + 1),
        ResolverKind::Dynamic => max_attempts,
    }
}
