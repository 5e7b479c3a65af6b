//! 业务错误结构
//!
//! 被调方返回的结构化错误，重试耗尽后的失败也统一包装成这个类型

use super::code::{ErrorCategory, ErrorCode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 业务错误
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationError {
    /// 错误代码
    pub code: ErrorCode,
    /// 错误原因
    pub reason: String,
    /// 错误详情（可选，用于调试）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// 错误时间戳
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ApplicationError {
    /// 创建新的业务错误
    pub fn new(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            details: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// 添加错误详情
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.reason)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApplicationError {}
