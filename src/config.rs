//! 客户端配置
//!
//! 描述每个后端服务的连接方式、服务发现参数以及重试策略，
//! 通常从 TOML 文件加载：
//!
//! ```toml
//! [retry]
//! max_attempts = 3
//!
//! [services.order]
//! addresses = ["10.0.0.1:9000", "10.0.0.2:9000"]
//!
//! [services.user]
//! resolver = "dynamic"
//! balancer = "random"
//! tags = ["grpc"]
//! discovery = { address = "http://127.0.0.1:8500" }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ClientError, Result};

/// 客户端总配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClientConfig {
    /// 应用根目录，相对证书路径基于此目录解析
    #[serde(default)]
    pub app_root: Option<PathBuf>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
}

impl ClientConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::configuration(format!("read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ClientError::configuration(e.to_string()))
    }

    /// 按名称查找服务配置，表内未写服务名时使用表名
    pub fn service(&self, name: &str) -> Option<ServiceConfig> {
        self.services.get(name).map(|svc| {
            let mut svc = svc.clone();
            if svc.service_name.is_empty() {
                svc.service_name = name.to_string();
            }
            svc
        })
    }
}

/// 单个后端服务配置
///
/// 首次使用后不应再修改；连接键由它派生
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub service_name: String,

    /// 静态地址列表（host:port）
    #[serde(default)]
    pub addresses: Vec<String>,

    #[serde(default)]
    pub resolver: ResolverKind,

    #[serde(default)]
    pub balancer: BalancePolicy,

    #[serde(default)]
    pub is_auth: bool,

    /// CA 证书路径，相对路径基于 app_root
    #[serde(default)]
    pub cert_file: Option<PathBuf>,

    /// TLS 校验的服务端名称，默认为服务名
    #[serde(default)]
    pub tls_domain: Option<String>,

    /// 服务发现标签过滤
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub discovery: DiscoveryOptions,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// 为 true 时建连即拨号，否则首次请求时才真正连接
    #[serde(default)]
    pub eager_connect: bool,
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

impl ServiceConfig {
    /// 静态地址配置
    pub fn with_static(service_name: impl Into<String>, addresses: Vec<String>) -> Self {
        Self {
            service_name: service_name.into(),
            addresses,
            resolver: ResolverKind::Static,
            balancer: BalancePolicy::default(),
            is_auth: false,
            cert_file: None,
            tls_domain: None,
            tags: Vec::new(),
            discovery: DiscoveryOptions::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            eager_connect: false,
        }
    }

    /// 服务发现配置
    pub fn with_discovery(service_name: impl Into<String>, discovery: DiscoveryOptions) -> Self {
        Self {
            resolver: ResolverKind::Dynamic,
            discovery,
            ..Self::with_static(service_name, Vec::new())
        }
    }

    pub fn balancer(mut self, policy: BalancePolicy) -> Self {
        self.balancer = policy;
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn auth(mut self, is_auth: bool) -> Self {
        self.is_auth = is_auth;
        self
    }

    pub fn cert_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cert_file = Some(path.into());
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// 建连前的配置校验，不涉及任何网络操作
    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(ClientError::configuration("please specify grpc service_name"));
        }
        if self.resolver == ResolverKind::Static && self.addresses.is_empty() {
            return Err(ClientError::configuration(format!(
                "please specify grpc addresses for {}",
                self.service_name
            )));
        }
        Ok(())
    }
}

/// 解析方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverKind {
    /// 固定地址列表
    #[default]
    Static,
    /// 通过协调服务（consul）动态发现
    Dynamic,
}


/// 负载均衡策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BalancePolicy {
    /// 轮询
    #[default]
    RoundRobin,
    /// 随机
    Random,
}

impl std::str::FromStr for BalancePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "round_robin" | "roundrobin" | "" => Ok(BalancePolicy::RoundRobin),
            "random" | "rand" => Ok(BalancePolicy::Random),
            _ => Err(format!("Unknown balance policy: {}", s)),
        }
    }
}

impl std::fmt::Display for BalancePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalancePolicy::RoundRobin => write!(f, "round_robin"),
            BalancePolicy::Random => write!(f, "random"),
        }
    }
}

/// 服务发现查询参数
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryOptions {
    /// 协调服务 HTTP 地址
    #[serde(default = "default_discovery_address")]
    pub address: String,

    /// 长轮询等待时间（秒）
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,

    /// 只返回通过健康检查的实例
    #[serde(default = "default_true")]
    pub passing_only: bool,

    #[serde(default)]
    pub datacenter: Option<String>,

    /// ACL token
    #[serde(default)]
    pub token: Option<String>,

    /// 查询失败后到下一次查询的间隔（毫秒）
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

fn default_discovery_address() -> String {
    "http://127.0.0.1:8500".to_string()
}

fn default_wait_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_retry_interval_ms() -> u64 {
    1000
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            address: default_discovery_address(),
            wait_secs: default_wait_secs(),
            passing_only: true,
            datacenter: None,
            token: None,
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl DiscoveryOptions {
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// 重试配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// 单次逻辑调用的最大尝试次数
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// 瞬时失败后的固定等待（毫秒）
    #[serde(default)]
    pub delay_ms: u64,
}

fn default_max_attempts() -> usize {
    3
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: 0,
        }
    }
}
