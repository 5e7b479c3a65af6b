//! 解析器注册表
//!
//! 相同解析键（服务名 + 协调服务地址 + 负载均衡策略 + 排序后的标签）的调用方
//! 共享同一个解析器和后台 watch 任务。持有方通过 `release` 归还，
//! 最后一个持有方归还时才真正关闭解析器。

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

use crate::cache::KeyedCache;
use crate::config::{BalancePolicy, DiscoveryOptions, ServiceConfig};
use crate::discovery::{ConsulCatalog, ConsulResolver, HealthCatalog, Resolver};
use crate::error::{ClientError, Result};

/// 解析键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolverKey {
    pub service_name: String,
    pub discovery_address: String,
    pub policy: BalancePolicy,
    pub tags: Vec<String>,
}

impl ResolverKey {
    pub fn from_config(config: &ServiceConfig) -> Self {
        let mut tags = config.tags.clone();
        tags.sort();
        tags.dedup();
        Self {
            service_name: config.service_name.clone(),
            discovery_address: config.discovery.address.clone(),
            policy: config.balancer,
            tags,
        }
    }
}

impl fmt::Display for ResolverKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.service_name,
            self.discovery_address,
            self.policy,
            self.tags.join(",")
        )
    }
}

/// 协调服务客户端工厂
pub type CatalogFactory =
    Arc<dyn Fn(&DiscoveryOptions) -> anyhow::Result<Arc<dyn HealthCatalog>> + Send + Sync>;

struct SharedResolver {
    resolver: Arc<ConsulResolver>,
    holders: AtomicUsize,
}

/// 解析器注册表
pub struct ResolverRegistry {
    resolvers: KeyedCache<ResolverKey, Arc<SharedResolver>>,
    catalog_factory: CatalogFactory,
}

impl ResolverRegistry {
    /// 使用 Consul HTTP API 的注册表
    pub fn new() -> Self {
        Self::with_catalog_factory(Arc::new(
            |options: &DiscoveryOptions| -> anyhow::Result<Arc<dyn HealthCatalog>> {
                Ok(Arc::new(ConsulCatalog::new(options)?))
            },
        ))
    }

    /// 自定义协调服务客户端
    pub fn with_catalog_factory(catalog_factory: CatalogFactory) -> Self {
        Self {
            resolvers: KeyedCache::new(),
            catalog_factory,
        }
    }

    /// 获取（必要时创建）解析器并登记一个持有方
    pub async fn acquire(&self, config: &ServiceConfig) -> Result<Arc<ConsulResolver>> {
        if config.service_name.trim().is_empty() {
            return Err(ClientError::configuration("please specify grpc service_name"));
        }
        let key = ResolverKey::from_config(config);

        loop {
            let shared = self
                .resolvers
                .get_or_try_init(key.clone(), || self.create(&key, config))
                .await?;

            // 与 release 的移除判断互斥，避免拿到正在被关闭的解析器
            let held = self
                .resolvers
                .with_value(&key, |current| {
                    if Arc::ptr_eq(current, &shared) {
                        current.holders.fetch_add(1, Ordering::AcqRel);
                        true
                    } else {
                        false
                    }
                })
                .unwrap_or(false);

            if held {
                return Ok(shared.resolver.clone());
            }
        }
    }

    async fn create(&self, key: &ResolverKey, config: &ServiceConfig) -> Result<Arc<SharedResolver>> {
        let catalog = (self.catalog_factory)(&config.discovery).map_err(|err| {
            ClientError::DiscoverySetup {
                service: config.service_name.clone(),
                reason: format!("create consul client error: {:#}", err),
            }
        })?;

        let resolver = ConsulResolver::start(
            config.service_name.clone(),
            &config.discovery,
            key.tags.clone(),
            config.balancer,
            catalog,
        )
        .await?;

        info!(key = %key, "new consul resolver");

        Ok(Arc::new(SharedResolver {
            resolver,
            holders: AtomicUsize::new(0),
        }))
    }

    /// 归还一个持有方；返回 true 表示这是最后一个持有方，解析器已关闭
    pub async fn release(&self, key: &ResolverKey) -> bool {
        let removed = self.resolvers.remove_if(key, |shared| {
            match shared.holders.load(Ordering::Acquire) {
                0 => false,
                1 => {
                    shared.holders.store(0, Ordering::Release);
                    true
                }
                _ => {
                    shared.holders.fetch_sub(1, Ordering::AcqRel);
                    false
                }
            }
        });

        match removed {
            Some(shared) => {
                shared.resolver.close().await;
                true
            }
            None => false,
        }
    }

    /// 当前持有方数量
    pub fn holders(&self, key: &ResolverKey) -> usize {
        self.resolvers
            .with_value(key, |shared| shared.holders.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn get(&self, key: &ResolverKey) -> Option<Arc<ConsulResolver>> {
        self.resolvers.get(key).map(|shared| shared.resolver.clone())
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    /// 获取解析器并以 `ResolverLease` 的形式持有
    pub async fn lease(self: &Arc<Self>, config: &ServiceConfig) -> Result<ResolverLease> {
        let resolver = self.acquire(config).await?;
        Ok(ResolverLease {
            registry: Arc::clone(self),
            key: ResolverKey::from_config(config),
            resolver,
            armed: true,
        })
    }

    /// 移除并关闭全部解析器（进程退出时使用）
    ///
    /// 之后的 acquire 会重新创建解析器
    pub async fn shutdown(&self) {
        for shared in self.resolvers.drain() {
            shared.resolver.close().await;
        }
    }
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 一次 acquire 得到的持有
///
/// 调用 `keep` 后持有转交给调用方；未 `keep` 也未 `release` 就被丢弃
/// （例如建连的 future 被取消）时在后台归还
pub struct ResolverLease {
    registry: Arc<ResolverRegistry>,
    key: ResolverKey,
    resolver: Arc<ConsulResolver>,
    armed: bool,
}

impl ResolverLease {
    pub fn resolver(&self) -> &Arc<ConsulResolver> {
        &self.resolver
    }

    pub fn key(&self) -> &ResolverKey {
        &self.key
    }

    /// 保留这次持有，由调用方负责之后的 release
    pub fn keep(mut self) -> Arc<ConsulResolver> {
        self.armed = false;
        Arc::clone(&self.resolver)
    }

    /// 立即归还
    pub async fn release(mut self) -> bool {
        self.armed = false;
        self.registry.release(&self.key).await
    }
}

impl Drop for ResolverLease {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let registry = Arc::clone(&self.registry);
                let key = self.key.clone();
                handle.spawn(async move {
                    registry.release(&key).await;
                });
            }
            Err(_) => warn!(key = %self.key, "resolver lease dropped outside runtime, not released"),
        }
    }
}
