//! 基于协调服务的动态解析器
//!
//! 创建时同步解析一次，成功后启动后台 watch 任务，用上次响应的索引长轮询，
//! 地址变化时整体替换快照。查询失败只记录日志并保留旧快照，
//! 成功过一次之后空结果同样保留旧快照。

use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BalancePolicy, DiscoveryOptions};
use crate::discovery::{AddressSet, Balancer, HealthCatalog, HealthQuery, Resolver};
use crate::error::{ClientError, Result};

/// Consul 动态解析器
pub struct ConsulResolver {
    service_name: String,
    tags: Vec<String>,
    passing_only: bool,
    wait: Duration,
    retry_interval: Duration,

    catalog: Arc<dyn HealthCatalog>,
    snapshot: ArcSwap<AddressSet>,
    wait_index: AtomicU64,
    balancer: Balancer,

    cancel: CancellationToken,
    watch_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ConsulResolver {
    /// 创建解析器：同步解析一次，成功后启动后台 watch
    ///
    /// 首次解析失败返回 `DiscoverySetup`，不会留下后台任务
    pub async fn start(
        service_name: impl Into<String>,
        options: &DiscoveryOptions,
        tags: Vec<String>,
        policy: BalancePolicy,
        catalog: Arc<dyn HealthCatalog>,
    ) -> Result<Arc<Self>> {
        let resolver = Arc::new(Self {
            service_name: service_name.into(),
            tags,
            passing_only: options.passing_only,
            wait: options.wait(),
            retry_interval: options.retry_interval(),
            catalog,
            snapshot: ArcSwap::from_pointee(AddressSet::default()),
            wait_index: AtomicU64::new(0),
            balancer: Balancer::new(policy),
            cancel: CancellationToken::new(),
            watch_handle: Mutex::new(None),
        });

        if let Err(err) = resolver.resolve_once().await {
            resolver.cancel.cancel();
            return Err(ClientError::DiscoverySetup {
                service: resolver.service_name.clone(),
                reason: err.to_string(),
            });
        }

        resolver.spawn_watch();

        info!(
            service = %resolver.service_name,
            addresses = resolver.snapshot.load().len(),
            "consul resolver started"
        );

        Ok(resolver)
    }

    fn spawn_watch(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.watch().await });
        *self
            .watch_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    async fn watch(&self) {
        while !self.cancel.is_cancelled() {
            if let Err(err) = self.resolve_once().await {
                warn!(
                    service = %self.service_name,
                    error = %err,
                    "query service entries error"
                );
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.retry_interval) => {}
                }
            }
        }
        debug!(service = %self.service_name, "consul watch stopped");
    }

    /// 当前长轮询索引
    pub fn wait_index(&self) -> u64 {
        self.wait_index.load(Ordering::Acquire)
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn query(&self) -> HealthQuery {
        HealthQuery {
            service: self.service_name.clone(),
            tags: self.tags.clone(),
            passing_only: self.passing_only,
            wait_index: self.wait_index(),
            wait: self.wait,
        }
    }
}

#[async_trait]
impl Resolver for ConsulResolver {
    fn scheme(&self) -> &'static str {
        "consul"
    }

    fn service_name(&self) -> &str {
        &self.service_name
    }

    fn balancer(&self) -> &Balancer {
        &self.balancer
    }

    /// 一次阻塞查询；解析器被关闭时视为正常结束
    async fn resolve_once(&self) -> Result<()> {
        let query = self.query();

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(()),
            response = self.catalog.health_service(&query) => response,
        };

        let response = response.map_err(|err| {
            ClientError::transport(format!(
                "health query for {} failed: {:#}",
                self.service_name, err
            ))
        })?;

        let mut member_tags = Vec::new();
        let addresses: Vec<String> = response
            .entries
            .iter()
            .map(|entry| {
                member_tags = entry.tags.clone();
                entry.endpoint()
            })
            .collect();

        // 一旦解析成功过，空结果不会清空已有地址
        if addresses.is_empty() && !self.snapshot.load().is_empty() {
            warn!(
                service = %self.service_name,
                index = response.index,
                "no healthy instances, keep last addresses"
            );
            self.wait_index.store(response.index, Ordering::Release);
            return Ok(());
        }

        let previous = self.snapshot.swap(Arc::new(AddressSet::new(addresses, member_tags)));
        self.wait_index.store(response.index, Ordering::Release);

        let current = self.snapshot.load();
        if previous.addresses() != current.addresses() {
            debug!(
                service = %self.service_name,
                index = response.index,
                addresses = ?current.addresses(),
                "address set updated"
            );
        }

        Ok(())
    }

    fn addresses(&self) -> Arc<AddressSet> {
        self.snapshot.load_full()
    }

    /// 取消 watch 并等待其退出
    async fn close(&self) {
        self.cancel.cancel();
        let handle = self
            .watch_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(service = %self.service_name, error = %err, "consul watch task failed");
            }
        }
        info!(service = %self.service_name, "consul resolver closed");
    }
}
