//! 解析器抽象

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::BalancePolicy;
use crate::discovery::{AddressSet, Balancer};
use crate::error::{ClientError, Result};

/// 解析器
///
/// 维护某个服务的地址集合，并按负载均衡策略选出一个地址
#[async_trait]
pub trait Resolver: Send + Sync {
    /// 目标地址中使用的 scheme
    fn scheme(&self) -> &'static str;

    fn service_name(&self) -> &str;

    fn balancer(&self) -> &Balancer;

    /// 执行一次解析
    async fn resolve_once(&self) -> Result<()>;

    /// 当前地址快照
    fn addresses(&self) -> Arc<AddressSet>;

    /// 按负载均衡策略选出一个地址
    fn pick_one(&self) -> Result<String> {
        let snapshot = self.addresses();
        self.balancer()
            .pick(snapshot.addresses())
            .map(str::to_string)
            .ok_or_else(|| ClientError::NoAddress(self.service_name().to_string()))
    }

    /// 最近一次解析到的成员是否带有该标签
    fn has_tag(&self, tag: &str) -> bool {
        self.addresses().has_tag(tag)
    }

    /// 停止后台活动并等待其退出
    async fn close(&self);

    /// `<scheme>:///<service>`
    fn target(&self) -> String {
        format!("{}:///{}", self.scheme(), self.service_name())
    }
}

/// 固定地址列表解析器，没有任何后台活动
pub struct StaticResolver {
    service_name: String,
    snapshot: Arc<AddressSet>,
    balancer: Balancer,
}

impl StaticResolver {
    pub fn new(service_name: impl Into<String>, addresses: Vec<String>, policy: BalancePolicy) -> Self {
        Self {
            service_name: service_name.into(),
            snapshot: Arc::new(AddressSet::from_addresses(addresses)),
            balancer: Balancer::new(policy),
        }
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    fn scheme(&self) -> &'static str {
        "static"
    }

    fn service_name(&self) -> &str {
        &self.service_name
    }

    fn balancer(&self) -> &Balancer {
        &self.balancer
    }

    async fn resolve_once(&self) -> Result<()> {
        Ok(())
    }

    fn addresses(&self) -> Arc<AddressSet> {
        self.snapshot.clone()
    }

    async fn close(&self) {}
}
