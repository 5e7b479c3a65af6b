//! 服务发现与负载均衡模块
//!
//! 解析器有两种实现：固定地址列表（static）和基于协调服务健康查询的
//! 动态发现（consul）。动态解析器通过长轮询在后台持续刷新地址集合，
//! 相同解析键的调用方共享同一个后台任务。

pub mod address;
pub mod balancer;
pub mod catalog;
pub mod consul;
pub mod registry;
pub mod resolver;

pub use address::AddressSet;
pub use balancer::Balancer;
pub use catalog::{ConsulCatalog, HealthCatalog, HealthEntry, HealthQuery, HealthResponse};
pub use consul::ConsulResolver;
pub use registry::{ResolverKey, ResolverLease, ResolverRegistry};
pub use resolver::{Resolver, StaticResolver};
