//! 连接注册表
//!
//! 保证每个连接键只有一个物理连接：
//! - 静态解析：键为 `<排序后地址列表的哈希>_<服务名>`，同名但地址不同的配置不会冲突
//! - 动态解析：键为服务名
//!
//! 连接一旦建立就在进程生命周期内保留；建连失败不缓存，下一个调用方会重新建连。

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::connection::{Connection, load_tls_config};
use crate::cache::KeyedCache;
use crate::config::{ResolverKind, ServiceConfig};
use crate::discovery::{Resolver, ResolverRegistry, StaticResolver};
use crate::error::Result;
use crate::utils::{hash_addresses, resolve_path};

pub struct ConnectionRegistry {
    connections: KeyedCache<String, Arc<Connection>>,
    resolvers: Arc<ResolverRegistry>,
    app_root: PathBuf,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_resolvers(Arc::new(ResolverRegistry::new()), None)
    }

    pub fn with_resolvers(resolvers: Arc<ResolverRegistry>, app_root: Option<PathBuf>) -> Self {
        Self {
            connections: KeyedCache::new(),
            resolvers,
            app_root: app_root.unwrap_or_else(crate::utils::app_root),
        }
    }

    /// 由配置派生连接键，同时完成配置校验
    pub fn connection_key(config: &ServiceConfig) -> Result<String> {
        config.validate()?;
        Ok(match config.resolver {
            ResolverKind::Static => {
                format!("{}_{}", hash_addresses(&config.addresses), config.service_name)
            }
            ResolverKind::Dynamic => config.service_name.clone(),
        })
    }

    /// 获取连接，首次调用时建连
    pub async fn get_connection(&self, config: &ServiceConfig) -> Result<Arc<Connection>> {
        let key = Self::connection_key(config)?;
        self.connections
            .get_or_try_init(key.clone(), || self.dial(key, config))
            .await
    }

    async fn dial(&self, key: String, config: &ServiceConfig) -> Result<Arc<Connection>> {
        let (resolver, lease) = match config.resolver {
            ResolverKind::Static => {
                let mut addresses = config.addresses.clone();
                addresses.sort();
                let resolver: Arc<dyn Resolver> = Arc::new(StaticResolver::new(
                    config.service_name.clone(),
                    addresses,
                    config.balancer,
                ));
                (resolver, None)
            }
            ResolverKind::Dynamic => {
                let lease = self.resolvers.lease(config).await?;
                let resolver: Arc<dyn Resolver> = lease.resolver().clone();
                (resolver, Some(lease))
            }
        };

        // 建连被取消时 lease 在 drop 中归还解析器
        match self.connect(&key, config, resolver).await {
            Ok(connection) => {
                if let Some(lease) = lease {
                    lease.keep();
                }
                info!(key = %key, service = %config.service_name, "new grpc connection");
                Ok(Arc::new(connection))
            }
            Err(err) => {
                warn!(key = %key, error = %err, "grpc dial failed");
                if let Some(lease) = lease {
                    lease.release().await;
                }
                Err(err)
            }
        }
    }

    async fn connect(
        &self,
        key: &str,
        config: &ServiceConfig,
        resolver: Arc<dyn Resolver>,
    ) -> Result<Connection> {
        let tls = match &config.cert_file {
            Some(cert_file) => {
                let cert_file = resolve_path(&self.app_root, cert_file);
                let domain = config
                    .tls_domain
                    .clone()
                    .unwrap_or_else(|| config.service_name.clone());
                load_tls_config(&cert_file, &domain).await?
            }
            None => None,
        };

        Connection::connect(key, config, resolver, tls).await
    }

    pub fn get(&self, key: &str) -> Option<Arc<Connection>> {
        self.connections.get(&key.to_string())
    }

    pub fn resolvers(&self) -> &Arc<ResolverRegistry> {
        &self.resolvers
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn app_root(&self) -> &PathBuf {
        &self.app_root
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_key_depends_on_address_content() {
        let a = ServiceConfig::with_static("order", vec!["10.0.0.1:9000".into(), "10.0.0.2:9000".into()]);
        let b = ServiceConfig::with_static("order", vec!["10.0.0.2:9000".into(), "10.0.0.1:9000".into()]);
        let c = ServiceConfig::with_static("order", vec!["10.0.0.3:9000".into()]);

        let key_a = ConnectionRegistry::connection_key(&a).unwrap();
        assert_eq!(key_a, ConnectionRegistry::connection_key(&b).unwrap());
        assert_ne!(key_a, ConnectionRegistry::connection_key(&c).unwrap());
        assert!(key_a.ends_with("_order"));
    }

    #[test]
    fn dynamic_key_is_service_name() {
        let config = ServiceConfig::with_discovery("user", Default::default());
        assert_eq!(ConnectionRegistry::connection_key(&config).unwrap(), "user");
    }
}
