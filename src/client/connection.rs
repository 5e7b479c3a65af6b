//! 逻辑连接
//!
//! 一个连接键对应一个 `Connection`：持有解析器、TLS 配置以及每个端点
//! 对应的 tonic `Channel`。负载均衡在通道之外完成，每次调用尝试都
//! 通过解析器重新选址。

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tracing::{debug, info};

use crate::config::ServiceConfig;
use crate::discovery::Resolver;
use crate::error::{ClientError, Result};

pub struct Connection {
    key: String,
    service_name: String,
    resolver: Arc<dyn Resolver>,
    tls: Option<ClientTlsConfig>,
    connect_timeout: Duration,
    channels: DashMap<String, Channel>,
}

impl Connection {
    /// 建立连接
    ///
    /// `eager_connect` 时立即拨通一个端点，否则端点通道在首次使用时才真正连接
    pub async fn connect(
        key: impl Into<String>,
        config: &ServiceConfig,
        resolver: Arc<dyn Resolver>,
        tls: Option<ClientTlsConfig>,
    ) -> Result<Self> {
        let connection = Self {
            key: key.into(),
            service_name: config.service_name.clone(),
            resolver,
            tls,
            connect_timeout: config.connect_timeout(),
            channels: DashMap::new(),
        };

        if config.eager_connect {
            let address = connection.resolver.pick_one()?;
            let channel = connection
                .endpoint(&address)?
                .connect()
                .await
                .map_err(|e| ClientError::Dial {
                    target: address.clone(),
                    reason: e.to_string(),
                })?;
            connection.channels.insert(address, channel);
        }

        info!(
            key = %connection.key,
            target = %connection.target(),
            secure = connection.is_secure(),
            "grpc connection ready"
        );

        Ok(connection)
    }

    fn endpoint(&self, address: &str) -> Result<Endpoint> {
        let uri = format!("{}://{}", self.endpoint_scheme(), address);

        let mut endpoint = Endpoint::from_shared(uri).map_err(|e| ClientError::Dial {
            target: address.to_string(),
            reason: format!("invalid address: {}", e),
        })?;
        endpoint = endpoint.connect_timeout(self.connect_timeout);

        if let Some(tls) = &self.tls {
            endpoint = endpoint.tls_config(tls.clone()).map_err(|e| ClientError::Dial {
                target: address.to_string(),
                reason: format!("tls config: {}", e),
            })?;
        }

        Ok(endpoint)
    }

    /// 端点对应的通道，首次使用时创建
    pub fn channel_for(&self, address: &str) -> Result<Channel> {
        if let Some(channel) = self.channels.get(address) {
            return Ok(channel.value().clone());
        }

        match self.channels.entry(address.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let channel = self.endpoint(address)?.connect_lazy();
                debug!(service = %self.service_name, address, "endpoint channel created");
                entry.insert(channel.clone());
                Ok(channel)
            }
        }
    }

    /// 按负载均衡策略选出一个端点及其通道
    pub fn pick(&self) -> Result<(String, Channel)> {
        let snapshot = self.resolver.addresses();
        if self.channels.len() > snapshot.len() {
            self.channels.retain(|address, _| snapshot.contains(address));
        }

        let address = self.resolver.pick_one()?;
        let channel = self.channel_for(&address)?;
        Ok((address, channel))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// `<scheme>:///<service>`
    pub fn target(&self) -> String {
        self.resolver.target()
    }

    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.resolver
    }

    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    /// 端点地址使用的 scheme
    pub fn endpoint_scheme(&self) -> &'static str {
        if self.is_secure() { "https" } else { "http" }
    }

    /// 已创建的端点通道数量
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key)
            .field("target", &self.target())
            .field("secure", &self.is_secure())
            .field("channels", &self.channels.len())
            .finish()
    }
}

/// 读取 CA 证书构建 TLS 配置，证书文件不存在时返回 None
pub async fn load_tls_config(cert_file: &Path, domain: &str) -> Result<Option<ClientTlsConfig>> {
    if !tokio::fs::try_exists(cert_file).await.unwrap_or(false) {
        return Ok(None);
    }

    let pem = tokio::fs::read(cert_file).await.map_err(|e| ClientError::Dial {
        target: domain.to_string(),
        reason: format!("read cert {}: {}", cert_file.display(), e),
    })?;

    Ok(Some(
        ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(pem))
            .domain_name(domain),
    ))
}
