//! 协调服务健康查询
//!
//! `HealthCatalog` 是解析器与协调服务之间的边界，`ConsulCatalog`
//! 基于 Consul HTTP API 实现，测试中可替换为脚本化的实现

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use std::time::Duration;

use crate::config::DiscoveryOptions;

/// 一次健康查询
#[derive(Debug, Clone)]
pub struct HealthQuery {
    pub service: String,
    pub tags: Vec<String>,
    pub passing_only: bool,
    /// 上次响应的索引，0 表示不阻塞
    pub wait_index: u64,
    /// 服务端阻塞的最长时间
    pub wait: Duration,
}

/// 健康查询返回的单个成员
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthEntry {
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
}

impl HealthEntry {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// host:port
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// 健康查询响应
#[derive(Debug, Clone)]
pub struct HealthResponse {
    pub entries: Vec<HealthEntry>,
    pub index: u64,
}

/// 协调服务健康查询
#[async_trait]
pub trait HealthCatalog: Send + Sync {
    async fn health_service(&self, query: &HealthQuery) -> anyhow::Result<HealthResponse>;
}

/// Consul HTTP API 实现
pub struct ConsulCatalog {
    http_client: HttpClient,
    consul_url: String,
    datacenter: Option<String>,
    token: Option<String>,
}

impl ConsulCatalog {
    pub fn new(options: &DiscoveryOptions) -> anyhow::Result<Self> {
        let consul_url = normalize_url(&options.address)?;

        // 长轮询期间服务端会阻塞 wait 时长，Consul 还会额外加最多 wait/16 的抖动
        let request_timeout = options.wait() + options.wait() / 16 + Duration::from_secs(5);
        let http_client = HttpClient::builder()
            .timeout(request_timeout)
            .build()
            .context("build consul http client")?;

        Ok(Self {
            http_client,
            consul_url,
            datacenter: options.datacenter.clone(),
            token: options.token.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.consul_url
    }
}

fn normalize_url(address: &str) -> anyhow::Result<String> {
    let address = address.trim().trim_end_matches('/');
    if address.is_empty() {
        return Err(anyhow!("consul address is empty"));
    }
    let url = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };
    reqwest::Url::parse(&url).with_context(|| format!("invalid consul address: {}", address))?;
    Ok(url)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawHealthEntry {
    #[serde(default)]
    node: Option<RawNode>,
    service: RawService,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawNode {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawService {
    #[serde(default)]
    address: String,
    port: u16,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

impl From<RawHealthEntry> for HealthEntry {
    fn from(raw: RawHealthEntry) -> Self {
        // 服务未单独注册地址时使用节点地址
        let address = if raw.service.address.is_empty() {
            raw.node.map(|n| n.address).unwrap_or_default()
        } else {
            raw.service.address
        };
        HealthEntry {
            address,
            port: raw.service.port,
            tags: raw.service.tags.unwrap_or_default(),
        }
    }
}

/// 解析 `/v1/health/service/<name>` 的响应体
pub(crate) fn parse_health_entries(body: &[u8]) -> anyhow::Result<Vec<HealthEntry>> {
    let raw: Vec<RawHealthEntry> =
        serde_json::from_slice(body).context("decode consul health response")?;
    Ok(raw.into_iter().map(HealthEntry::from).collect())
}

#[async_trait]
impl HealthCatalog for ConsulCatalog {
    async fn health_service(&self, query: &HealthQuery) -> anyhow::Result<HealthResponse> {
        let url = format!("{}/v1/health/service/{}", self.consul_url, query.service);

        let mut params: Vec<(&str, String)> = Vec::new();
        if query.passing_only {
            params.push(("passing", "true".to_string()));
        }
        for tag in &query.tags {
            params.push(("tag", tag.clone()));
        }
        if query.wait_index > 0 {
            params.push(("index", query.wait_index.to_string()));
            params.push(("wait", format!("{}s", query.wait.as_secs().max(1))));
        }
        if let Some(dc) = &self.datacenter {
            params.push(("dc", dc.clone()));
        }

        let mut request = self.http_client.get(&url).query(&params);
        if let Some(token) = &self.token {
            request = request.header("X-Consul-Token", token);
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("query {}", url))?
            .error_for_status()?;

        let index = resp
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| anyhow!("missing X-Consul-Index header"))?;

        let body = resp.bytes().await.context("read consul response")?;
        let entries = parse_health_entries(&body)?;

        Ok(HealthResponse { entries, index })
    }
}
