//! 集成测试共用的脚本化健康查询实现
//!
//! 每次查询按顺序弹出一条预设响应；脚本耗尽后查询一直阻塞，
//! 模拟没有变化时的长轮询，直到解析器被关闭。

#![allow(dead_code)]

use async_trait::async_trait;
use flare_rpc_client::discovery::{HealthCatalog, HealthEntry, HealthQuery, HealthResponse};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type Scripted = anyhow::Result<HealthResponse>;

#[derive(Default)]
pub struct ScriptedCatalog {
    script: Mutex<VecDeque<Scripted>>,
    queries: Mutex<Vec<HealthQuery>>,
    calls: AtomicUsize,
}

impl ScriptedCatalog {
    pub fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        })
    }

    pub fn push(&self, response: Scripted) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<HealthQuery> {
        self.queries.lock().unwrap().clone()
    }

    /// 等待查询次数达到 n，超时则测试失败
    pub async fn wait_for_calls(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("catalog was not queried in time");
    }
}

#[async_trait]
impl HealthCatalog for ScriptedCatalog {
    async fn health_service(&self, query: &HealthQuery) -> anyhow::Result<HealthResponse> {
        self.queries.lock().unwrap().push(query.clone());
        let next = self.script.lock().unwrap().pop_front();
        self.calls.fetch_add(1, Ordering::SeqCst);
        match next {
            Some(response) => response,
            None => std::future::pending().await,
        }
    }
}

pub fn healthy(addresses: &[&str], index: u64) -> Scripted {
    let entries = addresses
        .iter()
        .map(|address| {
            let (host, port) = address.rsplit_once(':').unwrap();
            HealthEntry::new(host, port.parse().unwrap()).with_tags(vec!["grpc".to_string()])
        })
        .collect();
    Ok(HealthResponse { entries, index })
}

pub fn unreachable() -> Scripted {
    Err(anyhow::anyhow!("connection refused"))
}
