//! 动态解析器与解析器注册表集成测试
//!
//! 协调服务由脚本化的健康查询替代，不需要运行中的 consul

mod common;

use common::{ScriptedCatalog, healthy, unreachable};
use flare_rpc_client::config::{BalancePolicy, DiscoveryOptions, ServiceConfig};
use flare_rpc_client::discovery::{
    ConsulResolver, HealthCatalog, Resolver, ResolverKey, ResolverRegistry,
};
use flare_rpc_client::error::ClientError;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn options() -> DiscoveryOptions {
    DiscoveryOptions {
        retry_interval_ms: 10,
        ..DiscoveryOptions::with_address("http://127.0.0.1:8500")
    }
}

async fn start(catalog: Arc<ScriptedCatalog>) -> Result<Arc<ConsulResolver>, ClientError> {
    ConsulResolver::start("user", &options(), Vec::new(), BalancePolicy::RoundRobin, catalog).await
}

#[tokio::test]
async fn test_first_resolve_populates_addresses() {
    let catalog = ScriptedCatalog::new(vec![healthy(&["10.0.0.1:9000", "10.0.0.2:9000"], 7)]);
    let resolver = start(catalog.clone()).await.unwrap();

    assert_eq!(
        resolver.addresses().addresses(),
        &["10.0.0.1:9000".to_string(), "10.0.0.2:9000".to_string()]
    );
    assert_eq!(resolver.wait_index(), 7);
    assert!(resolver.has_tag("grpc"));
    assert_eq!(resolver.target(), "consul:///user");

    // 第一次查询不阻塞，后续查询带上次的索引
    catalog.wait_for_calls(2).await;
    let queries = catalog.queries();
    assert_eq!(queries[0].wait_index, 0);
    assert_eq!(queries[1].wait_index, 7);
    assert!(queries[0].passing_only);

    resolver.close().await;
}

#[tokio::test]
async fn test_first_resolve_failure_is_setup_error() {
    let catalog = ScriptedCatalog::new(vec![unreachable()]);
    let err = start(catalog.clone()).await.err().unwrap();

    assert!(matches!(err, ClientError::DiscoverySetup { ref service, .. } if service == "user"));

    // 不留下后台任务
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(catalog.calls(), 1);
}

#[tokio::test]
async fn test_failed_query_retains_previous_addresses() {
    let catalog = ScriptedCatalog::new(vec![healthy(&["10.0.0.1:9000"], 3), unreachable()]);
    let resolver = start(catalog.clone()).await.unwrap();

    // 第三次查询开始时，失败的那次已经处理完
    catalog.wait_for_calls(3).await;

    assert_eq!(resolver.addresses().addresses(), &["10.0.0.1:9000".to_string()]);
    assert_eq!(resolver.wait_index(), 3);
    assert_eq!(resolver.pick_one().unwrap(), "10.0.0.1:9000");

    resolver.close().await;
}

#[tokio::test]
async fn test_watch_replaces_snapshot_and_advances_index() {
    let catalog = ScriptedCatalog::new(vec![
        healthy(&["10.0.0.1:9000"], 3),
        unreachable(),
        healthy(&["10.0.0.1:9000", "10.0.0.2:9000"], 9),
    ]);
    let resolver = start(catalog.clone()).await.unwrap();

    catalog.wait_for_calls(4).await;

    assert_eq!(resolver.addresses().len(), 2);
    assert_eq!(resolver.wait_index(), 9);
    assert_eq!(catalog.queries()[3].wait_index, 9);

    resolver.close().await;
}

#[tokio::test]
async fn test_empty_response_keeps_last_addresses() {
    let catalog = ScriptedCatalog::new(vec![healthy(&["10.0.0.1:9000"], 3), healthy(&[], 4)]);
    let resolver = start(catalog.clone()).await.unwrap();

    catalog.wait_for_calls(3).await;

    assert_eq!(resolver.addresses().addresses(), &["10.0.0.1:9000".to_string()]);
    assert_eq!(resolver.wait_index(), 4);

    resolver.close().await;
}

#[tokio::test]
async fn test_empty_first_resolve_has_no_address() {
    let catalog = ScriptedCatalog::new(vec![healthy(&[], 2)]);
    let resolver = start(catalog).await.unwrap();

    assert!(resolver.addresses().is_empty());
    assert!(matches!(resolver.pick_one(), Err(ClientError::NoAddress(_))));

    resolver.close().await;
}

#[tokio::test]
async fn test_close_stops_watch_task() {
    let catalog = ScriptedCatalog::new(vec![healthy(&["10.0.0.1:9000"], 3)]);
    let resolver = start(catalog.clone()).await.unwrap();
    catalog.wait_for_calls(2).await;

    // 阻塞中的长轮询被取消，close 返回时 watch 任务已退出
    tokio::time::timeout(Duration::from_secs(1), resolver.close())
        .await
        .expect("close should not hang on a blocked query");

    assert!(resolver.is_closed());
    assert_eq!(Arc::strong_count(&resolver), 1);

    // 关闭后保留最后的快照，不再发起查询
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(catalog.calls(), 2);
    assert_eq!(resolver.addresses().len(), 1);

    // 重复关闭无副作用
    resolver.close().await;
}

#[tokio::test]
async fn test_resolve_once_after_close_is_clean() {
    let catalog = ScriptedCatalog::new(vec![healthy(&["10.0.0.1:9000"], 3)]);
    let resolver = start(catalog.clone()).await.unwrap();
    resolver.close().await;

    assert!(resolver.resolve_once().await.is_ok());
    assert_eq!(resolver.wait_index(), 3);
}

fn counting_registry(
    catalog: Arc<ScriptedCatalog>,
    created: Arc<AtomicUsize>,
) -> ResolverRegistry {
    ResolverRegistry::with_catalog_factory(Arc::new(
        move |_options: &DiscoveryOptions| -> anyhow::Result<Arc<dyn HealthCatalog>> {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(catalog.clone())
        },
    ))
}

#[tokio::test]
async fn test_registry_shares_resolver_per_key() {
    let catalog = ScriptedCatalog::new(vec![healthy(&["10.0.0.1:9000"], 1)]);
    let created = Arc::new(AtomicUsize::new(0));
    let registry = counting_registry(catalog.clone(), created.clone());

    let config = ServiceConfig::with_discovery("user", options())
        .tags(vec!["v2".into(), "grpc".into(), "v2".into()]);

    let acquired = futures::future::join_all((0..8).map(|_| registry.acquire(&config))).await;
    let resolvers: Vec<_> = acquired.into_iter().map(Result::unwrap).collect();

    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert!(resolvers.iter().all(|r| Arc::ptr_eq(r, &resolvers[0])));

    let key = ResolverKey::from_config(&config);
    assert_eq!(key.tags, vec!["grpc".to_string(), "v2".to_string()]);
    assert_eq!(registry.holders(&key), 8);
    assert_eq!(registry.len(), 1);

    // 标签顺序不同也是同一个解析键
    let reordered = ServiceConfig::with_discovery("user", options())
        .tags(vec!["grpc".into(), "v2".into()]);
    let again = registry.acquire(&reordered).await.unwrap();
    assert!(Arc::ptr_eq(&again, &resolvers[0]));
    assert_eq!(registry.holders(&key), 9);

    for _ in 0..8 {
        assert!(!registry.release(&key).await);
    }
    assert!(!resolvers[0].is_closed());

    assert!(registry.release(&key).await);
    assert!(resolvers[0].is_closed());
    assert!(registry.is_empty());
    assert!(!registry.release(&key).await);
}

#[tokio::test]
async fn test_registry_separates_policies() {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();
    let registry = ResolverRegistry::with_catalog_factory(Arc::new(
        move |_options: &DiscoveryOptions| -> anyhow::Result<Arc<dyn HealthCatalog>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptedCatalog::new(vec![healthy(&["10.0.0.1:9000"], 1)]))
        },
    ));

    let round_robin = ServiceConfig::with_discovery("user", options());
    let random = ServiceConfig::with_discovery("user", options()).balancer(BalancePolicy::Random);

    let a = registry.acquire(&round_robin).await.unwrap();
    let b = registry.acquire(&random).await.unwrap();

    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(created.load(Ordering::SeqCst), 2);
    assert_eq!(registry.len(), 2);

    registry.shutdown().await;
    assert!(a.is_closed() && b.is_closed());
}

#[tokio::test]
async fn test_registry_does_not_cache_setup_failure() {
    let catalog = ScriptedCatalog::new(vec![unreachable(), healthy(&["10.0.0.1:9000"], 2)]);
    let created = Arc::new(AtomicUsize::new(0));
    let registry = counting_registry(catalog, created.clone());
    let config = ServiceConfig::with_discovery("user", options());

    let err = registry.acquire(&config).await.err().unwrap();
    assert!(matches!(err, ClientError::DiscoverySetup { .. }));
    assert!(registry.is_empty());

    let resolver = registry.acquire(&config).await.unwrap();
    assert_eq!(resolver.addresses().len(), 1);
    assert_eq!(created.load(Ordering::SeqCst), 2);

    registry.shutdown().await;
}

#[tokio::test]
async fn test_registry_rejects_missing_service_name() {
    let registry = ResolverRegistry::new();
    let config = ServiceConfig::with_discovery("", options());

    let err = registry.acquire(&config).await.err().unwrap();
    assert!(matches!(err, ClientError::Configuration(_)));
}

#[tokio::test]
async fn test_dropped_lease_returns_holder() {
    let catalog = ScriptedCatalog::new(vec![healthy(&["10.0.0.1:9000"], 1)]);
    let registry = Arc::new(counting_registry(catalog, Arc::new(AtomicUsize::new(0))));
    let config = ServiceConfig::with_discovery("user", options());
    let key = ResolverKey::from_config(&config);

    let kept = registry.lease(&config).await.unwrap().keep();
    let dropped = registry.lease(&config).await.unwrap();
    assert_eq!(registry.holders(&key), 2);

    // 建连中途被取消时 lease 随 future 一起被丢弃
    drop(dropped);
    tokio::time::timeout(Duration::from_secs(5), async {
        while registry.holders(&key) != 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("dropped lease should be released");
    assert!(!kept.is_closed());

    let last = registry.lease(&config).await.unwrap();
    assert!(!last.release().await);
    assert!(registry.release(&key).await);
    assert!(kept.is_closed());
}

#[tokio::test]
async fn test_shutdown_forgets_closed_resolvers() {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();
    let registry = ResolverRegistry::with_catalog_factory(Arc::new(
        move |_options: &DiscoveryOptions| -> anyhow::Result<Arc<dyn HealthCatalog>> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ScriptedCatalog::new(vec![healthy(&["10.0.0.1:9000"], 1)]))
        },
    ));
    let config = ServiceConfig::with_discovery("user", options());

    let before = registry.acquire(&config).await.unwrap();
    registry.shutdown().await;

    assert!(before.is_closed());
    assert!(registry.is_empty());

    let after = registry.acquire(&config).await.unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(!after.is_closed());
    assert_eq!(created.load(Ordering::SeqCst), 2);

    registry.shutdown().await;
}
