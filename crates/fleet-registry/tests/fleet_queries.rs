//! Integration tests for fleet-wide registry queries
//!
//! Uses the in-memory store with paused tokio time so registration TTLs can be
//! driven deterministically.

use fleet_registry::{
    CapacitySnapshot, RegistryConfig, ServerRecord, ServerRegistry, ServerStatus,
};
use fleet_store::testing::UnavailableStore;
use fleet_store::{MemoryStore, SharedStore};
use std::sync::Arc;
use std::time::Duration;

fn memory_registry(ttl_secs: u64) -> ServerRegistry {
    let store: SharedStore = Arc::new(MemoryStore::new());
    ServerRegistry::new(
        store,
        RegistryConfig {
            server_ttl_secs: ttl_secs,
        },
    )
}

fn server(id: &str, load: u32, max: u32) -> ServerRecord {
    ServerRecord::new(id, format!("{}.fleet.internal", id), 7835)
        .with_location("eu-west")
        .with_capacity(max, 1000)
        .with_load(load, load as f64 * 10.0)
}

#[tokio::test(start_paused = true)]
async fn test_unrefreshed_server_drops_out_of_fleet() {
    let registry = memory_registry(300);
    registry.register(&server("stale", 1, 10)).await.unwrap();
    registry.register(&server("fresh", 1, 10)).await.unwrap();

    // Only "fresh" refreshes during the TTL window
    tokio::time::advance(Duration::from_secs(200)).await;
    registry.register(&server("fresh", 2, 10)).await.unwrap();

    tokio::time::advance(Duration::from_secs(101)).await;

    let ids: Vec<String> = registry
        .get_all()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec!["fresh".to_string()]);
    assert!(registry.get("stale").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_every_server_expires_without_refresh() {
    let registry = memory_registry(300);
    for i in 0..5 {
        registry
            .register(&server(&format!("s{}", i), 0, 10))
            .await
            .unwrap();
    }
    assert_eq!(registry.get_all().await.unwrap().len(), 5);

    tokio::time::advance(Duration::from_secs(300)).await;

    assert!(registry.get_all().await.unwrap().is_empty());
    assert!(registry.best_server().await.is_none());
    assert!(registry.fleet_stats().await.is_empty());
}

#[tokio::test]
async fn test_best_server_picks_least_utilized() {
    let registry = memory_registry(300);
    registry.register(&server("seven", 7, 10)).await.unwrap();
    registry.register(&server("three", 3, 10)).await.unwrap();

    let best = registry.best_server().await.unwrap();
    assert_eq!(best.id, "three");
}

#[tokio::test]
async fn test_best_server_never_returns_full_server() {
    let registry = memory_registry(300);
    registry.register(&server("full", 10, 10)).await.unwrap();
    assert!(registry.best_server().await.is_none());

    registry.register(&server("almost", 9, 10)).await.unwrap();
    let best = registry.best_server().await.unwrap();
    assert!(best.current_load < best.max_concurrent_tunnels);
    assert_eq!(best.id, "almost");
}

#[tokio::test]
async fn test_draining_server_excluded_from_selection_but_counted() {
    let registry = memory_registry(300);
    registry
        .register(&server("drain", 0, 10).with_status(ServerStatus::Draining))
        .await
        .unwrap();

    assert!(registry.best_server().await.is_none());

    let stats = registry.fleet_stats().await;
    assert_eq!(stats.server_count, 1);
    assert_eq!(stats.active_server_count, 0);
    assert_eq!(stats.total_capacity, 10);
}

#[tokio::test]
async fn test_unregister_removes_immediately() {
    let registry = memory_registry(300);
    registry.register(&server("s1", 0, 10)).await.unwrap();
    registry.unregister("s1").await.unwrap();

    assert!(registry.get("s1").await.unwrap().is_none());
    assert!(registry.best_server().await.is_none());
    // Unregistering twice is harmless
    registry.unregister("s1").await.unwrap();
}

#[tokio::test]
async fn test_fleet_stats_aggregates() {
    let registry = memory_registry(300);
    registry.register(&server("a", 20, 50)).await.unwrap();
    registry.register(&server("b", 30, 50)).await.unwrap();

    let stats = registry.fleet_stats().await;
    assert_eq!(stats.server_count, 2);
    assert_eq!(stats.total_capacity, 100);
    assert_eq!(stats.total_load, 50);
    assert_eq!(stats.utilization_percent, 50.0);
    assert_eq!(stats.total_bandwidth_mbps, 2000);
    assert_eq!(stats.used_bandwidth_mbps, 500.0);
    assert_eq!(stats.bandwidth_utilization_percent, 25.0);
}

#[tokio::test]
async fn test_store_unavailable_fails_closed() {
    let store: SharedStore = Arc::new(UnavailableStore);
    let registry = ServerRegistry::new(store, RegistryConfig::default());

    assert!(registry.best_server().await.is_none());
    assert_eq!(registry.fleet_stats().await, CapacitySnapshot::default());

    let err = registry.get_all().await.unwrap_err();
    assert!(err.is_store_unavailable());
    let err = registry.register(&server("s1", 0, 10)).await.unwrap_err();
    assert!(err.is_store_unavailable());
}
