//! Admission checks against a live (in-memory) registry

use fleet_admission::{AdmissionController, CapacityConfig, Rejection};
use fleet_registry::{RegistryConfig, ServerRecord, ServerRegistry};
use fleet_store::testing::UnavailableStore;
use fleet_store::{MemoryStore, SharedStore};
use std::sync::Arc;
use std::time::Duration;

fn setup(config: CapacityConfig) -> (AdmissionController, ServerRegistry) {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let registry = ServerRegistry::new(store, RegistryConfig::default());
    let controller = AdmissionController::new(registry.clone(), config).unwrap();
    (controller, registry)
}

async fn register(registry: &ServerRegistry, id: &str, load: u32, max: u32) {
    registry
        .register(
            &ServerRecord::new(id, "10.1.0.1", 7835)
                .with_capacity(max, 1000)
                .with_load(load, 0.0),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_quota_exhausted_regardless_of_headroom() {
    let (controller, registry) = setup(CapacityConfig::default());
    register(&registry, "idle", 0, 100).await;

    let result = controller.check_capacity(5, 5).await;
    assert!(!result.has_capacity);
    assert!(matches!(
        result.rejection,
        Some(Rejection::QuotaExhausted { .. })
    ));

    let result = controller.check_capacity(5, 4).await;
    assert!(result.has_capacity);
}

#[tokio::test]
async fn test_reserved_headroom_ceiling() {
    // totalSystemCapacity=100, reserved=20% => ceiling 80
    let (controller, registry) = setup(CapacityConfig::default());
    register(&registry, "a", 40, 100).await;
    register(&registry, "b", 39, 100).await;

    let result = controller.check_capacity(10, 0).await;
    assert!(result.has_capacity);
    assert_eq!(result.active_tunnels, 79);
    assert_eq!(result.available_slots, 1);

    register(&registry, "b", 40, 100).await;
    let result = controller.check_capacity(10, 0).await;
    assert!(!result.has_capacity);
    assert_eq!(result.active_tunnels, 80);
    assert_eq!(result.available_slots, 0);
}

#[tokio::test]
async fn test_empty_fleet_rejected() {
    let (controller, _registry) = setup(CapacityConfig::default());
    let result = controller.check_capacity(10, 0).await;
    assert!(!result.has_capacity);
    assert_eq!(result.rejection, Some(Rejection::NoServers));
}

#[tokio::test(start_paused = true)]
async fn test_expired_fleet_rejected() {
    let (controller, registry) = setup(CapacityConfig::default());
    register(&registry, "a", 0, 100).await;
    assert!(controller.check_capacity(10, 0).await.has_capacity);

    tokio::time::advance(Duration::from_secs(301)).await;
    assert!(!controller.check_capacity(10, 0).await.has_capacity);
}

#[tokio::test]
async fn test_store_unavailable_rejects() {
    let store: SharedStore = Arc::new(UnavailableStore);
    let registry = ServerRegistry::new(store, RegistryConfig::default());
    let controller = AdmissionController::new(registry, CapacityConfig::default()).unwrap();

    let result = controller.check_capacity(10, 0).await;
    assert!(!result.has_capacity);
    assert_eq!(result.rejection, Some(Rejection::FleetUnavailable));
    assert_eq!(result.server_count, 0);
}

#[tokio::test]
async fn test_result_serializes_for_api_layer() {
    let (controller, registry) = setup(CapacityConfig::default());
    register(&registry, "a", 10, 100).await;

    let result = controller.check_capacity(10, 0).await;
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["hasCapacity"], true);
    assert_eq!(json["activeTunnels"], 10);
    assert_eq!(json["availableSlots"], 70);
    assert!(json.get("rejection").is_none());
}
