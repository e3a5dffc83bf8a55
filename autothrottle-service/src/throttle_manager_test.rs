use crate::broker_writer::ThrottleWriter;
use crate::events::{EventSink, ThrottleEvent};
use crate::limits::{Limits, LimitsConfig};
use crate::metrics_provider::{Broker, MetricsError, MetricsProvider};
use crate::reassignments::ReassignmentDiscovery;
use crate::throttle_manager::{ThrottleManager, ThrottleManagerConfig};
use crate::throttle_override::{OverrideGovernor, ThrottleOverrideConfig};

use anyhow::Result;
use async_trait::async_trait;
use autothrottle_metadata_store::{MemoryStore, MetadataStorage, MetadataStore};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PREFIX: &str = "/autothrottle";

/// Metrics provider returning a settable static picture, counting calls.
struct StaticMetrics {
    brokers: Mutex<HashMap<u64, Broker>>,
    calls: AtomicUsize,
}

impl StaticMetrics {
    fn new() -> Arc<Self> {
        Arc::new(StaticMetrics {
            brokers: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        })
    }

    fn set_broker(&self, id: u64, net_tx: f64, net_rx: f64) {
        self.brokers.lock().unwrap().insert(
            id,
            Broker {
                id,
                instance_type: "d2.2xlarge".to_string(),
                net_tx,
                net_rx,
            },
        );
    }

    fn clear(&self) {
        self.brokers.lock().unwrap().clear();
    }
}

#[async_trait]
impl MetricsProvider for StaticMetrics {
    async fn broker_metrics(&self, _window: Duration) -> Result<HashMap<u64, Broker>, MetricsError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.brokers.lock().unwrap().clone())
    }
}

/// Event sink capturing everything emitted.
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ThrottleEvent>>,
}

impl RecordingSink {
    fn titles(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.title.clone())
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, event: ThrottleEvent) {
        self.events.lock().unwrap().push(event);
    }
}

struct Harness {
    manager: ThrottleManager,
    store: MetadataStorage,
    metrics: Arc<StaticMetrics>,
    sink: Arc<RecordingSink>,
    governor: OverrideGovernor,
}

async fn harness() -> Harness {
    let store = MetadataStorage::InMemory(MemoryStore::new());
    let governor = OverrideGovernor::new(store.clone(), PREFIX);
    governor.bootstrap().await.unwrap();

    let mut capacity_map = HashMap::new();
    capacity_map.insert("d2.2xlarge".to_string(), 120.0);
    let limits = Limits::new(LimitsConfig {
        minimum: 20.0,
        maximum: 90.0,
        // Source cap of 100% keeps the headroom algebra easy to steer in
        // these tests: rate == capacity - (net_tx - prev).
        source_maximum: 100.0,
        destination_maximum: 60.0,
        capacity_map,
    })
    .unwrap();

    let metrics = StaticMetrics::new();
    let sink = Arc::new(RecordingSink::default());

    let manager = ThrottleManager::new(
        ThrottleManagerConfig {
            interval: Duration::from_secs(60),
            metrics_window: Duration::from_secs(60),
            change_threshold: 10.0,
            failure_threshold: 3,
            cleanup_after: 10,
        },
        limits,
        governor.clone(),
        ReassignmentDiscovery::new(store.clone(), PREFIX),
        ThrottleWriter::new(store.clone(), PREFIX),
        metrics.clone(),
        sink.clone(),
    );

    Harness {
        manager,
        store,
        metrics,
        sink,
        governor,
    }
}

async fn add_reassignment(store: &MetadataStorage, topic: &str, sources: &[u64], dests: &[u64]) {
    store
        .put(
            &format!("{}/reassignments/{}", PREFIX, topic),
            json!({"sources": sources, "destinations": dests}),
        )
        .await
        .unwrap();
}

async fn remove_reassignment(store: &MetadataStorage, topic: &str) {
    store
        .delete(&format!("{}/reassignments/{}", PREFIX, topic))
        .await
        .unwrap();
}

async fn broker_source_rate(store: &MetadataStorage, id: u64) -> Option<f64> {
    store
        .get(&format!("{}/brokers/{}", PREFIX, id))
        .await
        .unwrap()
        .and_then(|v| v.get("source_rate").and_then(|r| r.as_f64()))
}

/// Hysteresis boundary: with a change threshold of 10%, a 9% move must not
/// rewrite the broker configuration and an 11% move must.
#[tokio::test]
async fn test_hysteresis_boundary() -> Result<()> {
    let mut h = harness().await;
    add_reassignment(&h.store, "events", &[1001], &[]).await;

    // capacity 120, prev 0, net_tx 20 -> rate = (120 - 20) * 1.0 = 100.
    h.metrics.set_broker(1001, 20.0, 0.0);
    h.manager.evaluate().await?;
    assert_eq!(broker_source_rate(&h.store, 1001).await, Some(100.0));

    // Desired 109 (9% above 100): discarded, last applied rate stands.
    h.metrics.set_broker(1001, 111.0, 0.0);
    h.manager.evaluate().await?;
    assert_eq!(broker_source_rate(&h.store, 1001).await, Some(100.0));

    // Desired 111 (11% above 100): written.
    h.metrics.set_broker(1001, 109.0, 0.0);
    h.manager.evaluate().await?;
    assert_eq!(broker_source_rate(&h.store, 1001).await, Some(111.0));

    Ok(())
}

/// A nonzero override is applied verbatim to every participating broker in
/// both roles, and metrics are not queried at all.
#[tokio::test]
async fn test_override_bypasses_metrics() -> Result<()> {
    let mut h = harness().await;
    add_reassignment(&h.store, "events", &[1001], &[1002]).await;

    h.governor
        .set(ThrottleOverrideConfig {
            rate: 42,
            auto_remove: false,
        })
        .await?;

    h.manager.evaluate().await?;

    assert_eq!(h.metrics.calls.load(Ordering::SeqCst), 0);
    assert_eq!(broker_source_rate(&h.store, 1001).await, Some(42.0));
    let dest = h
        .store
        .get(&format!("{}/brokers/1002", PREFIX))
        .await?
        .unwrap();
    assert_eq!(dest.get("destination_rate").and_then(|r| r.as_f64()), Some(42.0));

    Ok(())
}

/// Below the failure threshold a broker keeps its last computed rate; once
/// the threshold is reached it falls back to the configured minimum.
#[tokio::test]
async fn test_metrics_failure_fallback() -> Result<()> {
    let mut h = harness().await;
    add_reassignment(&h.store, "events", &[1001], &[]).await;

    h.metrics.set_broker(1001, 20.0, 0.0);
    h.manager.evaluate().await?;
    assert_eq!(broker_source_rate(&h.store, 1001).await, Some(100.0));

    // Two failed fetches: last good rate stands, no fallback yet.
    h.metrics.clear();
    h.manager.evaluate().await?;
    h.manager.evaluate().await?;
    assert_eq!(broker_source_rate(&h.store, 1001).await, Some(100.0));

    // Third consecutive failure reaches the threshold: minimum applies.
    h.manager.evaluate().await?;
    assert_eq!(broker_source_rate(&h.store, 1001).await, Some(20.0));

    Ok(())
}

/// A broker that was never successfully measured falls back to the minimum
/// immediately rather than staying unthrottled.
#[tokio::test]
async fn test_first_tick_failure_applies_minimum() -> Result<()> {
    let mut h = harness().await;
    add_reassignment(&h.store, "events", &[1001], &[]).await;

    h.manager.evaluate().await?;
    assert_eq!(broker_source_rate(&h.store, 1001).await, Some(20.0));

    Ok(())
}

/// With reassignments gone, every previously throttled broker receives a
/// remove exactly once, on the transition tick.
#[tokio::test]
async fn test_idle_transition_clears_once() -> Result<()> {
    let mut h = harness().await;
    add_reassignment(&h.store, "events", &[1001], &[1002]).await;

    h.metrics.set_broker(1001, 20.0, 0.0);
    h.metrics.set_broker(1002, 0.0, 30.0);
    h.manager.evaluate().await?;
    assert!(broker_source_rate(&h.store, 1001).await.is_some());

    remove_reassignment(&h.store, "events").await;
    h.manager.evaluate().await?;

    let removed = h
        .sink
        .titles()
        .iter()
        .filter(|t| *t == "throttle removed")
        .count();
    assert_eq!(removed, 2);
    assert!(h
        .store
        .get_childrens(&format!("{}/brokers", PREFIX))
        .await?
        .is_empty());

    // Further idle ticks have nothing left to clear.
    h.manager.evaluate().await?;
    h.manager.evaluate().await?;
    let removed = h
        .sink
        .titles()
        .iter()
        .filter(|t| *t == "throttle removed")
        .count();
    assert_eq!(removed, 2);

    Ok(())
}

/// The safety-net sweep also catches throttle configuration this process
/// never wrote, such as a record left behind by a previous run: it stands
/// through cleanup_after - 1 idle ticks and is removed on the next one.
#[tokio::test]
async fn test_periodic_sweep_clears_stale_record() -> Result<()> {
    let mut h = harness().await;

    // Leftover from an earlier run; no reassignment references it.
    h.store
        .put(
            &format!("{}/brokers/9001", PREFIX),
            json!({"source_rate": 55.0}),
        )
        .await?;

    // Idle from the start, so no transition fires the clear early.
    for _ in 0..9 {
        h.manager.evaluate().await?;
    }
    assert!(broker_source_rate(&h.store, 9001).await.is_some());

    // Tenth idle tick hits the cleanup_after boundary.
    h.manager.evaluate().await?;
    assert!(broker_source_rate(&h.store, 9001).await.is_none());
    assert!(h.sink.titles().contains(&"throttle removed".to_string()));

    Ok(())
}

/// An auto-remove override is cleared on the Throttling -> Idle transition,
/// after the global throttle clear.
#[tokio::test]
async fn test_auto_remove_override_cleared_on_transition() -> Result<()> {
    let mut h = harness().await;
    add_reassignment(&h.store, "events", &[1001], &[]).await;

    h.governor
        .set(ThrottleOverrideConfig {
            rate: 42,
            auto_remove: true,
        })
        .await?;

    h.manager.evaluate().await?;
    assert_eq!(broker_source_rate(&h.store, 1001).await, Some(42.0));

    remove_reassignment(&h.store, "events").await;
    h.manager.evaluate().await?;

    assert_eq!(h.governor.get().await?, ThrottleOverrideConfig::default());

    Ok(())
}

/// An override without auto_remove survives the idle transition.
#[tokio::test]
async fn test_manual_override_survives_idle() -> Result<()> {
    let mut h = harness().await;
    add_reassignment(&h.store, "events", &[1001], &[]).await;

    let config = ThrottleOverrideConfig {
        rate: 42,
        auto_remove: false,
    };
    h.governor.set(config).await?;

    h.manager.evaluate().await?;
    remove_reassignment(&h.store, "events").await;
    h.manager.evaluate().await?;

    assert_eq!(h.governor.get().await?, config);

    Ok(())
}

/// A broker holding both roles across different topics gets one record
/// carrying both rates.
#[tokio::test]
async fn test_dual_role_broker() -> Result<()> {
    let mut h = harness().await;
    add_reassignment(&h.store, "events", &[1003], &[1004]).await;
    add_reassignment(&h.store, "audit", &[1005], &[1003]).await;

    // net_tx 20 -> source rate 100; net_rx 0 -> destination rate
    // (120 - 20) * 0.6 = 60.
    h.metrics.set_broker(1003, 20.0, 0.0);
    h.metrics.set_broker(1004, 0.0, 0.0);
    h.metrics.set_broker(1005, 0.0, 0.0);
    h.manager.evaluate().await?;

    let record = h
        .store
        .get(&format!("{}/brokers/1003", PREFIX))
        .await?
        .unwrap();
    assert_eq!(record.get("source_rate").and_then(|r| r.as_f64()), Some(100.0));
    assert_eq!(
        record.get("destination_rate").and_then(|r| r.as_f64()),
        Some(60.0)
    );

    Ok(())
}
