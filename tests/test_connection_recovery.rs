//! Connection Recovery Tests
//!
//! Exercises the spawned reconnect monitor against the orchestrator:
//! - Monitor-driven connect kicks off delivery of queued traffic
//! - Persistent failures escalate to the watchdog, recovery clears them
//! - Task control start/stop from the outside (schedule, override)

use std::sync::Arc;
use std::time::Duration;

use edgerelay::connection::{
    ConnectFailure, ConnectionManager, ConnectionMonitor, ConnectionTaskControl, MonitorConfig,
};
use edgerelay::service::{DataService, PublishOptions};
use edgerelay::store::{MessageState, MessageStore, MessageStoreProvider, SledStoreProvider};
use edgerelay::testing::mocks::{
    MockConnectionManager, MockListener, MockStatusService, MockTransportSend, MockWatchdog,
};

fn open_store(path: &std::path::Path) -> Arc<dyn MessageStore> {
    let provider = SledStoreProvider::open(path).unwrap();
    provider.open_message_store("messages", 100).unwrap()
}

fn monitor_config(auto_connect: bool, max_failures: u32) -> MonitorConfig {
    MonitorConfig {
        component: "edgerelay".to_string(),
        auto_connect_on_startup: auto_connect,
        retry_interval: Duration::from_millis(10),
        recovery_max_failures: max_failures,
    }
}

#[tokio::test]
async fn test_monitor_connect_drains_queued_traffic() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    let transport = Arc::new(MockTransportSend::new("session-1"));
    let service = Arc::new(DataService::new(
        "edgerelay",
        store.clone(),
        transport.clone(),
        Arc::new(MockStatusService::new()),
        PublishOptions::default(),
    ));

    // Queued while the link is down
    let id = service
        .publish("telemetry/t", Some(vec![1]), 1, false, 0)
        .await
        .unwrap();
    assert!(!service.is_connected());

    let monitor = ConnectionMonitor::new(
        Arc::new(MockConnectionManager::disconnected()),
        Arc::new(MockWatchdog::new()),
        service.clone(),
        monitor_config(true, 3),
    );
    let (handle, join) = monitor.spawn();

    // First periodic check connects and the established callback drains
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(service.is_connected());
    assert_eq!(transport.sent().await.len(), 1);
    assert_eq!(store.message(id).unwrap().unwrap().state, MessageState::InFlight);

    handle.shutdown().await;
    join.await.unwrap();
}

#[tokio::test]
async fn test_persistent_failure_escalates_then_recovers() {
    let manager = Arc::new(MockConnectionManager::failing(ConnectFailure::transient(
        "broker unreachable",
    )));
    let watchdog = Arc::new(MockWatchdog::new());
    let listener = Arc::new(MockListener::new());

    let monitor = ConnectionMonitor::new(
        manager.clone(),
        watchdog.clone(),
        listener.clone(),
        monitor_config(true, 2),
    );
    let (handle, join) = monitor.spawn();

    // Two retryable failures cross the threshold
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(watchdog.critical_components().await, vec!["edgerelay"]);
    assert!(listener.established().await.is_empty());

    // Broker comes back: the monitor recovers and clears the registration
    manager.recover().await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(watchdog.critical_components().await.is_empty());
    assert_eq!(listener.established().await.len(), 1);

    handle.shutdown().await;
    join.await.unwrap();
}

#[tokio::test]
async fn test_task_control_starts_suspended_monitor() {
    let manager = Arc::new(MockConnectionManager::disconnected());
    let listener = Arc::new(MockListener::new());

    // auto_connect off: the monitor idles until told otherwise
    let monitor = ConnectionMonitor::new(
        manager.clone(),
        Arc::new(MockWatchdog::new()),
        listener.clone(),
        monitor_config(false, 3),
    );
    let (handle, join) = monitor.spawn();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!manager.is_connected());

    handle.start_connection_task().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(manager.is_connected());
    assert_eq!(listener.established().await.len(), 1);

    handle.shutdown().await;
    join.await.unwrap();
}

#[tokio::test]
async fn test_suspended_monitor_still_observes_connection_loss() {
    let manager = Arc::new(MockConnectionManager::disconnected());
    let listener = Arc::new(MockListener::new());

    let monitor = ConnectionMonitor::new(
        manager.clone(),
        Arc::new(MockWatchdog::new()),
        listener.clone(),
        monitor_config(true, 3),
    );
    let (handle, join) = monitor.spawn();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(manager.is_connected());

    // A scheduled window closing: task stopped, then the link dropped
    handle.stop_connection_task().await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    manager.disconnect(Duration::from_millis(0)).await;

    // The suspended monitor still reports the loss, exactly once, and
    // does not reconnect
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(listener.lost_count().await, 1);
    assert!(!manager.is_connected());

    handle.shutdown().await;
    join.await.unwrap();
}

#[tokio::test]
async fn test_stop_task_suspends_reconnect_attempts() {
    let manager = Arc::new(MockConnectionManager::failing(ConnectFailure::transient(
        "no route",
    )));
    let listener = Arc::new(MockListener::new());

    let monitor = ConnectionMonitor::new(
        manager.clone(),
        Arc::new(MockWatchdog::new()),
        listener.clone(),
        monitor_config(true, 100),
    );
    let (handle, join) = monitor.spawn();

    tokio::time::sleep(Duration::from_millis(40)).await;
    handle.stop_connection_task().await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Suspended: a later recovery is not picked up until the task restarts
    manager.recover().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!manager.is_connected());

    handle.start_connection_task().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(manager.is_connected());

    handle.shutdown().await;
    join.await.unwrap();
}
