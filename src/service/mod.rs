//! DataService orchestrator
//!
//! Public surface of the engine: producers call [`DataService::publish`] at
//! any time, connected or not; the message is validated and persisted
//! synchronously, and delivery happens later through the drain loop. The
//! transport reports confirmations through [`TransportListener`] and
//! connectivity transitions arrive through [`ConnectionListener`].
//!
//! The token map and the drain loop share one async mutex, so a
//! confirmation, a session-establishment reset and a drain pass can never
//! interleave partially. `publish` itself only touches the store and an
//! atomic connected flag; a slow network send never stalls producers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connection::{
    ConnectedSession, ConnectionListener, ConnectionStatusService, ConnectionTaskControl,
    StatusIndicator,
};
use crate::error::{DataServiceError, DataServiceResult};
use crate::schedule::ScheduleHandle;
use crate::store::{MessageId, MessageState, MessageStore, TransportToken};
use crate::transport::{TransportListener, TransportSend};

pub mod tokens;

use tokens::TokenMap;

/// Publish-path settings, taken from the `[publish]` and `[schedule]`
/// config sections
#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Maximum accepted payload size in bytes (boundary inclusive)
    pub max_payload_size: usize,
    /// Maximum number of simultaneously in-flight messages
    pub max_in_flight: usize,
    /// On a new session, requeue previously in-flight messages instead of
    /// dropping them
    pub republish_on_new_session: bool,
    /// When set, a publish at or below this priority while disconnected
    /// requests an immediate out-of-schedule connect
    pub priority_override_threshold: Option<i32>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            max_payload_size: 8192,
            max_in_flight: 9,
            republish_on_new_session: true,
            priority_override_threshold: None,
        }
    }
}

struct ServiceState {
    tokens: TokenMap,
}

/// Store-and-forward orchestrator.
pub struct DataService {
    component: String,
    store: Arc<dyn MessageStore>,
    transport: Arc<dyn TransportSend>,
    status: Arc<dyn ConnectionStatusService>,
    options: PublishOptions,
    connected: AtomicBool,
    drain_wake: Notify,
    state: Mutex<ServiceState>,
    task_control: Mutex<Option<Arc<dyn ConnectionTaskControl>>>,
    schedule: Mutex<Option<ScheduleHandle>>,
}

impl DataService {
    pub fn new(
        component: impl Into<String>,
        store: Arc<dyn MessageStore>,
        transport: Arc<dyn TransportSend>,
        status: Arc<dyn ConnectionStatusService>,
        options: PublishOptions,
    ) -> Self {
        Self {
            component: component.into(),
            store,
            transport,
            status,
            options,
            connected: AtomicBool::new(false),
            drain_wake: Notify::new(),
            state: Mutex::new(ServiceState {
                tokens: TokenMap::new(),
            }),
            task_control: Mutex::new(None),
            schedule: Mutex::new(None),
        }
    }

    /// Wire the connection-task handle used by the priority override.
    pub async fn set_task_control(&self, control: Arc<dyn ConnectionTaskControl>) {
        *self.task_control.lock().await = Some(control);
    }

    /// Wire the schedule strategy so it learns about established
    /// connections and can arm its inactivity timer.
    pub async fn set_schedule_handle(&self, handle: ScheduleHandle) {
        *self.schedule.lock().await = Some(handle);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Accept a message for publication. Succeeds synchronously regardless
    /// of connection state; storing is decoupled from sending, and delivery
    /// happens on the drain worker, so a slow transport send never delays
    /// the caller.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Option<Vec<u8>>,
        qos: u8,
        retain: bool,
        priority: i32,
    ) -> DataServiceResult<MessageId> {
        if priority < 0 {
            return Err(DataServiceError::invalid_argument(format!(
                "priority must be non-negative, got {priority}"
            )));
        }
        if qos > 2 {
            return Err(DataServiceError::invalid_argument(format!(
                "QoS must be 0, 1 or 2, got {qos}"
            )));
        }
        if let Some(body) = &payload {
            if body.len() > self.options.max_payload_size {
                return Err(DataServiceError::PayloadTooLarge {
                    size: body.len(),
                    max: self.options.max_payload_size,
                });
            }
        }

        let id = self.store.store(topic, payload, qos, retain, priority)?;
        debug!(id, topic, qos, priority, "message accepted");

        if self.is_connected() {
            self.drain_wake.notify_one();
        } else if self.override_applies(priority) {
            info!(id, priority, "priority override, requesting immediate connect");
            if let Some(control) = self.task_control.lock().await.as_ref() {
                control.start_connection_task().await;
            }
        }
        Ok(id)
    }

    fn override_applies(&self, priority: i32) -> bool {
        matches!(
            self.options.priority_override_threshold,
            Some(threshold) if priority <= threshold
        )
    }

    /// Ids of unpublished messages on topics matching the pattern.
    pub fn unpublished_message_ids(&self, topic_pattern: &str) -> DataServiceResult<Vec<MessageId>> {
        Ok(self.store.query(topic_pattern, MessageState::Unpublished)?)
    }

    /// Ids of in-flight messages on topics matching the pattern.
    pub fn in_flight_message_ids(&self, topic_pattern: &str) -> DataServiceResult<Vec<MessageId>> {
        Ok(self.store.query(topic_pattern, MessageState::InFlight)?)
    }

    /// Ids of messages dropped by a new-session policy, on topics matching
    /// the pattern.
    pub fn dropped_in_flight_message_ids(
        &self,
        topic_pattern: &str,
    ) -> DataServiceResult<Vec<MessageId>> {
        Ok(self.store.query(topic_pattern, MessageState::Dropped)?)
    }

    /// Offer unpublished messages to the transport in (priority, age)
    /// order. Stops when disconnected, when the store runs empty or when
    /// the in-flight window is full. Send failures leave the message
    /// unpublished; the next cycle retries it.
    async fn drain(&self) {
        let mut state = self.state.lock().await;
        loop {
            if !self.is_connected() {
                break;
            }
            if state.tokens.len() >= self.options.max_in_flight {
                debug!(
                    in_flight = state.tokens.len(),
                    "in-flight window full, drain paused"
                );
                break;
            }

            let msg = match self.store.next_unpublished() {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "failed to read next unpublished message");
                    break;
                }
            };

            let token = match self
                .transport
                .send(&msg.topic, msg.payload.as_deref(), msg.qos, msg.retain)
                .await
            {
                Ok(token) => token,
                Err(e) => {
                    warn!(id = msg.id, error = %e, "send failed, message stays queued");
                    break;
                }
            };

            if let Err(e) = self.store.mark_in_flight(msg.id, token.clone()) {
                // The message changed state under us (eviction, bulk
                // transition); nothing to track.
                warn!(id = msg.id, error = %e, "could not mark message in flight");
                continue;
            }

            if msg.qos == 0 {
                // The transport never acknowledges QoS 0; settle it now.
                match self.store.mark_confirmed(&token) {
                    Ok(_) => debug!(id = msg.id, "QoS 0 message settled locally"),
                    Err(e) => error!(id = msg.id, error = %e, "failed to settle QoS 0 message"),
                }
            } else {
                state.tokens.insert(token, msg.id);
            }
        }
    }

    /// Deliberate shutdown: stop draining and turn the indicator off.
    pub async fn shutdown(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.status
            .update_status(&self.component, StatusIndicator::Off)
            .await;
        info!(component = %self.component, "data service stopped");
    }

    /// Spawn the delivery worker. `publish` wakes it instead of sending
    /// inline, so a publisher never waits behind the transport.
    pub fn spawn_drain_worker(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = self.drain_wake.notified() => {
                        self.drain().await;
                    }
                }
            }
        })
    }

    /// Spawn the periodic store housekeeper.
    pub fn spawn_housekeeper(
        &self,
        interval: Duration,
        purge_age: Duration,
        max_records: usize,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick, skip it
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = store.housekeep(purge_age, max_records) {
                            error!(error = %e, "store housekeeping failed");
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl ConnectionListener for DataService {
    async fn on_connection_established(&self, session: &ConnectedSession) {
        let mut state = self.state.lock().await;

        if session.new_session {
            // Previous in-flight state is stale. A store failure here is
            // logged but must not leave stale entries in the in-memory map.
            let result = if self.options.republish_on_new_session {
                self.store.republish_all_in_flight()
            } else {
                self.store.drop_all_in_flight()
            };
            match result {
                Ok(count) if self.options.republish_on_new_session => {
                    info!(count, "new session, requeued in-flight messages")
                }
                Ok(count) => info!(count, "new session, dropped in-flight messages"),
                Err(e) => error!(error = %e, "failed to reset in-flight messages on new session"),
            }
            state.tokens.clear();
        } else {
            match self.store.all_in_flight() {
                Ok(records) => {
                    state.tokens.rebuild(&records);
                    info!(
                        in_flight = state.tokens.len(),
                        "resumed session, token map rebuilt from store"
                    );
                }
                Err(e) => {
                    error!(error = %e, "failed to rebuild token map, clearing");
                    state.tokens.clear();
                }
            }
        }

        self.connected.store(true, Ordering::SeqCst);
        drop(state);

        self.status
            .update_status(&self.component, StatusIndicator::On)
            .await;
        if let Some(schedule) = self.schedule.lock().await.as_ref() {
            schedule.on_connection_established().await;
        }
        self.drain().await;
    }

    async fn on_connection_lost(&self) {
        self.connected.store(false, Ordering::SeqCst);
        // In-flight messages stay in-flight; the next session-establishment
        // resolves them.
        warn!(component = %self.component, "connection lost");
        self.status
            .update_status(&self.component, StatusIndicator::SlowBlinking)
            .await;
    }
}

#[async_trait]
impl TransportListener for DataService {
    async fn on_message_confirmed(&self, token: TransportToken) {
        let mut state = self.state.lock().await;
        let Some(id) = state.tokens.remove(&token) else {
            // Duplicate or late confirmation across a reconnect; tolerated.
            warn!(token = %token, "confirmation for unknown token, ignoring");
            return;
        };

        // The message is delivered from the transport's perspective; a
        // local bookkeeping failure must not resurrect the mapping.
        match self.store.mark_confirmed(&token) {
            Ok(Some(_)) => debug!(id, token = %token, "message confirmed"),
            Ok(None) => warn!(id, token = %token, "no in-flight record for confirmation"),
            Err(e) => error!(id, token = %token, error = %e, "failed to record confirmation"),
        }
        drop(state);

        self.drain().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::{MockStatusService, MockTransportSend};
    use tempfile::TempDir;

    fn sled_store(dir: &TempDir, capacity: usize) -> Arc<dyn MessageStore> {
        let db = sled::open(dir.path()).unwrap();
        let tree = db.open_tree("messages").unwrap();
        Arc::new(crate::store::SledMessageStore::open("messages", tree, capacity).unwrap())
    }

    fn service(store: Arc<dyn MessageStore>, options: PublishOptions) -> (Arc<DataService>, Arc<MockTransportSend>, Arc<MockStatusService>) {
        let transport = Arc::new(MockTransportSend::new("session-1"));
        let status = Arc::new(MockStatusService::new());
        let svc = Arc::new(DataService::new(
            "edgerelay",
            store,
            transport.clone(),
            status.clone(),
            options,
        ));
        (svc, transport, status)
    }

    #[tokio::test]
    async fn test_publish_stores_while_disconnected() {
        let dir = tempfile::tempdir().unwrap();
        let store = sled_store(&dir, 16);
        let (svc, transport, _) = service(store.clone(), PublishOptions::default());

        let id = svc
            .publish("telemetry/t", Some(vec![1, 2, 3]), 1, false, 5)
            .await
            .unwrap();

        assert!(transport.sent().await.is_empty());
        assert_eq!(
            store.message(id).unwrap().unwrap().state,
            MessageState::Unpublished
        );
    }

    #[tokio::test]
    async fn test_negative_priority_rejected_before_storage() {
        let dir = tempfile::tempdir().unwrap();
        let store = sled_store(&dir, 16);
        let (svc, _, _) = service(store.clone(), PublishOptions::default());

        let result = svc.publish("t", Some(vec![0]), 0, false, -1).await;
        assert!(matches!(
            result,
            Err(DataServiceError::InvalidArgument { .. })
        ));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_payload_boundary_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let store = sled_store(&dir, 16);
        let options = PublishOptions {
            max_payload_size: 4,
            ..Default::default()
        };
        let (svc, _, _) = service(store.clone(), options);

        svc.publish("t", Some(vec![0; 3]), 0, false, 0).await.unwrap();
        svc.publish("t", Some(vec![0; 4]), 0, false, 0).await.unwrap();
        let result = svc.publish("t", Some(vec![0; 5]), 0, false, 0).await;

        assert!(matches!(
            result,
            Err(DataServiceError::PayloadTooLarge { size: 5, max: 4 })
        ));
        assert_eq!(store.count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_drain_sends_in_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = sled_store(&dir, 16);
        let (svc, transport, _) = service(store, PublishOptions::default());

        svc.publish("t/5", None, 1, false, 5).await.unwrap();
        svc.publish("t/1", None, 1, false, 1).await.unwrap();
        svc.publish("t/3", None, 1, false, 3).await.unwrap();

        svc.on_connection_established(&ConnectedSession {
            session_id: "session-1".to_string(),
            new_session: true,
        })
        .await;

        let topics: Vec<String> = transport.sent().await.iter().map(|m| m.topic.clone()).collect();
        assert_eq!(topics, vec!["t/1", "t/3", "t/5"]);
    }

    #[tokio::test]
    async fn test_drain_respects_in_flight_window() {
        let dir = tempfile::tempdir().unwrap();
        let store = sled_store(&dir, 16);
        let options = PublishOptions {
            max_in_flight: 2,
            ..Default::default()
        };
        let (svc, transport, _) = service(store.clone(), options);

        for i in 0..4 {
            svc.publish(&format!("t/{i}"), None, 1, false, 0).await.unwrap();
        }
        svc.on_connection_established(&ConnectedSession {
            session_id: "session-1".to_string(),
            new_session: true,
        })
        .await;

        assert_eq!(transport.sent().await.len(), 2);

        // A confirmation frees one slot and triggers another send
        let token = transport.sent().await[0].token.clone();
        svc.on_message_confirmed(token).await;
        assert_eq!(transport.sent().await.len(), 3);
    }

    #[tokio::test]
    async fn test_qos0_settles_without_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let store = sled_store(&dir, 16);
        let (svc, transport, _) = service(store.clone(), PublishOptions::default());

        let id = svc.publish("t", Some(vec![1]), 0, false, 0).await.unwrap();
        svc.on_connection_established(&ConnectedSession {
            session_id: "session-1".to_string(),
            new_session: true,
        })
        .await;

        assert_eq!(transport.sent().await.len(), 1);
        assert_eq!(
            store.message(id).unwrap().unwrap().state,
            MessageState::Confirmed
        );
    }

    #[tokio::test]
    async fn test_send_failure_leaves_message_queued() {
        let dir = tempfile::tempdir().unwrap();
        let store = sled_store(&dir, 16);
        let (svc, transport, _) = service(store.clone(), PublishOptions::default());

        let id = svc.publish("t", None, 1, false, 0).await.unwrap();
        transport.fail_sends(true).await;
        svc.on_connection_established(&ConnectedSession {
            session_id: "session-1".to_string(),
            new_session: true,
        })
        .await;

        assert_eq!(
            store.message(id).unwrap().unwrap().state,
            MessageState::Unpublished
        );

        // Next cycle retries once the transport recovers
        transport.fail_sends(false).await;
        svc.on_connection_established(&ConnectedSession {
            session_id: "session-1".to_string(),
            new_session: false,
        })
        .await;
        assert_eq!(
            store.message(id).unwrap().unwrap().state,
            MessageState::InFlight
        );
    }

    #[tokio::test]
    async fn test_publish_does_not_wait_for_slow_send() {
        let dir = tempfile::tempdir().unwrap();
        let store = sled_store(&dir, 16);
        let (svc, transport, _) = service(store.clone(), PublishOptions::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = svc.clone().spawn_drain_worker(shutdown_rx);

        svc.publish("t/slow", None, 1, false, 0).await.unwrap();
        transport.set_send_delay(Duration::from_millis(400)).await;

        // Establish kicks off a drain that is stuck mid-send
        let establishing = svc.clone();
        let established = tokio::spawn(async move {
            establishing
                .on_connection_established(&ConnectedSession {
                    session_id: "session-1".to_string(),
                    new_session: true,
                })
                .await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Accepting a new message must not wait for that send to finish
        let start = std::time::Instant::now();
        let id = svc.publish("t/fast", None, 1, false, 0).await.unwrap();
        assert!(
            start.elapsed() < Duration::from_millis(200),
            "publish stalled {:?} behind a slow transport send",
            start.elapsed()
        );
        assert!(store.message(id).unwrap().is_some());

        // The worker delivers the new message once the stuck send clears
        transport.set_send_delay(Duration::from_millis(0)).await;
        established.await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.sent().await.len(), 2);

        shutdown_tx.send(true).unwrap();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_confirmation_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = sled_store(&dir, 16);
        let (svc, _, _) = service(store.clone(), PublishOptions::default());

        svc.publish("t", None, 1, false, 0).await.unwrap();
        svc.on_message_confirmed(TransportToken::new(77, "nobody")).await;
        assert_eq!(store.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_new_session_drop_policy() {
        let dir = tempfile::tempdir().unwrap();
        let store = sled_store(&dir, 16);
        let options = PublishOptions {
            republish_on_new_session: false,
            max_in_flight: 1,
            ..Default::default()
        };
        let (svc, transport, status) = service(store.clone(), options);

        let id = svc.publish("t", None, 1, false, 0).await.unwrap();
        svc.on_connection_established(&ConnectedSession {
            session_id: "session-1".to_string(),
            new_session: false,
        })
        .await;
        assert_eq!(
            store.message(id).unwrap().unwrap().state,
            MessageState::InFlight
        );

        // Reconnect with a fresh session invalidates the in-flight message
        transport.fail_sends(true).await;
        svc.on_connection_established(&ConnectedSession {
            session_id: "session-2".to_string(),
            new_session: true,
        })
        .await;

        assert_eq!(
            store.message(id).unwrap().unwrap().state,
            MessageState::Dropped
        );
        assert_eq!(status.last_status().await, Some(StatusIndicator::On));

        // A confirmation for the dead session's token finds nothing
        let stale = transport.sent().await[0].token.clone();
        svc.on_message_confirmed(stale).await;
        assert_eq!(
            store.message(id).unwrap().unwrap().state,
            MessageState::Dropped
        );
    }

    #[tokio::test]
    async fn test_new_session_republish_policy() {
        let dir = tempfile::tempdir().unwrap();
        let store = sled_store(&dir, 16);
        let options = PublishOptions {
            republish_on_new_session: true,
            max_in_flight: 1,
            ..Default::default()
        };
        let (svc, transport, _) = service(store.clone(), options);

        let id = svc.publish("t", None, 1, false, 0).await.unwrap();
        svc.on_connection_established(&ConnectedSession {
            session_id: "session-1".to_string(),
            new_session: false,
        })
        .await;
        assert_eq!(transport.sent().await.len(), 1);

        transport.fail_sends(true).await;
        svc.on_connection_lost().await;
        svc.on_connection_established(&ConnectedSession {
            session_id: "session-2".to_string(),
            new_session: true,
        })
        .await;

        // Requeued and eligible for redelivery
        let msg = store.message(id).unwrap().unwrap();
        assert_eq!(msg.state, MessageState::Unpublished);
    }

    #[tokio::test]
    async fn test_resumed_session_rebuilds_token_map() {
        let dir = tempfile::tempdir().unwrap();
        let store = sled_store(&dir, 16);
        let (svc, transport, _) = service(store.clone(), PublishOptions::default());

        let id = svc.publish("t", None, 1, false, 0).await.unwrap();
        svc.on_connection_established(&ConnectedSession {
            session_id: "session-1".to_string(),
            new_session: true,
        })
        .await;
        let token = transport.sent().await[0].token.clone();

        svc.on_connection_lost().await;
        svc.on_connection_established(&ConnectedSession {
            session_id: "session-1".to_string(),
            new_session: false,
        })
        .await;

        // The rebuilt map still resolves the pre-reconnect token
        svc.on_message_confirmed(token).await;
        assert_eq!(
            store.message(id).unwrap().unwrap().state,
            MessageState::Confirmed
        );
    }

    #[tokio::test]
    async fn test_connection_lost_sets_slow_blinking() {
        let dir = tempfile::tempdir().unwrap();
        let store = sled_store(&dir, 16);
        let (svc, _, status) = service(store, PublishOptions::default());

        svc.on_connection_lost().await;
        assert_eq!(status.last_status().await, Some(StatusIndicator::SlowBlinking));
    }

    #[tokio::test]
    async fn test_shutdown_turns_indicator_off() {
        let dir = tempfile::tempdir().unwrap();
        let store = sled_store(&dir, 16);
        let (svc, _, status) = service(store, PublishOptions::default());

        svc.on_connection_established(&ConnectedSession {
            session_id: "session-1".to_string(),
            new_session: true,
        })
        .await;
        svc.shutdown().await;

        assert!(!svc.is_connected());
        assert_eq!(status.last_status().await, Some(StatusIndicator::Off));
    }

    #[tokio::test]
    async fn test_priority_override_requests_connect() {
        use crate::testing::mocks::MockTaskControl;

        let dir = tempfile::tempdir().unwrap();
        let store = sled_store(&dir, 16);
        let options = PublishOptions {
            priority_override_threshold: Some(1),
            ..Default::default()
        };
        let (svc, _, _) = service(store, options);
        let control = Arc::new(MockTaskControl::new());
        svc.set_task_control(control.clone()).await;

        // Above the threshold: no override
        svc.publish("t", None, 1, false, 5).await.unwrap();
        assert_eq!(control.starts().await, 0);

        // At the threshold while disconnected: immediate connect requested
        svc.publish("t", None, 1, false, 1).await.unwrap();
        assert_eq!(control.starts().await, 1);
    }

    #[tokio::test]
    async fn test_introspection_queries() {
        let dir = tempfile::tempdir().unwrap();
        let store = sled_store(&dir, 16);
        let options = PublishOptions {
            republish_on_new_session: false,
            max_in_flight: 1,
            ..Default::default()
        };
        let (svc, transport, _) = service(store, options);

        let a = svc.publish("sensors/temp", None, 1, false, 0).await.unwrap();
        let b = svc.publish("sensors/rh", None, 1, false, 0).await.unwrap();

        assert_eq!(svc.unpublished_message_ids("^sensors/").unwrap(), vec![a, b]);

        svc.on_connection_established(&ConnectedSession {
            session_id: "session-1".to_string(),
            new_session: false,
        })
        .await;
        assert_eq!(svc.in_flight_message_ids(".*").unwrap(), vec![a]);

        transport.fail_sends(true).await;
        svc.on_connection_established(&ConnectedSession {
            session_id: "session-2".to_string(),
            new_session: true,
        })
        .await;
        assert_eq!(svc.dropped_in_flight_message_ids(".*").unwrap(), vec![a]);
    }
}
