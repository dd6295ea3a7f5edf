//! Recording mocks for the connection, transport and status seams
//!
//! Each mock records the calls it receives behind an async mutex and
//! exposes accessors for assertions. Behavior is scriptable where tests
//! need it (connect failures, send failures).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::connection::{
    ConnectFailure, ConnectedSession, ConnectionListener, ConnectionManager,
    ConnectionStatusService, ConnectionTaskControl, StatusIndicator, WatchdogService,
};
use crate::schedule::Clock;
use crate::store::TransportToken;
use crate::transport::{TransportError, TransportSend};

/// Scriptable [`ConnectionManager`] double.
pub struct MockConnectionManager {
    connected: AtomicBool,
    failure: Mutex<Option<ConnectFailure>>,
    session: Mutex<ConnectedSession>,
    disconnect_count: Mutex<usize>,
}

impl MockConnectionManager {
    fn with(connected: bool, failure: Option<ConnectFailure>) -> Self {
        Self {
            connected: AtomicBool::new(connected),
            failure: Mutex::new(failure),
            session: Mutex::new(ConnectedSession {
                session_id: "session-1".to_string(),
                new_session: true,
            }),
            disconnect_count: Mutex::new(0),
        }
    }

    /// Manager that reports an established connection.
    pub fn connected() -> Self {
        Self::with(true, None)
    }

    /// Disconnected manager whose next connect attempt succeeds.
    pub fn disconnected() -> Self {
        Self::with(false, None)
    }

    /// Disconnected manager whose connect attempts fail until
    /// [`recover`](Self::recover) is called.
    pub fn failing(failure: ConnectFailure) -> Self {
        Self::with(false, Some(failure))
    }

    /// Session context handed out by subsequent successful connects.
    pub async fn set_session(&self, session_id: &str, new_session: bool) {
        *self.session.lock().await = ConnectedSession {
            session_id: session_id.to_string(),
            new_session,
        };
    }

    /// Drop the connection and make future connect attempts fail.
    pub async fn fail_with(&self, failure: ConnectFailure) {
        self.connected.store(false, Ordering::SeqCst);
        *self.failure.lock().await = Some(failure);
    }

    /// Clear a scripted failure so the next connect succeeds.
    pub async fn recover(&self) {
        *self.failure.lock().await = None;
    }

    pub async fn disconnects(&self) -> usize {
        *self.disconnect_count.lock().await
    }
}

#[async_trait]
impl ConnectionManager for MockConnectionManager {
    async fn connect(&self) -> Result<ConnectedSession, ConnectFailure> {
        if let Some(failure) = self.failure.lock().await.as_ref() {
            return Err(failure.clone());
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(self.session.lock().await.clone())
    }

    async fn disconnect(&self, _quiesce: Duration) {
        self.connected.store(false, Ordering::SeqCst);
        *self.disconnect_count.lock().await += 1;
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Counting [`ConnectionTaskControl`] double.
pub struct MockTaskControl {
    start_count: Mutex<usize>,
    stop_count: Mutex<usize>,
}

impl MockTaskControl {
    pub fn new() -> Self {
        Self {
            start_count: Mutex::new(0),
            stop_count: Mutex::new(0),
        }
    }

    pub async fn starts(&self) -> usize {
        *self.start_count.lock().await
    }

    pub async fn stops(&self) -> usize {
        *self.stop_count.lock().await
    }
}

impl Default for MockTaskControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionTaskControl for MockTaskControl {
    async fn start_connection_task(&self) {
        *self.start_count.lock().await += 1;
    }

    async fn stop_connection_task(&self) {
        *self.stop_count.lock().await += 1;
    }
}

/// Recording [`WatchdogService`] double.
pub struct MockWatchdog {
    checkin_count: Mutex<usize>,
    critical: Mutex<Vec<String>>,
}

impl MockWatchdog {
    pub fn new() -> Self {
        Self {
            checkin_count: Mutex::new(0),
            critical: Mutex::new(Vec::new()),
        }
    }

    pub async fn checkins(&self) -> usize {
        *self.checkin_count.lock().await
    }

    /// Currently registered critical components, in registration order.
    pub async fn critical_components(&self) -> Vec<String> {
        self.critical.lock().await.clone()
    }
}

impl Default for MockWatchdog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WatchdogService for MockWatchdog {
    async fn checkin(&self, _component: &str) {
        *self.checkin_count.lock().await += 1;
    }

    async fn register_critical_component(&self, component: &str) {
        self.critical.lock().await.push(component.to_string());
    }

    async fn unregister_critical_component(&self, component: &str) {
        self.critical.lock().await.retain(|c| c != component);
    }
}

/// Recording [`ConnectionListener`] double.
pub struct MockListener {
    established_sessions: Mutex<Vec<ConnectedSession>>,
    lost: Mutex<usize>,
}

impl MockListener {
    pub fn new() -> Self {
        Self {
            established_sessions: Mutex::new(Vec::new()),
            lost: Mutex::new(0),
        }
    }

    pub async fn established(&self) -> Vec<ConnectedSession> {
        self.established_sessions.lock().await.clone()
    }

    pub async fn lost_count(&self) -> usize {
        *self.lost.lock().await
    }
}

impl Default for MockListener {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionListener for MockListener {
    async fn on_connection_established(&self, session: &ConnectedSession) {
        self.established_sessions.lock().await.push(session.clone());
    }

    async fn on_connection_lost(&self) {
        *self.lost.lock().await += 1;
    }
}

/// Recording [`ConnectionStatusService`] double.
pub struct MockStatusService {
    statuses: Mutex<Vec<(String, StatusIndicator)>>,
}

impl MockStatusService {
    pub fn new() -> Self {
        Self {
            statuses: Mutex::new(Vec::new()),
        }
    }

    pub async fn statuses(&self) -> Vec<(String, StatusIndicator)> {
        self.statuses.lock().await.clone()
    }

    pub async fn last_status(&self) -> Option<StatusIndicator> {
        self.statuses.lock().await.last().map(|(_, s)| *s)
    }
}

impl Default for MockStatusService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionStatusService for MockStatusService {
    async fn update_status(&self, component: &str, status: StatusIndicator) {
        self.statuses
            .lock()
            .await
            .push((component.to_string(), status));
    }
}

/// One message handed to a [`MockTransportSend`].
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub topic: String,
    pub payload: Option<Vec<u8>>,
    pub qos: u8,
    pub retain: bool,
    pub token: TransportToken,
}

/// Recording [`TransportSend`] double issuing sequential tokens.
pub struct MockTransportSend {
    session_id: String,
    next_message_id: AtomicU32,
    failing: AtomicBool,
    send_delay: Mutex<Option<Duration>>,
    messages: Mutex<Vec<SentMessage>>,
}

impl MockTransportSend {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            next_message_id: AtomicU32::new(1),
            failing: AtomicBool::new(false),
            send_delay: Mutex::new(None),
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Script whether subsequent sends fail.
    pub async fn fail_sends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Script a fixed latency for every subsequent send.
    pub async fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock().await = Some(delay);
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.messages.lock().await.clone()
    }
}

#[async_trait]
impl TransportSend for MockTransportSend {
    async fn send(
        &self,
        topic: &str,
        payload: Option<&[u8]>,
        qos: u8,
        retain: bool,
    ) -> Result<TransportToken, TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed {
                reason: "scripted send failure".to_string(),
            });
        }
        let delay = *self.send_delay.lock().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        let token = TransportToken::new(id, &self.session_id);
        self.messages.lock().await.push(SentMessage {
            topic: topic.to_string(),
            payload: payload.map(|p| p.to_vec()),
            qos,
            retain,
            token: token.clone(),
        });
        Ok(token)
    }
}

/// [`Clock`] pinned to a fixed instant.
pub struct FixedClock {
    instant: DateTime<Utc>,
}

impl FixedClock {
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self { instant }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.instant
    }
}
