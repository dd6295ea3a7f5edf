//! MQTT binding over rumqttc
//!
//! Implements [`ConnectionManager`] and [`TransportSend`] for the engine.
//! One connect attempt per [`ConnectionManager::connect`] call; retry policy
//! lives in the connection monitor, not here. Delivery confirmations
//! (PubAck for QoS 1, PubComp for QoS 2) are forwarded to the registered
//! [`TransportListener`].
//!
//! rumqttc assigns wire packet ids internally, so the binding issues its own
//! monotonic message ids and resolves acknowledgements against the
//! send-order queue of outstanding tokens per QoS class.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::ConnectReturnCode;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop, Incoming, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::connection::{ConnectFailure, ConnectedSession, ConnectionManager};
use crate::store::TransportToken;

use super::{TransportError, TransportListener, TransportSend};

/// Broker connection settings, taken from the `[connection]` config section
#[derive(Debug, Clone)]
pub struct MqttSettings {
    /// Broker URL, `mqtt://` or `mqtts://` with optional port
    pub broker_url: String,
    /// Stable client identifier presented to the broker
    pub client_id: String,
    /// Environment variable holding the username, if any
    pub username_env: Option<String>,
    /// Environment variable holding the password, if any
    pub password_env: Option<String>,
    /// Keep-alive interval
    pub keep_alive: Duration,
    /// Request a fresh session on every connect
    pub clean_start: bool,
}

/// Build rumqttc options from settings: host/port from the URL, TLS for
/// `mqtts://`, credentials resolved from the environment.
pub fn configure_mqtt_options(settings: &MqttSettings) -> Result<MqttOptions, ConnectFailure> {
    let url = Url::parse(&settings.broker_url)
        .map_err(|e| ConnectFailure::protocol(format!("invalid broker URL: {e}")))?;

    let host = url
        .host_str()
        .ok_or_else(|| ConnectFailure::protocol("broker URL has no host"))?;
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "mqtts" { 8883 } else { 1883 });

    let mut options = MqttOptions::new(&settings.client_id, host, port);

    if url.scheme() == "mqtts" {
        options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username_env) = &settings.username_env {
        if let Ok(username) = std::env::var(username_env) {
            let password = settings
                .password_env
                .as_ref()
                .and_then(|env_name| std::env::var(env_name).ok())
                .unwrap_or_default();
            options.set_credentials(&username, &password);
        }
    }

    options.set_keep_alive(settings.keep_alive);
    options.set_clean_start(settings.clean_start);

    Ok(options)
}

fn map_qos(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

fn classify_connack(code: ConnectReturnCode) -> ConnectFailure {
    match code {
        ConnectReturnCode::NotAuthorized
        | ConnectReturnCode::BadUserNamePassword
        | ConnectReturnCode::BadAuthenticationMethod
        | ConnectReturnCode::ClientIdentifierNotValid => {
            ConnectFailure::authentication(format!("broker refused connection: {code:?}"))
        }
        ConnectReturnCode::ServerUnavailable | ConnectReturnCode::ServerBusy => {
            ConnectFailure::transient(format!("broker unavailable: {code:?}"))
        }
        other => ConnectFailure::protocol(format!("broker refused connection: {other:?}")),
    }
}

/// One live broker session: client handle plus the event-pump task.
struct ActiveSession {
    client: AsyncClient,
    session_id: String,
    shutdown_tx: watch::Sender<bool>,
    pump: JoinHandle<()>,
}

/// Outstanding QoS > 0 tokens awaiting acknowledgement, in send order.
#[derive(Default)]
struct PendingAcks {
    qos1: VecDeque<TransportToken>,
    qos2: VecDeque<TransportToken>,
}

/// rumqttc-backed connection manager and send primitive.
pub struct MqttConnection {
    settings: MqttSettings,
    connected: Arc<AtomicBool>,
    session: Mutex<Option<ActiveSession>>,
    listener: Mutex<Option<Arc<dyn TransportListener>>>,
    pending: Arc<Mutex<PendingAcks>>,
    next_message_id: AtomicU32,
}

impl MqttConnection {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            connected: Arc::new(AtomicBool::new(false)),
            session: Mutex::new(None),
            listener: Mutex::new(None),
            pending: Arc::new(Mutex::new(PendingAcks::default())),
            next_message_id: AtomicU32::new(1),
        }
    }

    /// Register the confirmation sink. Must be called before the first
    /// connect; later registrations replace the previous listener.
    pub async fn set_listener(&self, listener: Arc<dyn TransportListener>) {
        *self.listener.lock().await = Some(listener);
    }

    /// Poll the fresh event loop until the broker answers the connect.
    async fn await_connack(event_loop: &mut EventLoop) -> Result<bool, ConnectFailure> {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        return Ok(ack.session_present);
                    }
                    return Err(classify_connack(ack.code));
                }
                Ok(_) => continue,
                Err(e) => return Err(ConnectFailure::transient(e.to_string())),
            }
        }
    }

    /// Pump broker events until shutdown or a connection error, forwarding
    /// acknowledgements to the listener.
    async fn pump_events(
        mut event_loop: EventLoop,
        mut shutdown_rx: watch::Receiver<bool>,
        connected: Arc<AtomicBool>,
        pending: Arc<Mutex<PendingAcks>>,
        listener: Option<Arc<dyn TransportListener>>,
        session_id: String,
    ) {
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                event = event_loop.poll() => match event {
                    // Acks are paired with tokens strictly FIFO per QoS
                    // class: the broker acknowledges a connection's
                    // publishes in send order, and rumqttc's AsyncClient
                    // does not expose the packet id at publish time. An
                    // out-of-order ack would mispair tokens.
                    Ok(Event::Incoming(Incoming::PubAck(_))) => {
                        let token = pending.lock().await.qos1.pop_front();
                        Self::forward_confirmation(token, &listener, &session_id).await;
                    }
                    Ok(Event::Incoming(Incoming::PubComp(_))) => {
                        let token = pending.lock().await.qos2.pop_front();
                        Self::forward_confirmation(token, &listener, &session_id).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "mqtt event loop error");
                        break;
                    }
                }
            }
        }
        connected.store(false, Ordering::SeqCst);
        debug!(session_id = %session_id, "mqtt event pump stopped");
    }

    async fn forward_confirmation(
        token: Option<TransportToken>,
        listener: &Option<Arc<dyn TransportListener>>,
        session_id: &str,
    ) {
        match (token, listener) {
            (Some(token), Some(listener)) => listener.on_message_confirmed(token).await,
            (None, _) => {
                warn!(session_id, "acknowledgement with no outstanding token");
            }
            _ => {}
        }
    }
}

#[async_trait]
impl ConnectionManager for MqttConnection {
    async fn connect(&self) -> Result<ConnectedSession, ConnectFailure> {
        let mut session_slot = self.session.lock().await;
        if session_slot.is_some() && self.connected.load(Ordering::SeqCst) {
            return Err(ConnectFailure::protocol("already connected"));
        }
        // A previous session may have died without an orderly disconnect.
        if let Some(stale) = session_slot.take() {
            stale.pump.abort();
        }

        let options = configure_mqtt_options(&self.settings)?;
        let (client, mut event_loop) = AsyncClient::new(options, 10);

        let session_present = Self::await_connack(&mut event_loop).await?;
        let new_session = self.settings.clean_start || !session_present;
        let session_id = Uuid::new_v4().to_string();

        // Tokens of the dead session can never be acknowledged now.
        {
            let mut pending = self.pending.lock().await;
            pending.qos1.clear();
            pending.qos2.clear();
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let listener = self.listener.lock().await.clone();
        let pump = tokio::spawn(Self::pump_events(
            event_loop,
            shutdown_rx,
            self.connected.clone(),
            self.pending.clone(),
            listener,
            session_id.clone(),
        ));

        *session_slot = Some(ActiveSession {
            client,
            session_id: session_id.clone(),
            shutdown_tx,
            pump,
        });
        self.connected.store(true, Ordering::SeqCst);

        info!(
            broker = %self.settings.broker_url,
            session_id = %session_id,
            new_session,
            "mqtt connection established"
        );
        Ok(ConnectedSession {
            session_id,
            new_session,
        })
    }

    async fn disconnect(&self, quiesce: Duration) {
        let mut session_slot = self.session.lock().await;
        if let Some(session) = session_slot.take() {
            if let Err(e) = session.client.disconnect().await {
                warn!(error = %e, "mqtt disconnect request failed");
            }
            // Give the broker the quiesce window to flush, then stop the pump.
            let _ = tokio::time::timeout(quiesce, async {
                while !session.pump.is_finished() {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            })
            .await;
            let _ = session.shutdown_tx.send(true);
            session.pump.abort();
            info!(session_id = %session.session_id, "mqtt connection closed");
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportSend for MqttConnection {
    async fn send(
        &self,
        topic: &str,
        payload: Option<&[u8]>,
        qos: u8,
        retain: bool,
    ) -> Result<TransportToken, TransportError> {
        let session_slot = self.session.lock().await;
        let session = session_slot
            .as_ref()
            .filter(|_| self.connected.load(Ordering::SeqCst))
            .ok_or(TransportError::NotConnected)?;

        let body = payload.unwrap_or_default().to_vec();
        let token = TransportToken::new(
            self.next_message_id.fetch_add(1, Ordering::SeqCst),
            session.session_id.clone(),
        );

        // Enqueue before the publish so an immediate acknowledgement from
        // the pump task always finds its token.
        if qos > 0 {
            let mut pending = self.pending.lock().await;
            match qos {
                1 => pending.qos1.push_back(token.clone()),
                _ => pending.qos2.push_back(token.clone()),
            }
        }

        if let Err(e) = session
            .client
            .publish(topic, map_qos(qos), retain, body)
            .await
        {
            if qos > 0 {
                let mut pending = self.pending.lock().await;
                let queue = if qos == 1 {
                    &mut pending.qos1
                } else {
                    &mut pending.qos2
                };
                queue.retain(|t| t != &token);
            }
            return Err(TransportError::SendFailed {
                reason: e.to_string(),
            });
        }

        debug!(topic, qos, retain, token = %token, "handed message to transport");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(url: &str) -> MqttSettings {
        MqttSettings {
            broker_url: url.to_string(),
            client_id: "edgerelay-test".to_string(),
            username_env: None,
            password_env: None,
            keep_alive: Duration::from_secs(60),
            clean_start: false,
        }
    }

    #[test]
    fn test_configure_options_plain_broker() {
        let options = configure_mqtt_options(&settings("mqtt://broker.local:1883")).unwrap();
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1883));
    }

    #[test]
    fn test_configure_options_default_tls_port() {
        let options = configure_mqtt_options(&settings("mqtts://broker.local")).unwrap();
        assert_eq!(options.broker_address().1, 8883);
    }

    #[test]
    fn test_invalid_broker_url_is_protocol_failure() {
        let result = configure_mqtt_options(&settings("not a url"));
        assert!(matches!(
            result,
            Err(ConnectFailure::Protocol { .. })
        ));
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(map_qos(0), QoS::AtMostOnce);
        assert_eq!(map_qos(1), QoS::AtLeastOnce);
        assert_eq!(map_qos(2), QoS::ExactlyOnce);
    }

    #[test]
    fn test_connack_auth_codes_classified_as_auth() {
        assert!(matches!(
            classify_connack(ConnectReturnCode::NotAuthorized),
            ConnectFailure::Authentication { .. }
        ));
        assert!(matches!(
            classify_connack(ConnectReturnCode::BadUserNamePassword),
            ConnectFailure::Authentication { .. }
        ));
        assert!(matches!(
            classify_connack(ConnectReturnCode::ServerUnavailable),
            ConnectFailure::Transient { .. }
        ));
    }

    #[test]
    fn test_send_while_disconnected_fails() {
        let conn = MqttConnection::new(settings("mqtt://localhost:1883"));
        let result =
            tokio_test::block_on(conn.send("telemetry/t", Some(&[1, 2]), 1, false));
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }
}
