//! Transport seam between the orchestrator and the wire client
//!
//! The orchestrator only ever sees these traits; the MQTT binding in
//! [`mqtt`] implements them over rumqttc, and the mocks in
//! `testing::mocks` implement them for tests.

use async_trait::async_trait;
use thiserror::Error;

use crate::store::TransportToken;

pub mod mqtt;

pub use mqtt::{MqttConnection, MqttSettings};

/// Send-path errors. Always absorbed by the drain loop; the message stays
/// unpublished and is retried on the next cycle.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,

    #[error("send failed: {reason}")]
    SendFailed { reason: String },
}

/// Outbound send primitive implemented by the wire transport client.
#[async_trait]
pub trait TransportSend: Send + Sync {
    /// Hand one message to the transport. The returned token identifies the
    /// in-flight attempt until the transport confirms delivery.
    async fn send(
        &self,
        topic: &str,
        payload: Option<&[u8]>,
        qos: u8,
        retain: bool,
    ) -> Result<TransportToken, TransportError>;
}

/// Inbound confirmation channel invoked by the transport. Confirmations may
/// arrive out of send order and concurrently with any orchestrator call.
#[async_trait]
pub trait TransportListener: Send + Sync {
    async fn on_message_confirmed(&self, token: TransportToken);
}
