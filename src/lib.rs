//! edgerelay - store-and-forward reliability layer for MQTT edge gateways
//!
//! Field gateways publish telemetry over links that drop without warning.
//! This crate decouples message production from delivery: every publish is
//! persisted first, then drained to the broker in priority order, with
//! confirmations tracked per message so nothing is lost silently across
//! disconnects, restarts or broker session resets.
//!
//! # Overview
//!
//! - [`store`] - durable, capacity-bounded message store with lifecycle
//!   states and priority-ordered selection
//! - [`service`] - the [`DataService`](service::DataService) orchestrator:
//!   publish, drain, confirm, session policies
//! - [`connection`] - connect/disconnect seams, failure classification and
//!   the reconnect monitor
//! - [`transport`] - the rumqttc-backed broker binding
//! - [`schedule`] - optional cron-driven connection windows
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use edgerelay::service::{DataService, PublishOptions};
//! use edgerelay::store::{MessageStoreProvider, SledStoreProvider};
//! use edgerelay::testing::mocks::{MockStatusService, MockTransportSend};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = SledStoreProvider::open("/var/lib/edgerelay")?;
//! let store = provider.open_message_store("messages", 10_000)?;
//!
//! let service = Arc::new(DataService::new(
//!     "edgerelay",
//!     store,
//!     Arc::new(MockTransportSend::new("session-1")),
//!     Arc::new(MockStatusService::new()),
//!     PublishOptions::default(),
//! ));
//!
//! // Succeeds whether or not the broker is reachable
//! let id = service.publish("telemetry/temp", Some(b"21.5".to_vec()), 1, false, 5).await?;
//! println!("queued message {id}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod schedule;
pub mod service;
pub mod store;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, RelayConfig};
pub use connection::{
    ConnectFailure, ConnectedSession, ConnectionListener, ConnectionManager, ConnectionMonitor,
    ConnectionStatusService, ConnectionTaskControl, MonitorConfig, MonitorHandle, StatusIndicator,
    WatchdogService,
};
pub use error::{DataServiceError, DataServiceResult};
pub use service::{DataService, PublishOptions};
pub use store::{
    MessageId, MessageState, MessageStore, MessageStoreProvider, StoreError, StoredMessage,
    TransportToken,
};
pub use transport::{TransportError, TransportListener, TransportSend};
