//! Connection lifecycle capabilities and the reconnect monitor
//!
//! The wire-protocol client is an external collaborator reached through the
//! [`ConnectionManager`] trait; the monitor and the schedule only ever talk
//! to that abstraction. The watchdog and status-indicator collaborators are
//! likewise traits so the engine can run against mocks in tests.

use std::time::Duration;

use async_trait::async_trait;

pub mod failure;
pub mod monitor;

pub use failure::{classify, ConnectFailure, FailureClass};
pub use monitor::{ConnectionMonitor, MonitorConfig, MonitorHandle};

/// Session context returned by a successful connect attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedSession {
    /// Identifier of the transport session, echoed in transport tokens
    pub session_id: String,
    /// True when the transport assigned a fresh session with no resumed
    /// state, invalidating every previous in-flight message
    pub new_session: bool,
}

/// Connect/disconnect capability implemented by the wire transport client.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Attempt to connect. May block for arbitrary time; callers run it on a
    /// dedicated task, never on a producer thread.
    async fn connect(&self) -> Result<ConnectedSession, ConnectFailure>;

    /// Disconnect, allowing up to `quiesce` for an orderly shutdown.
    async fn disconnect(&self, quiesce: Duration);

    fn is_connected(&self) -> bool;
}

/// Handle for starting and stopping the periodic connection task, consumed
/// by the schedule strategy and the priority override.
#[async_trait]
pub trait ConnectionTaskControl: Send + Sync {
    /// Ask the monitor machinery to begin (or immediately retry) connecting.
    async fn start_connection_task(&self);

    /// Suspend periodic connect attempts until the task is started again.
    async fn stop_connection_task(&self);
}

/// External health watchdog.
#[async_trait]
pub trait WatchdogService: Send + Sync {
    async fn checkin(&self, component: &str);
    async fn register_critical_component(&self, component: &str);
    async fn unregister_critical_component(&self, component: &str);
}

/// Connection-status indicator values, observable by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusIndicator {
    On,
    Off,
    SlowBlinking,
}

/// External connection-status indicator (an LED on most gateways).
#[async_trait]
pub trait ConnectionStatusService: Send + Sync {
    async fn update_status(&self, component: &str, status: StatusIndicator);
}

/// Connectivity-transition callbacks into the orchestrator.
#[async_trait]
pub trait ConnectionListener: Send + Sync {
    async fn on_connection_established(&self, session: &ConnectedSession);
    async fn on_connection_lost(&self);
}

/// Watchdog that records health transitions in the log. Stands in where no
/// platform watchdog is wired up.
pub struct LogWatchdog;

#[async_trait]
impl WatchdogService for LogWatchdog {
    async fn checkin(&self, component: &str) {
        tracing::trace!(component, "watchdog checkin");
    }

    async fn register_critical_component(&self, component: &str) {
        tracing::error!(component, "component registered as critical");
    }

    async fn unregister_critical_component(&self, component: &str) {
        tracing::info!(component, "component recovered, critical registration cleared");
    }
}

/// Status indicator that logs transitions. Stands in where the gateway has
/// no physical indicator.
pub struct LogStatusService;

#[async_trait]
impl ConnectionStatusService for LogStatusService {
    async fn update_status(&self, component: &str, status: StatusIndicator) {
        tracing::info!(component, status = ?status, "connection status changed");
    }
}
