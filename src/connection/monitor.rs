//! Periodic reconnect task
//!
//! The monitor observes transport connectivity on a fixed interval and
//! drives connect attempts when disconnected. Individual attempt failures
//! are classified, counted and logged; nothing propagates out of the loop,
//! so a single failed attempt can never kill the periodic task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::failure::{classify, FailureClass};
use super::{ConnectionListener, ConnectionManager, ConnectionTaskControl, WatchdogService};

/// Monitor settings, taken from the `[connection]` config section
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Component name used with the watchdog collaborator
    pub component: String,
    /// Attempt a connect immediately on activation
    pub auto_connect_on_startup: bool,
    /// Interval between connectivity checks while disconnected
    pub retry_interval: Duration,
    /// Consecutive retryable failures before the monitor registers itself
    /// as a critical component. An alerting threshold, not a stop condition.
    pub recovery_max_failures: u32,
}

#[derive(Debug)]
enum Command {
    StartTask,
    StopTask,
    Shutdown,
}

/// Cloneable handle to a spawned [`ConnectionMonitor`] loop.
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<Command>,
}

impl MonitorHandle {
    /// Terminate the monitor loop and cancel pending checks. Idempotent;
    /// safe to call concurrently with an in-progress tick.
    pub async fn shutdown(&self) {
        // A closed channel just means the loop is already gone.
        let _ = self.tx.send(Command::Shutdown).await;
    }
}

#[async_trait]
impl ConnectionTaskControl for MonitorHandle {
    async fn start_connection_task(&self) {
        let _ = self.tx.send(Command::StartTask).await;
    }

    async fn stop_connection_task(&self) {
        let _ = self.tx.send(Command::StopTask).await;
    }
}

/// Mutable bookkeeping of the monitor loop
#[derive(Debug, Default)]
pub(crate) struct MonitorState {
    pub(crate) consecutive_failures: u32,
    pub(crate) registered_critical: bool,
    pub(crate) was_connected: bool,
}

/// Periodic task observing connectivity and driving reconnect attempts.
pub struct ConnectionMonitor {
    manager: Arc<dyn ConnectionManager>,
    watchdog: Arc<dyn WatchdogService>,
    listener: Arc<dyn ConnectionListener>,
    config: MonitorConfig,
}

impl ConnectionMonitor {
    pub fn new(
        manager: Arc<dyn ConnectionManager>,
        watchdog: Arc<dyn WatchdogService>,
        listener: Arc<dyn ConnectionListener>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            manager,
            watchdog,
            listener,
            config,
        }
    }

    /// Spawn the monitor loop. The returned handle starts/stops the
    /// connection task and shuts the loop down.
    pub fn spawn(self) -> (MonitorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(16);
        let handle = MonitorHandle { tx };
        let join = tokio::spawn(self.run(rx));
        (handle, join)
    }

    async fn run(self, mut rx: mpsc::Receiver<Command>) {
        let mut state = MonitorState::default();
        let mut active = self.config.auto_connect_on_startup;
        let mut interval = tokio::time::interval(self.config.retry_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            component = %self.config.component,
            auto_connect = active,
            retry_interval_secs = self.config.retry_interval.as_secs(),
            "connection monitor started"
        );

        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(Command::StartTask) => {
                        active = true;
                        self.tick(&mut state).await;
                    }
                    Some(Command::StopTask) => {
                        debug!(component = %self.config.component, "connection task suspended");
                        active = false;
                    }
                    Some(Command::Shutdown) | None => break,
                },
                _ = interval.tick() => {
                    if active {
                        self.tick(&mut state).await;
                    } else {
                        self.observe(&mut state).await;
                    }
                }
            }
        }

        info!(component = %self.config.component, "connection monitor stopped");
    }

    /// Passive check while the connection task is suspended: a lost
    /// connection is surfaced to the listener, but no reconnect is
    /// attempted until the task is started again.
    pub(crate) async fn observe(&self, state: &mut MonitorState) {
        if self.manager.is_connected() {
            state.was_connected = true;
            return;
        }
        if state.was_connected {
            state.was_connected = false;
            warn!(
                component = %self.config.component,
                "connection lost while connection task suspended"
            );
            self.listener.on_connection_lost().await;
        }
    }

    /// One connectivity check. Never propagates an error.
    pub(crate) async fn tick(&self, state: &mut MonitorState) {
        let component = &self.config.component;

        if self.manager.is_connected() {
            state.was_connected = true;
            self.watchdog.checkin(component).await;
            return;
        }

        if state.was_connected {
            state.was_connected = false;
            warn!(component = %component, "connection lost, entering recovery");
            self.listener.on_connection_lost().await;
        }

        match self.manager.connect().await {
            Ok(session) => {
                info!(
                    component = %component,
                    session_id = %session.session_id,
                    new_session = session.new_session,
                    recovered_after = state.consecutive_failures,
                    "connection established"
                );
                state.consecutive_failures = 0;
                state.was_connected = true;
                if state.registered_critical {
                    state.registered_critical = false;
                    self.watchdog.unregister_critical_component(component).await;
                }
                self.listener.on_connection_established(&session).await;
            }
            Err(failure) => match classify(&failure) {
                FailureClass::Auth => {
                    // Pointless to retry immediately, but the system itself
                    // is not unhealthy: no counting, no critical component.
                    warn!(component = %component, error = %failure, "connect rejected");
                }
                FailureClass::Retryable => {
                    state.consecutive_failures += 1;
                    if state.consecutive_failures >= self.config.recovery_max_failures
                        && !state.registered_critical
                    {
                        error!(
                            component = %component,
                            failures = state.consecutive_failures,
                            "failure threshold reached, registering critical component"
                        );
                        state.registered_critical = true;
                        self.watchdog.register_critical_component(component).await;
                    }
                    if state.registered_critical {
                        self.watchdog.checkin(component).await;
                    }
                    warn!(
                        component = %component,
                        error = %failure,
                        failures = state.consecutive_failures,
                        "connect attempt failed"
                    );
                }
            },
        }
    }
}
