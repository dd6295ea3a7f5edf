//! Schedule strategy driving the connection window
//!
//! A connect timer armed from the cron expression asks the connection task
//! to start; once the connection is up, an inactivity timer disconnects it
//! again and re-arms the cron timer. The priority override bypasses this
//! strategy entirely (it talks to the connection task directly), so the
//! timers here are never disturbed by out-of-schedule connects.

use std::sync::Arc;
use std::time::Duration;

use cron::Schedule;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{next_fire_delay, Clock};
use crate::connection::{ConnectionManager, ConnectionTaskControl};

/// Strategy settings, taken from the `[schedule]` config section
#[derive(Clone)]
pub struct ScheduleConfig {
    /// Parsed cron expression for connection windows
    pub schedule: Schedule,
    /// Inactivity window after a connection is established
    pub inactivity_interval: Duration,
    /// Grace period granted to the transport on scheduled disconnects
    pub disconnect_quiesce: Duration,
}

#[derive(Debug)]
enum Event {
    ConnectionEstablished,
}

/// Handle used to feed connectivity transitions into a running strategy.
#[derive(Clone)]
pub struct ScheduleHandle {
    tx: mpsc::Sender<Event>,
}

impl ScheduleHandle {
    /// Tell the strategy the connection came up, arming the inactivity
    /// disconnect timer.
    pub async fn on_connection_established(&self) {
        let _ = self.tx.send(Event::ConnectionEstablished).await;
    }
}

/// Which timer the strategy loop is currently waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Armed {
    Connect,
    Disconnect,
}

/// Cron-driven connect/disconnect strategy.
pub struct ScheduleStrategy {
    manager: Arc<dyn ConnectionManager>,
    control: Arc<dyn ConnectionTaskControl>,
    clock: Arc<dyn Clock>,
    config: ScheduleConfig,
}

impl ScheduleStrategy {
    pub fn new(
        manager: Arc<dyn ConnectionManager>,
        control: Arc<dyn ConnectionTaskControl>,
        clock: Arc<dyn Clock>,
        config: ScheduleConfig,
    ) -> Self {
        Self {
            manager,
            control,
            clock,
            config,
        }
    }

    /// Delay until the next scheduled connect, from the injected clock.
    pub fn connect_delay(&self) -> Option<Duration> {
        next_fire_delay(&self.config.schedule, self.clock.now())
    }

    /// Inactivity window armed after a connection is established.
    pub fn disconnect_delay(&self) -> Duration {
        self.config.inactivity_interval
    }

    /// Cron timer fired: ask for a connection unless one is already up.
    pub async fn on_connect_timer(&self) {
        if self.manager.is_connected() {
            debug!("scheduled connect skipped, already connected");
            return;
        }
        info!("schedule window opening, starting connection task");
        self.control.start_connection_task().await;
    }

    /// Inactivity timer fired: close the window if still connected.
    pub async fn on_disconnect_timer(&self) {
        if self.manager.is_connected() {
            info!(
                quiesce_ms = self.config.disconnect_quiesce.as_millis() as u64,
                "inactivity window elapsed, disconnecting"
            );
            self.manager.disconnect(self.config.disconnect_quiesce).await;
        }
        self.control.stop_connection_task().await;
    }

    /// Spawn the timer loop. Dropping all handles or signalling `shutdown`
    /// stops the loop without re-arming any timer.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> (ScheduleHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel(16);
        let handle = ScheduleHandle { tx };

        let join = tokio::spawn(async move {
            let mut armed = Armed::Connect;
            loop {
                let delay = match armed {
                    Armed::Connect => match self.connect_delay() {
                        Some(d) => d,
                        None => {
                            warn!("cron schedule has no future occurrence, strategy idle");
                            break;
                        }
                    },
                    Armed::Disconnect => self.disconnect_delay(),
                };
                debug!(armed = ?armed, delay_ms = delay.as_millis() as u64, "schedule timer armed");

                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    event = rx.recv() => match event {
                        Some(Event::ConnectionEstablished) => {
                            armed = Armed::Disconnect;
                        }
                        None => break,
                    },
                    _ = tokio::time::sleep(delay) => {
                        match armed {
                            Armed::Connect => self.on_connect_timer().await,
                            Armed::Disconnect => {
                                self.on_disconnect_timer().await;
                                armed = Armed::Connect;
                            }
                        }
                    }
                }
            }
            info!("schedule strategy stopped");
        });

        (handle, join)
    }
}
