//! Cron-driven connect/disconnect scheduling
//!
//! Instead of keeping the connection up permanently, the gateway can open a
//! window on a cron schedule and drop the link after an inactivity timeout.
//! All delay computations go through an injected [`Clock`] so scheduling
//! logic stays deterministic under test.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;

pub mod strategy;

pub use strategy::{ScheduleConfig, ScheduleHandle, ScheduleStrategy};

/// Injectable time source
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock [`Clock`] used outside of tests
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Parse a Quartz-style cron expression (six or seven fields, seconds
/// first, `?` allowed for the day fields).
pub fn parse_expression(expression: &str) -> Result<Schedule, cron::error::Error> {
    Schedule::from_str(expression)
}

/// Next fire time strictly after `after`, or `None` for a schedule with no
/// future occurrence.
pub fn next_fire_time(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

/// Delay from `now` until the next fire time.
pub fn next_fire_delay(schedule: &Schedule, now: DateTime<Utc>) -> Option<Duration> {
    next_fire_time(schedule, now).and_then(|fire| (fire - now).to_std().ok())
}
