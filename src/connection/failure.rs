//! Connection failure classification
//!
//! Connect attempts report failures as tagged variants instead of opaque
//! errors, so the monitor can decide by pattern matching whether a failure
//! is worth counting. Classification is a pure function; no state.

use thiserror::Error;

/// Failure raised by a [`super::ConnectionManager::connect`] attempt
#[derive(Debug, Clone, Error)]
pub enum ConnectFailure {
    /// Bad credentials, not-authorized, invalid client identity.
    /// Retrying immediately is pointless but the system itself is healthy.
    #[error("authentication failure: {reason}")]
    Authentication { reason: String },

    /// Broker rejected the session at the protocol level
    #[error("protocol failure: {reason}")]
    Protocol { reason: String },

    /// Broker unavailable, timeout, network-level error
    #[error("transient failure: {reason}")]
    Transient { reason: String },
}

impl ConnectFailure {
    pub fn authentication(reason: impl Into<String>) -> Self {
        Self::Authentication {
            reason: reason.into(),
        }
    }

    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }
}

/// How the monitor should account for a failed connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Never counts toward the consecutive-failure threshold and never
    /// registers a critical-component failure with the watchdog.
    Auth,
    /// Counts toward the threshold; the connection is retried.
    Retryable,
}

/// Classify a failed connect attempt. Protocol failures are retryable like
/// transient ones; only authentication failures are excluded from counting.
pub fn classify(failure: &ConnectFailure) -> FailureClass {
    match failure {
        ConnectFailure::Authentication { .. } => FailureClass::Auth,
        ConnectFailure::Protocol { .. } | ConnectFailure::Transient { .. } => {
            FailureClass::Retryable
        }
    }
}
