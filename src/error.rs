//! Error types for the store-and-forward engine
//!
//! Failures that threaten durability surface to the caller; expected
//! conditions of an unreliable network (connect and send failures, stale
//! confirmations) are absorbed inside the engine and retried on the next
//! scheduling cycle. Nothing in this crate terminates the process.

use thiserror::Error;

use crate::store::StoreError;

/// Errors returned by the public `DataService` surface
#[derive(Debug, Error)]
pub enum DataServiceError {
    /// Rejected before storage: negative priority or an invalid QoS level
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Rejected before storage: payload exceeds the configured maximum
    #[error("payload of {size} bytes exceeds maximum of {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Persistence failure; the durability guarantee cannot be met, so the
    /// caller must know the message was not accepted
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl DataServiceError {
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

/// Result type for the public service surface
pub type DataServiceResult<T> = Result<T, DataServiceError>;
