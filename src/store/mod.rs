//! Durable, capacity- and age-bounded message store
//!
//! The store is the single shared mutable resource of the engine. It knows
//! nothing about the transport or scheduling; it only persists messages and
//! tracks their delivery lifecycle. All mutating operations are serialized
//! relative to each other, and every read observes a consistent snapshot.

use std::time::Duration;

use thiserror::Error;

pub mod message;
pub mod sled_store;

pub use message::{MessageId, MessageState, StoredMessage, TransportToken};
pub use sled_store::{SledMessageStore, SledStoreProvider};

/// Persistence-layer errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("message {id} is {actual:?}, expected {expected:?}")]
    InvalidState {
        id: MessageId,
        expected: MessageState,
        actual: MessageState,
    },

    #[error("no such message: {0}")]
    NotFound(MessageId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid topic pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Durable collection of messages tagged with lifecycle state.
///
/// Implementations must serialize mutations (single-writer semantics); the
/// contract here is deliberately synchronous since every operation is a
/// short critical section over local storage, never transport I/O.
pub trait MessageStore: Send + Sync {
    /// Persist a new message and return its store-assigned id.
    ///
    /// Never rejects a write for capacity reasons: when the store is full it
    /// evicts the lowest-priority, oldest eligible victims instead. Fails
    /// with [`StoreError::InvalidArgument`] for a negative priority.
    fn store(
        &self,
        topic: &str,
        payload: Option<Vec<u8>>,
        qos: u8,
        retain: bool,
        priority: i32,
    ) -> Result<MessageId, StoreError>;

    /// Highest-priority, oldest unpublished message, if any.
    fn next_unpublished(&self) -> Result<Option<StoredMessage>, StoreError>;

    /// Transition `Unpublished -> InFlight`, recording the transport token.
    fn mark_in_flight(&self, id: MessageId, token: TransportToken) -> Result<(), StoreError>;

    /// Resolve a confirmation token to its message and transition it to
    /// `Confirmed`. Returns `None` when no in-flight message matches the
    /// token; duplicate or late confirmations across reconnects make this a
    /// recoverable condition, logged by the caller.
    fn mark_confirmed(&self, token: &TransportToken) -> Result<Option<MessageId>, StoreError>;

    /// Bulk-transition every in-flight message to `Dropped`. Used when a
    /// brand-new transport session invalidates previous in-flight state.
    fn drop_all_in_flight(&self) -> Result<usize, StoreError>;

    /// Bulk-transition every in-flight message back to `Unpublished` so the
    /// new session retries them.
    fn republish_all_in_flight(&self) -> Result<usize, StoreError>;

    /// All in-flight records with their tokens, in selection order. Used to
    /// rebuild the orchestrator's token map on a resumed session.
    fn all_in_flight(&self) -> Result<Vec<StoredMessage>, StoreError>;

    /// Ids of messages whose topic matches the regular expression and whose
    /// state equals `state`, ordered by id.
    fn query(&self, topic_pattern: &str, state: MessageState) -> Result<Vec<MessageId>, StoreError>;

    /// Point lookup, mainly for introspection and tests.
    fn message(&self, id: MessageId) -> Result<Option<StoredMessage>, StoreError>;

    /// Number of records currently in the store.
    fn count(&self) -> Result<usize, StoreError>;

    /// Delete confirmed/dropped records older than `purge_age` and trim the
    /// total record count down to `max_records`, keeping newest and
    /// highest-priority records first. In-flight records are never removed.
    fn housekeep(&self, purge_age: Duration, max_records: usize) -> Result<(), StoreError>;
}

/// Narrow factory interface over the physical persistence engine.
pub trait MessageStoreProvider: Send + Sync {
    fn open_message_store(
        &self,
        name: &str,
        capacity: usize,
    ) -> Result<std::sync::Arc<dyn MessageStore>, StoreError>;
}
