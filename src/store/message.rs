//! Queued message model shared by the store and the orchestrator
//!
//! A [`StoredMessage`] is one application message accepted by `publish` and
//! tracked through its delivery lifecycle. Records are serialized with serde
//! into the persistence backend, so every field here is part of the on-disk
//! format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned monotonic message identifier. Never reused.
pub type MessageId = u64;

/// Delivery lifecycle of a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageState {
    /// Accepted and persisted, not yet handed to the transport
    Unpublished,
    /// Handed to the transport, waiting for a delivery confirmation
    InFlight,
    /// Confirmed delivered; retained until housekeeping purges it
    Confirmed,
    /// In-flight state invalidated by a new transport session
    Dropped,
}

/// Identifies one in-flight publish attempt at the transport level.
///
/// Equality is structural: the same `(message_id, session_id)` pair names the
/// same attempt regardless of where the token was produced. Used as the key
/// of the orchestrator's in-flight map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportToken {
    /// Transport-level message id, unique within a session
    pub message_id: u32,
    /// Transport session the attempt belongs to
    pub session_id: String,
}

impl TransportToken {
    pub fn new(message_id: u32, session_id: impl Into<String>) -> Self {
        Self {
            message_id,
            session_id: session_id.into(),
        }
    }
}

impl std::fmt::Display for TransportToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.session_id, self.message_id)
    }
}

/// One queued application message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Store-assigned identifier, immutable once assigned
    pub id: MessageId,
    /// Destination topic name
    pub topic: String,
    /// Message body; an absent payload is a valid message
    pub payload: Option<Vec<u8>>,
    /// Transport quality-of-service level (0, 1 or 2)
    pub qos: u8,
    /// Transport-level retained-flag request
    pub retain: bool,
    /// Lower numeric value = higher delivery priority. Non-negative.
    pub priority: i32,
    /// Set at store time, immutable
    pub created_at: DateTime<Utc>,
    /// Set when the message transitions to [`MessageState::Confirmed`]
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Current lifecycle state
    pub state: MessageState,
    /// Present iff `state == InFlight`
    pub token: Option<TransportToken>,
}

impl StoredMessage {
    /// Total selection order: highest priority (numerically smallest) first,
    /// then oldest first, with the id as a deterministic tie-breaker.
    pub fn selection_key(&self) -> (i32, DateTime<Utc>, MessageId) {
        (self.priority, self.created_at, self.id)
    }

    /// Eviction order: lowest priority (numerically greatest) first, then
    /// oldest first. In-flight messages are never eviction candidates.
    pub fn eviction_key(&self) -> (std::cmp::Reverse<i32>, DateTime<Utc>, MessageId) {
        (std::cmp::Reverse(self.priority), self.created_at, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(id: MessageId, priority: i32, ts_secs: i64) -> StoredMessage {
        StoredMessage {
            id,
            topic: "telemetry/test".to_string(),
            payload: Some(vec![1, 2, 3]),
            qos: 1,
            retain: false,
            priority,
            created_at: Utc.timestamp_opt(ts_secs, 0).unwrap(),
            confirmed_at: None,
            state: MessageState::Unpublished,
            token: None,
        }
    }

    #[test]
    fn test_selection_order_prefers_priority_then_age() {
        let mut msgs = vec![message(1, 5, 100), message(2, 1, 200), message(3, 1, 150)];
        msgs.sort_by_key(|m| m.selection_key());

        let ids: Vec<_> = msgs.iter().map(|m| m.id).collect();
        // Priority 1 beats priority 5; among equal priorities the older wins
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_eviction_order_prefers_lowest_priority_oldest() {
        let mut msgs = vec![message(1, 0, 100), message(2, 9, 300), message(3, 9, 200)];
        msgs.sort_by_key(|m| m.eviction_key());

        let ids: Vec<_> = msgs.iter().map(|m| m.id).collect();
        // Priority 9 evicted before priority 0, oldest of the 9s first
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_token_structural_equality() {
        let a = TransportToken::new(7, "session-a");
        let b = TransportToken::new(7, "session-a");
        let c = TransportToken::new(7, "session-b");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_record_round_trips_through_json() {
        let msg = message(42, 3, 1000);
        let encoded = serde_json::to_vec(&msg).unwrap();
        let decoded: StoredMessage = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }
}
