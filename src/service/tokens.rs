//! In-flight token map
//!
//! Maps transport tokens to stored message ids for the lifetime of the
//! process. The map is rebuilt from the store's in-flight records on a
//! resumed session and cleared outright on a new one; the token map, not
//! send order, is the source of truth for resolving confirmations.

use std::collections::HashMap;

use crate::store::{MessageId, StoredMessage, TransportToken};

#[derive(Debug, Default)]
pub struct TokenMap {
    entries: HashMap<TransportToken, MessageId>,
}

impl TokenMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: TransportToken, id: MessageId) {
        self.entries.insert(token, id);
    }

    pub fn remove(&mut self, token: &TransportToken) -> Option<MessageId> {
        self.entries.remove(token)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace the map contents with the store's in-flight records.
    /// Records without a token are skipped; that would be a store-level
    /// invariant violation, not something the map can repair.
    pub fn rebuild(&mut self, records: &[StoredMessage]) {
        self.entries.clear();
        for record in records {
            if let Some(token) = &record.token {
                self.entries.insert(token.clone(), record.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MessageState;
    use chrono::Utc;

    fn in_flight(id: MessageId, token: TransportToken) -> StoredMessage {
        StoredMessage {
            id,
            topic: "t".to_string(),
            payload: None,
            qos: 1,
            retain: false,
            priority: 0,
            created_at: Utc::now(),
            confirmed_at: None,
            state: MessageState::InFlight,
            token: Some(token),
        }
    }

    #[test]
    fn test_insert_remove() {
        let mut map = TokenMap::new();
        let token = TransportToken::new(1, "s");
        map.insert(token.clone(), 42);

        assert_eq!(map.remove(&token), Some(42));
        assert_eq!(map.remove(&token), None);
        assert!(map.is_empty());
    }

    #[test]
    fn test_rebuild_replaces_contents() {
        let mut map = TokenMap::new();
        map.insert(TransportToken::new(99, "old"), 1);

        let records = vec![
            in_flight(7, TransportToken::new(1, "new")),
            in_flight(8, TransportToken::new(2, "new")),
        ];
        map.rebuild(&records);

        assert_eq!(map.len(), 2);
        assert_eq!(map.remove(&TransportToken::new(99, "old")), None);
        assert_eq!(map.remove(&TransportToken::new(7, "new")), None);
        assert_eq!(map.remove(&TransportToken::new(1, "new")), Some(7));
    }
}
