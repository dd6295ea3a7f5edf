//! Message store backed by `sled`
//!
//! Records are JSON-encoded [`StoredMessage`]s kept in one sled tree per
//! store name. Keys are zero-padded message ids so iteration yields records
//! in id order and the monotonic counter can be recovered from the last key
//! at open time.
//!
//! Mutations are serialized through a single mutex; the critical sections
//! only touch local storage, never the transport.

use std::cmp::Reverse;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use regex::Regex;
use sled::Tree;
use tracing::{debug, warn};

use super::message::{MessageId, MessageState, StoredMessage, TransportToken};
use super::{MessageStore, MessageStoreProvider, StoreError};

/// Width of the zero-padded id keys, enough for any u64.
const KEY_WIDTH: usize = 20;

fn record_key(id: MessageId) -> Vec<u8> {
    format!("{id:0width$}", width = KEY_WIDTH).into_bytes()
}

fn decode(value: &[u8]) -> Result<StoredMessage, StoreError> {
    Ok(serde_json::from_slice(value)?)
}

struct StoreInner {
    tree: Tree,
    next_id: MessageId,
}

impl StoreInner {
    fn put(&self, msg: &StoredMessage) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(msg)?;
        self.tree.insert(record_key(msg.id), encoded)?;
        Ok(())
    }

    fn remove(&self, id: MessageId) -> Result<(), StoreError> {
        self.tree.remove(record_key(id))?;
        Ok(())
    }

    fn get(&self, id: MessageId) -> Result<Option<StoredMessage>, StoreError> {
        match self.tree.get(record_key(id))? {
            Some(value) => Ok(Some(decode(&value)?)),
            None => Ok(None),
        }
    }

    /// Decode every record in id order.
    fn scan(&self) -> Result<Vec<StoredMessage>, StoreError> {
        let mut records = Vec::with_capacity(self.tree.len());
        for entry in self.tree.iter() {
            let (_, value) = entry?;
            records.push(decode(&value)?);
        }
        Ok(records)
    }
}

/// Capacity-bounded, sled-backed [`MessageStore`]
pub struct SledMessageStore {
    name: String,
    capacity: usize,
    inner: Mutex<StoreInner>,
}

impl SledMessageStore {
    /// Open the store over an existing sled tree. The id counter resumes
    /// after the highest id already present.
    pub fn open(name: impl Into<String>, tree: Tree, capacity: usize) -> Result<Self, StoreError> {
        let next_id = match tree.last()? {
            Some((_, value)) => decode(&value)?.id + 1,
            None => 1,
        };
        Ok(Self {
            name: name.into(),
            capacity,
            inner: Mutex::new(StoreInner { tree, next_id }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn locked(&self) -> MutexGuard<'_, StoreInner> {
        // A poisoned lock only means a panic mid-operation elsewhere; the
        // sled tree itself stays coherent, so recover the guard.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Eviction preference: already-delivered records go first, then dropped
    /// ones, then undelivered data, each group lowest-priority oldest first.
    fn eviction_rank(msg: &StoredMessage) -> u8 {
        match msg.state {
            MessageState::Confirmed => 0,
            MessageState::Dropped => 1,
            MessageState::Unpublished => 2,
            MessageState::InFlight => u8::MAX, // never a candidate
        }
    }

    /// Remove eligible victims until at most `limit` records remain.
    /// In-flight records are untouchable, so the store may overshoot.
    fn evict_to(inner: &StoreInner, store_name: &str, limit: usize) -> Result<(), StoreError> {
        let total = inner.tree.len();
        if total <= limit {
            return Ok(());
        }

        let mut candidates: Vec<StoredMessage> = inner
            .scan()?
            .into_iter()
            .filter(|m| m.state != MessageState::InFlight)
            .collect();
        candidates.sort_by_key(|m| {
            (
                Self::eviction_rank(m),
                Reverse(m.priority),
                m.created_at,
                m.id,
            )
        });

        let excess = total - limit;
        if candidates.len() < excess {
            warn!(
                store = store_name,
                total,
                limit,
                in_flight = total - candidates.len(),
                "store over capacity but only in-flight messages remain"
            );
        }
        for victim in candidates.into_iter().take(excess) {
            debug!(
                store = store_name,
                id = victim.id,
                priority = victim.priority,
                state = ?victim.state,
                "evicting message"
            );
            inner.remove(victim.id)?;
        }
        Ok(())
    }
}

impl MessageStore for SledMessageStore {
    fn store(
        &self,
        topic: &str,
        payload: Option<Vec<u8>>,
        qos: u8,
        retain: bool,
        priority: i32,
    ) -> Result<MessageId, StoreError> {
        if priority < 0 {
            return Err(StoreError::InvalidArgument(format!(
                "priority must be non-negative, got {priority}"
            )));
        }

        let mut inner = self.locked();
        let id = inner.next_id;
        inner.next_id += 1;

        let msg = StoredMessage {
            id,
            topic: topic.to_string(),
            payload,
            qos,
            retain,
            priority,
            created_at: Utc::now(),
            confirmed_at: None,
            state: MessageState::Unpublished,
            token: None,
        };
        inner.put(&msg)?;
        Self::evict_to(&inner, &self.name, self.capacity)?;

        debug!(store = %self.name, id, topic, priority, "stored message");
        Ok(id)
    }

    fn next_unpublished(&self) -> Result<Option<StoredMessage>, StoreError> {
        let inner = self.locked();
        Ok(inner
            .scan()?
            .into_iter()
            .filter(|m| m.state == MessageState::Unpublished)
            .min_by_key(|m| m.selection_key()))
    }

    fn mark_in_flight(&self, id: MessageId, token: TransportToken) -> Result<(), StoreError> {
        let inner = self.locked();
        let mut msg = inner.get(id)?.ok_or(StoreError::NotFound(id))?;
        if msg.state != MessageState::Unpublished {
            return Err(StoreError::InvalidState {
                id,
                expected: MessageState::Unpublished,
                actual: msg.state,
            });
        }
        msg.state = MessageState::InFlight;
        msg.token = Some(token);
        inner.put(&msg)
    }

    fn mark_confirmed(&self, token: &TransportToken) -> Result<Option<MessageId>, StoreError> {
        let inner = self.locked();
        let hit = inner
            .scan()?
            .into_iter()
            .find(|m| m.state == MessageState::InFlight && m.token.as_ref() == Some(token));
        match hit {
            Some(mut msg) => {
                msg.state = MessageState::Confirmed;
                msg.confirmed_at = Some(Utc::now());
                msg.token = None;
                inner.put(&msg)?;
                Ok(Some(msg.id))
            }
            None => Ok(None),
        }
    }

    fn drop_all_in_flight(&self) -> Result<usize, StoreError> {
        let inner = self.locked();
        let mut dropped = 0;
        for mut msg in inner.scan()? {
            if msg.state == MessageState::InFlight {
                msg.state = MessageState::Dropped;
                msg.token = None;
                inner.put(&msg)?;
                dropped += 1;
            }
        }
        Ok(dropped)
    }

    fn republish_all_in_flight(&self) -> Result<usize, StoreError> {
        let inner = self.locked();
        let mut requeued = 0;
        for mut msg in inner.scan()? {
            if msg.state == MessageState::InFlight {
                msg.state = MessageState::Unpublished;
                msg.token = None;
                inner.put(&msg)?;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    fn all_in_flight(&self) -> Result<Vec<StoredMessage>, StoreError> {
        let inner = self.locked();
        let mut records: Vec<StoredMessage> = inner
            .scan()?
            .into_iter()
            .filter(|m| m.state == MessageState::InFlight)
            .collect();
        records.sort_by_key(|m| m.selection_key());
        Ok(records)
    }

    fn query(&self, topic_pattern: &str, state: MessageState) -> Result<Vec<MessageId>, StoreError> {
        let pattern = Regex::new(topic_pattern)?;
        let inner = self.locked();
        Ok(inner
            .scan()?
            .into_iter()
            .filter(|m| m.state == state && pattern.is_match(&m.topic))
            .map(|m| m.id)
            .collect())
    }

    fn message(&self, id: MessageId) -> Result<Option<StoredMessage>, StoreError> {
        self.locked().get(id)
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.locked().tree.len())
    }

    fn housekeep(&self, purge_age: Duration, max_records: usize) -> Result<(), StoreError> {
        let inner = self.locked();
        let cutoff = Utc::now()
            - chrono::Duration::from_std(purge_age)
                .map_err(|e| StoreError::InvalidArgument(format!("purge age out of range: {e}")))?;

        let mut purged = 0;
        for msg in inner.scan()? {
            let settled = matches!(msg.state, MessageState::Confirmed | MessageState::Dropped);
            let reference = msg.confirmed_at.unwrap_or(msg.created_at);
            if settled && reference < cutoff {
                inner.remove(msg.id)?;
                purged += 1;
            }
        }

        Self::evict_to(&inner, &self.name, max_records)?;
        if purged > 0 {
            debug!(store = %self.name, purged, remaining = inner.tree.len(), "housekeeping pass");
        }
        Ok(())
    }
}

/// [`MessageStoreProvider`] that maps store names onto trees of one sled db.
pub struct SledStoreProvider {
    db: sled::Db,
}

impl SledStoreProvider {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        Ok(Self {
            db: sled::open(path)?,
        })
    }
}

impl MessageStoreProvider for SledStoreProvider {
    fn open_message_store(
        &self,
        name: &str,
        capacity: usize,
    ) -> Result<Arc<dyn MessageStore>, StoreError> {
        let tree = self.db.open_tree(name)?;
        Ok(Arc::new(SledMessageStore::open(name, tree, capacity)?))
    }
}
