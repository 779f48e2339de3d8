//! World state abstraction
//!
//! The actor is the only writer; every commit is applied as one atomic batch
//! holding the transaction's write set and, if any records were produced,
//! its notification. Readers see either all of a transaction or none of it.

use crate::envelope::Notification;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

/// Pending writes of one transaction; `None` deletes the key
pub type WriteSet = BTreeMap<String, Option<Vec<u8>>>;

/// Everything one transaction persists
#[derive(Debug, Default)]
pub struct CommitBatch {
    /// State writes and deletes
    pub writes: WriteSet,
    /// Notification appended to the log
    pub notification: Option<Notification>,
}

/// Key-value world state plus the notification log
pub trait StateStore: Send + Sync {
    /// Read one key
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Keys starting with `prefix` in ascending order, strictly after `start_after`
    fn scan(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>>;

    /// Apply a batch atomically
    fn commit(&self, batch: &CommitBatch) -> Result<()>;

    /// Notifications with sequence greater than `sequence`, ascending
    fn notifications_after(&self, sequence: u64, limit: usize) -> Result<Vec<Notification>>;

    /// Highest notification sequence written, 0 when the log is empty
    fn last_sequence(&self) -> Result<u64>;
}

#[derive(Default)]
struct MemoryState {
    state: BTreeMap<String, Vec<u8>>,
    notifications: BTreeMap<u64, Notification>,
}

/// In-memory store for tests and embedded use
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read().state.get(key).cloned())
    }

    fn scan(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        let inner = self.inner.read();
        let lower = match start_after {
            Some(after) if after >= prefix => Bound::Excluded(after.to_string()),
            _ => Bound::Included(prefix.to_string()),
        };

        Ok(inner
            .state
            .range::<String, _>((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(limit)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn commit(&self, batch: &CommitBatch) -> Result<()> {
        let mut inner = self.inner.write();

        if let Some(notification) = &batch.notification {
            let expected = inner.notifications.keys().next_back().copied().unwrap_or(0) + 1;
            if notification.sequence != expected {
                return Err(Error::InvariantViolation(format!(
                    "notification sequence {} does not follow {}",
                    notification.sequence,
                    expected - 1
                )));
            }
            inner
                .notifications
                .insert(notification.sequence, notification.clone());
        }

        for (key, value) in &batch.writes {
            match value {
                Some(bytes) => {
                    inner.state.insert(key.clone(), bytes.clone());
                }
                None => {
                    inner.state.remove(key);
                }
            }
        }

        Ok(())
    }

    fn notifications_after(&self, sequence: u64, limit: usize) -> Result<Vec<Notification>> {
        let inner = self.inner.read();
        Ok(inner
            .notifications
            .range((Bound::Excluded(sequence), Bound::Unbounded))
            .take(limit)
            .map(|(_, n)| n.clone())
            .collect())
    }

    fn last_sequence(&self) -> Result<u64> {
        Ok(self
            .inner
            .read()
            .notifications
            .keys()
            .next_back()
            .copied()
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(store: &MemoryStore, key: &str, value: &str) {
        let mut batch = CommitBatch::default();
        batch
            .writes
            .insert(key.to_string(), Some(value.as_bytes().to_vec()));
        store.commit(&batch).unwrap();
    }

    fn notification(sequence: u64) -> Notification {
        Notification {
            sequence,
            transaction_id: format!("tx{}", sequence),
            event_count: 0,
            events: vec![],
        }
    }

    #[test]
    fn test_scan_respects_prefix_and_bookmark() {
        let store = MemoryStore::new();
        put(&store, "a/1", "x");
        put(&store, "b/1", "1");
        put(&store, "b/2", "2");
        put(&store, "b/3", "3");
        put(&store, "c/1", "y");

        let page = store.scan("b/", None, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[1].0, "b/2");

        let next = store.scan("b/", Some("b/2"), 2).unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].0, "b/3");

        assert!(store.scan("b/", Some("b/3"), 2).unwrap().is_empty());
    }

    #[test]
    fn test_delete_in_batch() {
        let store = MemoryStore::new();
        put(&store, "k", "v");
        let mut batch = CommitBatch::default();
        batch.writes.insert("k".to_string(), None);
        store.commit(&batch).unwrap();
        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn test_notification_log_is_gap_free() {
        let store = MemoryStore::new();
        for sequence in 1..=3 {
            let batch = CommitBatch {
                writes: WriteSet::new(),
                notification: Some(notification(sequence)),
            };
            store.commit(&batch).unwrap();
        }
        assert_eq!(store.last_sequence().unwrap(), 3);

        let after = store.notifications_after(1, 10).unwrap();
        assert_eq!(after.iter().map(|n| n.sequence).collect::<Vec<_>>(), vec![2, 3]);

        let gap = CommitBatch {
            writes: WriteSet::new(),
            notification: Some(notification(5)),
        };
        assert!(store.commit(&gap).is_err());
    }
}
