//! Per-transaction context
//!
//! A [`TxContext`] is created by the actor for exactly one transaction. It
//! carries the caller identity and transaction timestamp, buffers writes
//! in an overlay over committed state (reads see the transaction's own
//! writes), and owns the event envelope. Dropping the context discards both.

use crate::documents::LedgerDocument;
use crate::envelope::Envelope;
use crate::store::{StateStore, WriteSet};
use crate::types::{format_timestamp, ClientIdentity};
use crate::{Error, Result};
use chrono::{DateTime, Utc};

/// Execution context of one ledger transaction
pub struct TxContext<'a> {
    store: &'a dyn StateStore,
    identity: &'a ClientIdentity,
    transaction_id: String,
    timestamp: DateTime<Utc>,
    timestamp_string: String,
    writes: WriteSet,
    envelope: Envelope,
}

impl<'a> TxContext<'a> {
    /// New context reading committed state from `store`
    pub fn new(
        store: &'a dyn StateStore,
        identity: &'a ClientIdentity,
        transaction_id: String,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            identity,
            transaction_id,
            timestamp,
            timestamp_string: format_timestamp(timestamp),
            writes: WriteSet::new(),
            envelope: Envelope::new(),
        }
    }

    /// Submitter of the transaction
    pub fn identity(&self) -> &'a ClientIdentity {
        self.identity
    }

    /// Transaction id
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// Transaction timestamp
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Transaction timestamp in canonical form
    pub fn timestamp_str(&self) -> &str {
        &self.timestamp_string
    }

    /// Read raw bytes, seeing this transaction's pending writes
    pub fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.writes.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => self.store.get(key),
        }
    }

    /// Read and decode a typed document
    pub fn get<T: LedgerDocument>(&self, key: &str) -> Result<Option<T>> {
        self.get_raw(key)?
            .map(|bytes| T::from_json(&bytes))
            .transpose()
    }

    /// Read a typed document that must exist
    pub fn require<T: LedgerDocument>(&self, key: &str, what: impl FnOnce() -> String) -> Result<T> {
        self.get(key)?.ok_or_else(|| Error::NotFound(what()))
    }

    /// Buffer a document write; event-emitting kinds also add an envelope record
    pub fn put<T: LedgerDocument>(&mut self, document: &T) -> Result<()> {
        let key = document.key();
        let value = document.to_value()?;
        let bytes = serde_json::to_vec(&value)?;

        if T::DOC_TYPE.emits_event() {
            self.envelope.add(
                &self.transaction_id,
                key.clone(),
                T::DOC_TYPE,
                &self.timestamp_string,
                value,
            );
        }

        self.writes.insert(key, Some(bytes));
        Ok(())
    }

    /// Buffer a delete
    pub fn delete(&mut self, key: &str) {
        self.writes.insert(key.to_string(), None);
    }

    /// Keys under `prefix` after `start_after`, merged with pending writes
    pub fn scan(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        let in_range = |key: &str| key.starts_with(prefix) && start_after.map_or(true, |a| key > a);

        let pending_deletes = self
            .writes
            .iter()
            .filter(|(k, v)| v.is_none() && in_range(k.as_str()))
            .count();

        let mut merged: std::collections::BTreeMap<String, Vec<u8>> = self
            .store
            .scan(prefix, start_after, limit.saturating_add(pending_deletes))?
            .into_iter()
            .collect();

        for (key, value) in self.writes.iter().filter(|(k, _)| in_range(k.as_str())) {
            match value {
                Some(bytes) => {
                    merged.insert(key.clone(), bytes.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        Ok(merged.into_iter().take(limit).collect())
    }

    /// Decode every document of type `T` under `prefix`
    pub fn scan_all<T: LedgerDocument>(&self, prefix: &str) -> Result<Vec<T>> {
        self.scan(prefix, None, usize::MAX)?
            .into_iter()
            .map(|(_, bytes)| T::from_json(&bytes))
            .collect()
    }

    /// Records added so far
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Consume into the write set and envelope for commit
    pub fn into_parts(self) -> (WriteSet, Envelope) {
        (self.writes, self.envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::{Coin, SystemTotals, UserAccount};
    use crate::store::{CommitBatch, MemoryStore};
    use crate::types::AccountId;

    fn committed(store: &MemoryStore, coin: &Coin) {
        let mut batch = CommitBatch::default();
        batch
            .writes
            .insert(coin.key(), Some(coin.to_json().unwrap()));
        store.commit(&batch).unwrap();
    }

    #[test]
    fn test_reads_see_pending_writes() {
        let store = MemoryStore::new();
        let identity = ClientIdentity::new("alice", "IssuerMSP");
        let mut ctx = TxContext::new(&store, &identity, "tx".into(), Utc::now());

        let coin = Coin::new(AccountId::new("alice"), 5, None);
        ctx.put(&coin).unwrap();
        assert_eq!(ctx.get::<Coin>(&coin.key()).unwrap(), Some(coin.clone()));
        assert!(store.get(&coin.key()).unwrap().is_none());

        ctx.delete(&coin.key());
        assert!(ctx.get::<Coin>(&coin.key()).unwrap().is_none());
    }

    #[test]
    fn test_only_event_kinds_reach_envelope() {
        let store = MemoryStore::new();
        let identity = ClientIdentity::new("alice", "IssuerMSP");
        let mut ctx = TxContext::new(&store, &identity, "tx".into(), Utc::now());

        ctx.put(&Coin::new(AccountId::new("alice"), 5, None)).unwrap();
        ctx.put(&SystemTotals::default()).unwrap();
        assert!(ctx.envelope().is_empty());

        let account = UserAccount::new(AccountId::new("alice"), "alice", "user", ctx.timestamp_str());
        ctx.put(&account).unwrap();
        assert_eq!(ctx.envelope().len(), 1);
        assert_eq!(ctx.envelope().records()[0].event_type, "user-info");
        assert_eq!(ctx.envelope().records()[0].payload["docType"], "user-info");
    }

    #[test]
    fn test_scan_merges_overlay() {
        let store = MemoryStore::new();
        let alice = AccountId::new("alice");
        let old = Coin::new(alice.clone(), 1, chrono::NaiveDate::from_ymd_opt(2022, 1, 1));
        let kept = Coin::new(alice.clone(), 2, chrono::NaiveDate::from_ymd_opt(2022, 2, 1));
        committed(&store, &old);
        committed(&store, &kept);

        let identity = ClientIdentity::new("alice", "IssuerMSP");
        let mut ctx = TxContext::new(&store, &identity, "tx".into(), Utc::now());
        ctx.delete(&old.key());
        ctx.put(&Coin::new(alice.clone(), 3, None)).unwrap();

        let coins: Vec<Coin> = ctx.scan_all(&Coin::owner_prefix(&alice)).unwrap();
        let amounts: Vec<u64> = coins.iter().map(|c| c.amount).collect();
        assert_eq!(amounts, vec![3, 2]);
    }

    #[test]
    fn test_require_reports_missing() {
        let store = MemoryStore::new();
        let identity = ClientIdentity::new("alice", "IssuerMSP");
        let ctx = TxContext::new(&store, &identity, "tx".into(), Utc::now());
        let err = ctx
            .require::<UserAccount>("nope", || "user alice".to_string())
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
