//! Transaction event envelope
//!
//! Records accumulate in an [`Envelope`] owned by one transaction context and
//! are sealed into at most one [`Notification`] when the transaction commits.
//! Nothing outlives the transaction that produced it.

use crate::documents::DocType;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One side-effect record produced by a document write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// World state key of the written document
    pub key: String,
    /// Unique record id (`<txId>-<index>`)
    pub id: String,
    /// docType of the written document
    #[serde(rename = "type")]
    pub event_type: String,
    /// Transaction timestamp
    pub timestamp: String,
    /// Full document JSON including docType
    pub payload: Value,
}

/// Notification flushed once per transaction that produced records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Position in the ledger's notification log, gap-free from 1
    #[serde(default)]
    pub sequence: u64,
    /// Id of the committing transaction
    pub transaction_id: String,
    /// Number of records
    pub event_count: usize,
    /// Records in write order
    pub events: Vec<EventRecord>,
}

impl Notification {
    /// Encode for the wire
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from the wire
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Per-transaction accumulator of event records
#[derive(Debug, Default)]
pub struct Envelope {
    records: Vec<EventRecord>,
}

impl Envelope {
    /// Empty envelope
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record for a document write
    pub fn add(
        &mut self,
        transaction_id: &str,
        key: String,
        doc_type: DocType,
        timestamp: &str,
        payload: Value,
    ) {
        let id = format!("{}-{}", transaction_id, self.records.len());
        self.records.push(EventRecord {
            key,
            id,
            event_type: doc_type.as_str().to_string(),
            timestamp: timestamp.to_string(),
            payload,
        });
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// No records were added
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records added so far
    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Flush into a notification; `None` when nothing was recorded
    pub fn seal(self, transaction_id: &str, sequence: u64) -> Option<Notification> {
        if self.records.is_empty() {
            return None;
        }
        Some(Notification {
            sequence,
            transaction_id: transaction_id.to_string(),
            event_count: self.records.len(),
            events: self.records,
        })
    }
}
