use crate::errors::Result;
use async_trait::async_trait;
use ledger_core::{Document, Ledger};

/// Reads authoritative documents for reconciliation
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// Committed document at the raw (unescaped) ledger key
    async fn fetch_document(&self, key: &str) -> Result<Option<Document>>;
}

#[async_trait]
impl DocumentFetcher for Ledger {
    async fn fetch_document(&self, key: &str) -> Result<Option<Document>> {
        Ok(self.get_document(key)?)
    }
}
