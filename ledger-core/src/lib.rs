//! Coin Ledger Core
//!
//! Coin ledger with expiring buckets, NFTs and token-weighted governance.
//! Every committed transaction yields at most one notification carrying the
//! event-emitting documents it wrote.
//!
//! # Architecture
//!
//! - **Single Writer**: One actor task executes and commits every transaction
//! - **Write-set overlay**: Contract operations stage writes in a [`TxContext`];
//!   a failed operation discards them together with its event records
//! - **Notification log**: Notifications are stored atomically with the state
//!   writes under a gap-free sequence, so consumers can resume after a restart
//!
//! # Invariants
//!
//! - An account balance equals the sum of its unburned coin buckets
//! - Total supply equals the sum of all balances; active supply the sum of active balances
//! - Transaction timestamps are strictly increasing
//! - A failed operation emits no notification

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod actor;
pub mod config;
pub mod context;
pub mod contract;
pub mod documents;
pub mod envelope;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod storage;
pub mod store;
pub mod types;

// Re-exports
pub use actor::TxReceipt;
pub use config::Config;
pub use context::TxContext;
pub use contract::{BurnOutcome, Operation, OperationOutput, Query, QueryOutput, SupplySummary, UsageSummary};
pub use documents::{
    Coin, CoinTransferEvent, DocType, Document, GovernanceToken, LedgerDocument, Nft,
    NftTransferEvent, Proposal, ProposalStatus, ProposalVote, SystemTotals, UserAccount,
};
pub use envelope::{EventRecord, Notification};
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use metrics::Metrics;
pub use storage::Storage;
pub use store::{MemoryStore, StateStore};
pub use types::{AccountId, ClientIdentity, DateRange, SYSTEM_ACCOUNT};
