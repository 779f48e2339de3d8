//! Main ledger orchestration layer
//!
//! Ties the state store, contract and actor together into a high-level
//! API. Every write goes through the actor; committed notifications are
//! both persisted and broadcast to live subscribers.
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{ClientIdentity, Config, Ledger};
//!
//! #[tokio::main]
//! async fn main() -> ledger_core::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!     let alice = ClientIdentity::new("alice", "IssuerMSP");
//!
//!     ledger.create_user_account(&alice).await?;
//!     ledger.mint(&alice, 100, 180).await?;
//!     Ok(())
//! }
//! ```

use crate::{
    actor::{spawn_ledger_actor, LedgerHandle, TxReceipt},
    contract::{
        BurnOutcome, Contract, Operation, OperationOutput, Query, QueryOutput, SupplySummary,
        UsageSummary,
    },
    documents::{Coin, CoinTransferEvent, Document, Nft, Proposal, ProposalVote, UserAccount},
    envelope::Notification,
    metrics::Metrics,
    store::{MemoryStore, StateStore},
    types::{AccountId, ClientIdentity},
    Config, Error, Result, Storage,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Main ledger interface
#[derive(Clone)]
pub struct Ledger {
    /// Actor handle for transactions and queries
    handle: LedgerHandle,

    /// Committed state (document reads, notification replay)
    store: Arc<dyn StateStore>,

    /// Live notification fan-out
    notifications: broadcast::Sender<Notification>,

    metrics: Metrics,

    config: Config,
}

impl Ledger {
    /// Open a RocksDB-backed ledger under `config.data_dir`
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let storage = Arc::new(Storage::open(&config)?);
        Self::with_store(storage, config)
    }

    /// Ledger over an in-memory store
    pub fn in_memory(config: Config) -> Result<Self> {
        Self::with_store(Arc::new(MemoryStore::new()), config)
    }

    /// Ledger over any state store; must be called within a Tokio runtime
    pub fn with_store(store: Arc<dyn StateStore>, config: Config) -> Result<Self> {
        let metrics = Metrics::new().map_err(|e| Error::Other(e.to_string()))?;
        let (notifications, _) = broadcast::channel(config.notification_buffer.max(1));

        let handle = spawn_ledger_actor(
            store.clone(),
            Contract::new(&config),
            metrics.clone(),
            notifications.clone(),
            config.mailbox_capacity,
        )?;

        tracing::info!(
            service = %config.service_name,
            last_sequence = store.last_sequence()?,
            "Ledger started"
        );

        Ok(Self {
            handle,
            store,
            notifications,
            metrics,
            config,
        })
    }

    /// Submit an operation with the current time
    pub async fn submit(&self, identity: &ClientIdentity, operation: Operation) -> Result<TxReceipt> {
        self.handle.submit(identity.clone(), operation, None).await
    }

    /// Submit an operation with a proposed timestamp
    ///
    /// The actor bumps the timestamp forward if it does not exceed the
    /// previous transaction's.
    pub async fn submit_at(
        &self,
        identity: &ClientIdentity,
        operation: Operation,
        timestamp: DateTime<Utc>,
    ) -> Result<TxReceipt> {
        self.handle
            .submit(identity.clone(), operation, Some(timestamp))
            .await
    }

    /// Evaluate a read-only query
    pub async fn evaluate(&self, identity: &ClientIdentity, query: Query) -> Result<QueryOutput> {
        self.handle.evaluate(identity.clone(), query).await
    }

    /// Create the caller's account
    pub async fn create_user_account(&self, identity: &ClientIdentity) -> Result<UserAccount> {
        match self.submit(identity, Operation::CreateUserAccount).await?.output {
            OperationOutput::Account(account) => Ok(account),
            other => Err(unexpected("account", &other)),
        }
    }

    /// Mint to the caller
    pub async fn mint(&self, identity: &ClientIdentity, amount: i64, days: i64) -> Result<Coin> {
        match self.submit(identity, Operation::Mint { amount, days }).await?.output {
            OperationOutput::Coin(coin) => Ok(coin),
            other => Err(unexpected("coin", &other)),
        }
    }

    /// Transfer from the caller
    pub async fn transfer(
        &self,
        identity: &ClientIdentity,
        to: &AccountId,
        amount: i64,
    ) -> Result<CoinTransferEvent> {
        let operation = Operation::Transfer {
            to: to.clone(),
            amount,
        };
        match self.submit(identity, operation).await?.output {
            OperationOutput::Transfer(event) => Ok(event),
            other => Err(unexpected("transfer", &other)),
        }
    }

    /// Transfer on behalf of `from`
    pub async fn transfer_from(
        &self,
        identity: &ClientIdentity,
        from: &AccountId,
        to: &AccountId,
        amount: i64,
    ) -> Result<CoinTransferEvent> {
        let operation = Operation::TransferFrom {
            from: from.clone(),
            to: to.clone(),
            amount,
        };
        match self.submit(identity, operation).await?.output {
            OperationOutput::Transfer(event) => Ok(event),
            other => Err(unexpected("transfer", &other)),
        }
    }

    /// Burn an expired bucket
    pub async fn burn_expired(
        &self,
        identity: &ClientIdentity,
        owner: &AccountId,
        expiration_date: &str,
    ) -> Result<BurnOutcome> {
        let operation = Operation::BurnExpired {
            owner: owner.clone(),
            expiration_date: expiration_date.to_string(),
        };
        match self.submit(identity, operation).await?.output {
            OperationOutput::Burn(outcome) => Ok(outcome),
            other => Err(unexpected("burn", &other)),
        }
    }

    /// Balance of an account
    pub async fn balance_of(&self, identity: &ClientIdentity, owner: &AccountId) -> Result<u64> {
        let query = Query::BalanceOf {
            owner: owner.clone(),
        };
        match self.evaluate(identity, query).await? {
            QueryOutput::Balance(balance) => Ok(balance),
            other => Err(unexpected("balance", &other)),
        }
    }

    /// Minted supply over an optional date range
    pub async fn total_supply(
        &self,
        identity: &ClientIdentity,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<SupplySummary> {
        let query = Query::TotalSupply {
            start_date: start_date.map(String::from),
            end_date: end_date.map(String::from),
        };
        match self.evaluate(identity, query).await? {
            QueryOutput::Supply(summary) => Ok(summary),
            other => Err(unexpected("supply", &other)),
        }
    }

    /// Minted and used amounts over an optional date range
    pub async fn summary(
        &self,
        identity: &ClientIdentity,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<UsageSummary> {
        let query = Query::Summary {
            start_date: start_date.map(String::from),
            end_date: end_date.map(String::from),
        };
        match self.evaluate(identity, query).await? {
            QueryOutput::Usage(summary) => Ok(summary),
            other => Err(unexpected("usage", &other)),
        }
    }

    /// Mint an NFT to the caller
    pub async fn mint_nft(&self, identity: &ClientIdentity, metadata_json: &str) -> Result<Nft> {
        let operation = Operation::MintNft {
            metadata_json: metadata_json.to_string(),
        };
        match self.submit(identity, operation).await?.output {
            OperationOutput::Nft(nft) => Ok(nft),
            other => Err(unexpected("nft", &other)),
        }
    }

    /// Move an NFT
    pub async fn transfer_nft(
        &self,
        identity: &ClientIdentity,
        from: Option<&AccountId>,
        to: &AccountId,
        nft_id: &str,
    ) -> Result<Nft> {
        let operation = Operation::TransferNft {
            from: from.cloned(),
            to: to.clone(),
            nft_id: nft_id.to_string(),
        };
        match self.submit(identity, operation).await?.output {
            OperationOutput::Nft(nft) => Ok(nft),
            other => Err(unexpected("nft", &other)),
        }
    }

    /// Open a proposal
    pub async fn create_proposal(&self, identity: &ClientIdentity, proposal_json: &str) -> Result<Proposal> {
        let operation = Operation::CreateProposal {
            proposal_json: proposal_json.to_string(),
        };
        match self.submit(identity, operation).await?.output {
            OperationOutput::Proposal(proposal) => Ok(proposal),
            other => Err(unexpected("proposal", &other)),
        }
    }

    /// Vote with a governance token
    pub async fn vote(
        &self,
        identity: &ClientIdentity,
        proposal_id: &str,
        token_id: &str,
        support: bool,
    ) -> Result<ProposalVote> {
        let operation = Operation::Vote {
            proposal_id: proposal_id.to_string(),
            token_id: token_id.to_string(),
            support,
        };
        match self.submit(identity, operation).await?.output {
            OperationOutput::Vote(vote) => Ok(vote),
            other => Err(unexpected("vote", &other)),
        }
    }

    /// Committed document at `key`, if any
    pub fn get_document(&self, key: &str) -> Result<Option<Document>> {
        self.store
            .get(key)?
            .map(|bytes| Document::from_json(&bytes))
            .transpose()
    }

    /// Live notifications committed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Persisted notifications with sequence greater than `sequence`
    pub fn notifications_after(&self, sequence: u64, limit: usize) -> Result<Vec<Notification>> {
        self.store.notifications_after(sequence, limit)
    }

    /// Sequence of the newest notification
    pub fn last_sequence(&self) -> Result<u64> {
        self.store.last_sequence()
    }

    /// Metrics of this ledger
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop the actor; pending messages already in the mailbox are processed first
    pub async fn shutdown(&self) -> Result<()> {
        self.handle.shutdown().await
    }
}

fn unexpected(expected: &str, found: &impl std::fmt::Debug) -> Error {
    Error::Other(format!("expected {} output, got {:?}", expected, found))
}
