//! Ledger contract
//!
//! Transactional operations over ledger documents. Every operation takes the
//! transaction's [`TxContext`] explicitly; state changes and event records go
//! through it and become visible only if the actor commits the transaction.
//!
//! # Invariants
//!
//! - `balance == Σ amount of the account's unburned coin buckets`
//! - `totalSupply == Σ balances`, `totalActiveSupply == Σ balances of active accounts`
//! - No operation drives a balance, supply or bucket amount below zero

mod account;
mod coin;
mod governance;
mod nft;
mod query;

pub use query::{SupplySummary, UsageSummary};

use crate::context::TxContext;
use crate::documents::{
    Coin, CoinTransferEvent, Document, GovernanceToken, Nft, Proposal, ProposalVote, SystemTotals,
    UserAccount,
};
use crate::types::{AccountId, DateRange};
use crate::{Config, Error, Result};
use serde::{Deserialize, Serialize};

/// State-changing operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "function", rename_all = "PascalCase")]
pub enum Operation {
    /// Create the supply totals document
    Initialize,
    /// Create the caller's account
    CreateUserAccount,
    /// Set the caller's active flag
    SetActive {
        /// New value
        active: bool,
    },
    /// Mint coins to the caller
    Mint {
        /// Amount, must be positive
        amount: i64,
        /// Days until expiration, 0 for non-expiring
        days: i64,
    },
    /// Transfer from the caller
    Transfer {
        /// Destination
        to: AccountId,
        /// Amount, must be positive
        amount: i64,
    },
    /// Transfer on behalf of `from`
    TransferFrom {
        /// Source
        from: AccountId,
        /// Destination
        to: AccountId,
        /// Amount, must be positive
        amount: i64,
    },
    /// Burn the bucket of `owner` expiring on `expiration_date`
    BurnExpired {
        /// Bucket owner
        owner: AccountId,
        /// `YYYY-MM-DD`
        expiration_date: String,
    },
    /// Mint an NFT to the caller
    #[serde(rename = "MintNFT")]
    MintNft {
        /// JSON object with at least a `name`
        metadata_json: String,
    },
    /// Move an NFT; an empty `from` means the caller
    #[serde(rename = "TransferNFT")]
    TransferNft {
        /// Current owner
        from: Option<AccountId>,
        /// New owner
        to: AccountId,
        /// Token id
        nft_id: String,
    },
    /// Retire an NFT
    #[serde(rename = "BurnNFT")]
    BurnNft {
        /// Token id
        nft_id: String,
    },
    /// Mint governance weight to the caller
    MintGovernanceToken {
        /// Weight, must be positive
        amount: i64,
    },
    /// Open a proposal
    CreateProposal {
        /// Proposal fields as JSON
        proposal_json: String,
    },
    /// Edit a proposal before voting starts
    UpdateProposal {
        /// Proposal id
        proposal_id: String,
        /// Proposal fields as JSON
        proposal_json: String,
    },
    /// Vote with one governance token
    Vote {
        /// Proposal id
        proposal_id: String,
        /// Governance token id
        token_id: String,
        /// For or against
        support: bool,
    },
    /// Tally an active proposal
    CloseProposal {
        /// Proposal id
        proposal_id: String,
    },
    /// Mark a passed proposal executed
    ExecuteProposal {
        /// Proposal id
        proposal_id: String,
    },
}

/// Read-only queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "function", rename_all = "PascalCase")]
pub enum Query {
    /// Balance of an account
    BalanceOf {
        /// Account
        owner: AccountId,
    },
    /// The caller's account
    ClientAccountInfo,
    /// Minted supply over a date range
    TotalSupply {
        /// Inclusive start
        start_date: Option<String>,
        /// Inclusive end
        end_date: Option<String>,
    },
    /// Minted and used amounts over a date range
    Summary {
        /// Inclusive start
        start_date: Option<String>,
        /// Inclusive end
        end_date: Option<String>,
    },
    /// Current supply totals
    SystemTotals,
    /// Token name
    TokenName,
    /// An NFT
    #[serde(rename = "GetNFT")]
    GetNft {
        /// Token id
        nft_id: String,
    },
    /// A proposal
    GetProposal {
        /// Proposal id
        proposal_id: String,
    },
    /// Any document by world state key
    GetStateByKey {
        /// World state key
        key: String,
    },
}

/// Result of a burn request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "coin")]
pub enum BurnOutcome {
    /// The bucket was burned by this transaction
    Burned(Coin),
    /// The bucket had been burned before; nothing changed
    AlreadyBurned(Coin),
}

/// Result of a state-changing operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum OperationOutput {
    /// Supply totals
    SystemTotals(SystemTotals),
    /// An account
    Account(UserAccount),
    /// Minted bucket after accumulation
    Coin(Coin),
    /// Recorded coin transfer
    Transfer(CoinTransferEvent),
    /// Burn result
    Burn(BurnOutcome),
    /// An NFT
    Nft(Nft),
    /// A governance token
    GovernanceToken(GovernanceToken),
    /// A proposal
    Proposal(Proposal),
    /// A recorded vote
    Vote(ProposalVote),
}

/// Result of a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum QueryOutput {
    /// A balance
    Balance(u64),
    /// An account
    Account(UserAccount),
    /// Supply over a range
    Supply(SupplySummary),
    /// Usage over a range
    Usage(UsageSummary),
    /// Supply totals
    SystemTotals(SystemTotals),
    /// Token name
    TokenName(String),
    /// An NFT
    Nft(Nft),
    /// A proposal
    Proposal(Proposal),
    /// Any document
    Document(Document),
}

/// The contract: authorization policy plus operation dispatch
#[derive(Debug, Clone)]
pub struct Contract {
    issuer_msp_id: String,
    token_name: String,
    page_size: usize,
}

impl Contract {
    /// Contract for the configured issuer organization
    pub fn new(config: &Config) -> Self {
        Self {
            issuer_msp_id: config.issuer_msp_id.clone(),
            token_name: config.token_name.clone(),
            page_size: config.query_page_size.max(1),
        }
    }

    /// Run a state-changing operation
    pub fn execute(&self, ctx: &mut TxContext<'_>, operation: Operation) -> Result<OperationOutput> {
        match operation {
            Operation::Initialize => self.initialize(ctx).map(OperationOutput::SystemTotals),
            Operation::CreateUserAccount => {
                self.create_user_account(ctx).map(OperationOutput::Account)
            }
            Operation::SetActive { active } => {
                self.set_active(ctx, active).map(OperationOutput::Account)
            }
            Operation::Mint { amount, days } => {
                self.mint(ctx, amount, days).map(OperationOutput::Coin)
            }
            Operation::Transfer { to, amount } => self
                .transfer(ctx, &to, amount)
                .map(OperationOutput::Transfer),
            Operation::TransferFrom { from, to, amount } => self
                .transfer_from(ctx, &from, &to, amount)
                .map(OperationOutput::Transfer),
            Operation::BurnExpired {
                owner,
                expiration_date,
            } => self
                .burn_expired(ctx, &owner, &expiration_date)
                .map(OperationOutput::Burn),
            Operation::MintNft { metadata_json } => {
                self.mint_nft(ctx, &metadata_json).map(OperationOutput::Nft)
            }
            Operation::TransferNft { from, to, nft_id } => self
                .transfer_nft(ctx, from.as_ref(), &to, &nft_id)
                .map(OperationOutput::Nft),
            Operation::BurnNft { nft_id } => self.burn_nft(ctx, &nft_id).map(OperationOutput::Nft),
            Operation::MintGovernanceToken { amount } => self
                .mint_governance_token(ctx, amount)
                .map(OperationOutput::GovernanceToken),
            Operation::CreateProposal { proposal_json } => self
                .create_proposal(ctx, &proposal_json)
                .map(OperationOutput::Proposal),
            Operation::UpdateProposal {
                proposal_id,
                proposal_json,
            } => self
                .update_proposal(ctx, &proposal_id, &proposal_json)
                .map(OperationOutput::Proposal),
            Operation::Vote {
                proposal_id,
                token_id,
                support,
            } => self
                .vote(ctx, &proposal_id, &token_id, support)
                .map(OperationOutput::Vote),
            Operation::CloseProposal { proposal_id } => self
                .close_proposal(ctx, &proposal_id)
                .map(OperationOutput::Proposal),
            Operation::ExecuteProposal { proposal_id } => self
                .execute_proposal(ctx, &proposal_id)
                .map(OperationOutput::Proposal),
        }
    }

    /// Run a read-only query
    pub fn evaluate(&self, ctx: &TxContext<'_>, query: Query) -> Result<QueryOutput> {
        match query {
            Query::BalanceOf { owner } => self.balance_of(ctx, &owner).map(QueryOutput::Balance),
            Query::ClientAccountInfo => {
                let caller = ctx.identity().id().clone();
                self.load_account(ctx, &caller).map(QueryOutput::Account)
            }
            Query::TotalSupply {
                start_date,
                end_date,
            } => {
                let range = DateRange::parse(start_date.as_deref(), end_date.as_deref())?;
                self.total_supply(ctx, &range).map(QueryOutput::Supply)
            }
            Query::Summary {
                start_date,
                end_date,
            } => {
                let range = DateRange::parse(start_date.as_deref(), end_date.as_deref())?;
                self.summary(ctx, &range).map(QueryOutput::Usage)
            }
            Query::SystemTotals => self.load_totals(ctx).map(QueryOutput::SystemTotals),
            Query::TokenName => Ok(QueryOutput::TokenName(self.token_name.clone())),
            Query::GetNft { nft_id } => ctx
                .require::<Nft>(&Nft::key_for(&nft_id), || format!("nft {}", nft_id))
                .map(QueryOutput::Nft),
            Query::GetProposal { proposal_id } => ctx
                .require::<Proposal>(&Proposal::key_for(&proposal_id), || {
                    format!("proposal {}", proposal_id)
                })
                .map(QueryOutput::Proposal),
            Query::GetStateByKey { key } => {
                let bytes = ctx
                    .get_raw(&key)?
                    .ok_or_else(|| Error::NotFound(format!("state for key {:?}", key)))?;
                Document::from_json(&bytes).map(QueryOutput::Document)
            }
        }
    }

    /// Caller must belong to the issuer organization
    fn require_issuer(&self, ctx: &TxContext<'_>, action: &str) -> Result<()> {
        let msp_id = ctx.identity().msp_id();
        if msp_id != self.issuer_msp_id {
            return Err(Error::Unauthorized(format!(
                "organization {} is not authorized to {}",
                msp_id, action
            )));
        }
        Ok(())
    }

    /// Caller must be `account` or hold the admin role
    fn require_self_or_admin(&self, ctx: &TxContext<'_>, account: &AccountId, action: &str) -> Result<()> {
        let caller = ctx.identity();
        if caller.id() != account && !caller.is_admin() {
            return Err(Error::Unauthorized(format!(
                "{} may not {} on behalf of {}",
                caller.id(),
                action,
                account
            )));
        }
        Ok(())
    }
}

/// Reject non-positive amounts
fn positive_amount(amount: i64) -> Result<u64> {
    if amount <= 0 {
        return Err(Error::InvalidAmount(amount));
    }
    Ok(amount as u64)
}

fn checked_add(a: u64, b: u64) -> Result<u64> {
    a.checked_add(b)
        .ok_or_else(|| Error::Validation(format!("amount overflow: {} + {}", a, b)))
}

/// Short deterministic id derived from the transaction id
fn derived_id(prefix: &str, ctx: &TxContext<'_>) -> String {
    let tx = ctx.transaction_id();
    format!("{}_{}", prefix, &tx[..tx.len().min(16)])
}
