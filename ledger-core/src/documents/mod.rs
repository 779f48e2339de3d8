//! Ledger documents
//!
//! Every document stored in world state is one variant of [`Document`], a
//! tagged union discriminated by the `docType` field. Decoding goes through
//! the union so unknown or mismatched tags are rejected before a typed value
//! is handed out.

mod account;
mod coin;
mod governance;
mod nft;
mod transfer;

pub use account::{SystemTotals, UserAccount, SYSTEM_TOTALS_KEY};
pub use coin::Coin;
pub use governance::{GovernanceToken, Proposal, ProposalDraft, ProposalStatus, ProposalVote};
pub use nft::{Nft, NftTransferEvent};
pub use transfer::CoinTransferEvent;

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Name of the discriminator field
pub const DOC_TYPE_FIELD: &str = "docType";

/// Document kinds stored in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocType {
    /// Coin bucket
    #[serde(rename = "coin")]
    Coin,
    /// User account
    #[serde(rename = "user-info")]
    UserAccount,
    /// Supply totals singleton
    #[serde(rename = "system-info")]
    SystemTotals,
    /// Coin transfer event
    #[serde(rename = "coin-transfer-event")]
    CoinTransferEvent,
    /// Non-fungible token
    #[serde(rename = "nft")]
    Nft,
    /// NFT transfer event
    #[serde(rename = "nft-transfer-event")]
    NftTransferEvent,
    /// Governance token
    #[serde(rename = "governance-token")]
    GovernanceToken,
    /// Governance proposal
    #[serde(rename = "proposal")]
    Proposal,
    /// Vote cast on a proposal
    #[serde(rename = "proposal-vote")]
    ProposalVote,
}

impl DocType {
    /// All document kinds
    pub const ALL: [DocType; 9] = [
        DocType::Coin,
        DocType::UserAccount,
        DocType::SystemTotals,
        DocType::CoinTransferEvent,
        DocType::Nft,
        DocType::NftTransferEvent,
        DocType::GovernanceToken,
        DocType::Proposal,
        DocType::ProposalVote,
    ];

    /// Wire name of the docType
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Coin => "coin",
            DocType::UserAccount => "user-info",
            DocType::SystemTotals => "system-info",
            DocType::CoinTransferEvent => "coin-transfer-event",
            DocType::Nft => "nft",
            DocType::NftTransferEvent => "nft-transfer-event",
            DocType::GovernanceToken => "governance-token",
            DocType::Proposal => "proposal",
            DocType::ProposalVote => "proposal-vote",
        }
    }

    /// Parse from the wire name
    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Whether writing this document adds a record to the transaction's event envelope
    pub fn emits_event(&self) -> bool {
        matches!(
            self,
            DocType::UserAccount
                | DocType::CoinTransferEvent
                | DocType::Nft
                | DocType::NftTransferEvent
                | DocType::Proposal
        )
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any ledger document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "docType")]
pub enum Document {
    /// Coin bucket
    #[serde(rename = "coin")]
    Coin(Coin),
    /// User account
    #[serde(rename = "user-info")]
    UserAccount(UserAccount),
    /// Supply totals
    #[serde(rename = "system-info")]
    SystemTotals(SystemTotals),
    /// Coin transfer event
    #[serde(rename = "coin-transfer-event")]
    CoinTransferEvent(CoinTransferEvent),
    /// Non-fungible token
    #[serde(rename = "nft")]
    Nft(Nft),
    /// NFT transfer event
    #[serde(rename = "nft-transfer-event")]
    NftTransferEvent(NftTransferEvent),
    /// Governance token
    #[serde(rename = "governance-token")]
    GovernanceToken(GovernanceToken),
    /// Governance proposal
    #[serde(rename = "proposal")]
    Proposal(Proposal),
    /// Proposal vote
    #[serde(rename = "proposal-vote")]
    ProposalVote(ProposalVote),
}

impl Document {
    /// Kind of this document
    pub fn doc_type(&self) -> DocType {
        match self {
            Document::Coin(_) => DocType::Coin,
            Document::UserAccount(_) => DocType::UserAccount,
            Document::SystemTotals(_) => DocType::SystemTotals,
            Document::CoinTransferEvent(_) => DocType::CoinTransferEvent,
            Document::Nft(_) => DocType::Nft,
            Document::NftTransferEvent(_) => DocType::NftTransferEvent,
            Document::GovernanceToken(_) => DocType::GovernanceToken,
            Document::Proposal(_) => DocType::Proposal,
            Document::ProposalVote(_) => DocType::ProposalVote,
        }
    }

    /// World state key of this document
    pub fn key(&self) -> String {
        match self {
            Document::Coin(d) => d.key(),
            Document::UserAccount(d) => d.key(),
            Document::SystemTotals(d) => d.key(),
            Document::CoinTransferEvent(d) => d.key(),
            Document::Nft(d) => d.key(),
            Document::NftTransferEvent(d) => d.key(),
            Document::GovernanceToken(d) => d.key(),
            Document::Proposal(d) => d.key(),
            Document::ProposalVote(d) => d.key(),
        }
    }

    /// Decode from stored JSON, rejecting missing or unknown docTypes
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Decode from a JSON value, rejecting missing or unknown docTypes
    pub fn from_value(value: Value) -> Result<Self> {
        let doc_type = value
            .get(DOC_TYPE_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Validation("document has no docType".into()))?;
        if DocType::from_str(doc_type).is_none() {
            return Err(Error::Validation(format!("unknown docType {:?}", doc_type)));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// JSON value including the docType tag
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// A typed ledger document
pub trait LedgerDocument: Serialize + Sized {
    /// Discriminator for this type
    const DOC_TYPE: DocType;

    /// World state key
    fn key(&self) -> String;

    /// Wrap into the tagged union
    fn into_document(self) -> Document;

    /// Unwrap from the tagged union, rejecting other kinds
    fn from_document(document: Document) -> Result<Self>;

    /// Decode from stored JSON
    fn from_json(bytes: &[u8]) -> Result<Self> {
        Self::from_document(Document::from_json(bytes)?)
    }

    /// JSON value including the docType tag
    fn to_value(&self) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        match value {
            Value::Object(ref mut fields) => {
                fields.insert(
                    DOC_TYPE_FIELD.to_string(),
                    Value::String(Self::DOC_TYPE.as_str().to_string()),
                );
                Ok(value)
            }
            _ => Err(Error::Validation(format!(
                "{} did not serialize to an object",
                Self::DOC_TYPE
            ))),
        }
    }

    /// Stored JSON bytes including the docType tag
    fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.to_value()?)?)
    }
}

macro_rules! impl_ledger_document {
    ($ty:ident, $variant:ident) => {
        impl LedgerDocument for $ty {
            const DOC_TYPE: DocType = DocType::$variant;

            fn key(&self) -> String {
                $ty::key(self)
            }

            fn into_document(self) -> Document {
                Document::$variant(self)
            }

            fn from_document(document: Document) -> Result<Self> {
                match document {
                    Document::$variant(inner) => Ok(inner),
                    other => Err(Error::DocTypeMismatch {
                        expected: Self::DOC_TYPE.as_str(),
                        found: other.doc_type().as_str().to_string(),
                    }),
                }
            }
        }
    };
}

impl_ledger_document!(Coin, Coin);
impl_ledger_document!(UserAccount, UserAccount);
impl_ledger_document!(SystemTotals, SystemTotals);
impl_ledger_document!(CoinTransferEvent, CoinTransferEvent);
impl_ledger_document!(Nft, Nft);
impl_ledger_document!(NftTransferEvent, NftTransferEvent);
impl_ledger_document!(GovernanceToken, GovernanceToken);
impl_ledger_document!(Proposal, Proposal);
impl_ledger_document!(ProposalVote, ProposalVote);
