use crate::documents::DocType;
use crate::types::{composite_key, AccountId};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Voting weight held by an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceToken {
    /// Token id
    pub id: String,
    /// Owning account
    pub owner: AccountId,
    /// Voting weight
    pub amount: u64,
    /// Creation timestamp
    pub created: String,
}

impl GovernanceToken {
    /// Key of the token `id`
    pub fn key_for(id: &str) -> String {
        composite_key(DocType::GovernanceToken.as_str(), &[id])
    }

    /// World state key
    pub fn key(&self) -> String {
        Self::key_for(&self.id)
    }
}

/// Proposal lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalStatus {
    /// Open for votes
    Active,
    /// Closed with a majority for
    Passed,
    /// Closed without a majority for
    Rejected,
    /// Passed and carried out
    Executed,
}

/// Governance proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    /// Proposal id
    pub id: String,
    /// Title
    pub title: String,
    /// Description
    pub description: String,
    /// Creating account
    pub proposer: AccountId,
    /// Lifecycle status
    pub status: ProposalStatus,
    /// Weight voted for
    pub for_votes: u64,
    /// Weight voted against
    pub against_votes: u64,
    /// First block of the voting window
    pub start_block: u64,
    /// Last block of the voting window
    pub end_block: u64,
    /// Creation timestamp
    pub created: String,
    /// Last modification timestamp
    pub updated: String,
    /// Execution timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed: Option<String>,
}

impl Proposal {
    /// Key of the proposal `id`
    pub fn key_for(id: &str) -> String {
        composite_key(DocType::Proposal.as_str(), &[id])
    }

    /// World state key
    pub fn key(&self) -> String {
        Self::key_for(&self.id)
    }

    /// Require the proposal to be in `status`
    pub fn require_status(&self, status: ProposalStatus) -> Result<()> {
        if self.status != status {
            return Err(Error::InvalidState(format!(
                "proposal {} is {:?}, expected {:?}",
                self.id, self.status, status
            )));
        }
        Ok(())
    }
}

/// Caller-supplied proposal fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalDraft {
    /// Title
    pub title: String,
    /// Description
    #[serde(default)]
    pub description: String,
    /// First block of the voting window
    #[serde(default)]
    pub start_block: u64,
    /// Last block of the voting window
    #[serde(default)]
    pub end_block: u64,
}

impl ProposalDraft {
    /// Parse and check caller JSON
    pub fn parse(json: &str) -> Result<Self> {
        let draft: ProposalDraft = serde_json::from_str(json)
            .map_err(|e| Error::Validation(format!("invalid proposal: {}", e)))?;
        if draft.title.trim().is_empty() {
            return Err(Error::Validation("proposal title is required".into()));
        }
        if draft.end_block < draft.start_block {
            return Err(Error::Validation(format!(
                "endBlock {} precedes startBlock {}",
                draft.end_block, draft.start_block
            )));
        }
        Ok(draft)
    }
}

/// A vote cast with one governance token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalVote {
    /// Proposal voted on
    pub proposal_id: String,
    /// Token that cast the vote
    pub token_id: String,
    /// Account that cast the vote
    pub voter: AccountId,
    /// For or against
    pub support: bool,
    /// Weight of the vote
    pub votes: u64,
    /// Timestamp
    pub created: String,
}

impl ProposalVote {
    /// Key of the vote cast by `token_id` on `proposal_id`
    pub fn key_for(proposal_id: &str, token_id: &str) -> String {
        composite_key(DocType::ProposalVote.as_str(), &[proposal_id, token_id])
    }

    /// Prefix of every vote on `proposal_id`
    pub fn proposal_prefix(proposal_id: &str) -> String {
        composite_key(DocType::ProposalVote.as_str(), &[proposal_id])
    }

    /// World state key
    pub fn key(&self) -> String {
        Self::key_for(&self.proposal_id, &self.token_id)
    }
}
