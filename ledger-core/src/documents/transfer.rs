use crate::documents::DocType;
use crate::types::{composite_key, AccountId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Immutable record of coins moving between accounts
///
/// Mints originate from the system account and burns terminate there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinTransferEvent {
    /// Source account
    pub from: AccountId,
    /// Destination account
    pub to: AccountId,
    /// Amount moved
    pub amount: u64,
    /// Expiration of the minted or burned bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<NaiveDate>,
    /// Transaction timestamp
    pub timestamp: String,
}

impl CoinTransferEvent {
    /// Prefix of every transfer event, ordered by timestamp
    pub fn prefix() -> String {
        composite_key(DocType::CoinTransferEvent.as_str(), &[])
    }

    /// World state key
    pub fn key(&self) -> String {
        composite_key(
            DocType::CoinTransferEvent.as_str(),
            &[&self.timestamp, self.from.as_str(), self.to.as_str()],
        )
    }

    /// True for mints
    pub fn is_mint(&self) -> bool {
        self.from.is_system()
    }

    /// True for burns
    pub fn is_burn(&self) -> bool {
        self.to.is_system() && !self.from.is_system()
    }
}
