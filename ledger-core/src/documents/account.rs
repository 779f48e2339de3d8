use crate::documents::DocType;
use crate::types::{composite_key, AccountId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Plain key of the supply totals singleton
pub const SYSTEM_TOTALS_KEY: &str = "system-info";

/// A user's account: balance, activation flag and owned NFTs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    /// Human-facing user name
    pub user_id: String,
    /// Primary identity
    pub account_id: AccountId,
    /// Role attribute at enrollment
    pub role: String,
    /// Sum of the account's unburned coin buckets
    pub balance: u64,
    /// Counted in the active supply
    pub active: bool,
    /// Ids of owned NFTs
    #[serde(default)]
    pub nfts: BTreeSet<String>,
    /// Creation timestamp
    pub created: String,
    /// Last modification timestamp
    pub updated: String,
}

impl UserAccount {
    /// New inactive account with zero balance
    pub fn new(
        account_id: AccountId,
        user_id: impl Into<String>,
        role: impl Into<String>,
        timestamp: &str,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            account_id,
            role: role.into(),
            balance: 0,
            active: false,
            nfts: BTreeSet::new(),
            created: timestamp.to_string(),
            updated: timestamp.to_string(),
        }
    }

    /// Key of the account for `account_id`
    pub fn key_for(account_id: &AccountId) -> String {
        composite_key(DocType::UserAccount.as_str(), &[account_id.as_str()])
    }

    /// World state key
    pub fn key(&self) -> String {
        Self::key_for(&self.account_id)
    }

    /// Record a modification
    pub fn touch(&mut self, timestamp: &str) {
        self.updated = timestamp.to_string();
    }
}

/// Supply totals, maintained incrementally by every balance change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemTotals {
    /// Sum of all balances
    pub total_supply: u64,
    /// Sum of balances of active accounts
    pub total_active_supply: u64,
}

impl SystemTotals {
    /// World state key
    pub fn key(&self) -> String {
        SYSTEM_TOTALS_KEY.to_string()
    }
}
