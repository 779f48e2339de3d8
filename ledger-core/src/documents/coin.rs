use crate::types::{composite_key, AccountId};
use crate::documents::DocType;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A bucket of coins sharing one expiration date (or none)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coin {
    /// Amount held in the bucket
    pub amount: u64,
    /// Owning account
    pub owner: AccountId,
    /// Last day the coins are valid; `None` never expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<NaiveDate>,
    /// Retired by a burn
    #[serde(default)]
    pub burned: bool,
}

impl Coin {
    /// New unburned bucket
    pub fn new(owner: AccountId, amount: u64, expiration_date: Option<NaiveDate>) -> Self {
        Self {
            amount,
            owner,
            expiration_date,
            burned: false,
        }
    }

    /// Key of the bucket for `(owner, expiration_date)`
    pub fn key_for(owner: &AccountId, expiration_date: Option<NaiveDate>) -> String {
        match expiration_date {
            Some(date) => composite_key(
                DocType::Coin.as_str(),
                &[owner.as_str(), &date.format("%Y-%m-%d").to_string()],
            ),
            None => composite_key(DocType::Coin.as_str(), &[owner.as_str()]),
        }
    }

    /// Prefix shared by every bucket of `owner`
    pub fn owner_prefix(owner: &AccountId) -> String {
        composite_key(DocType::Coin.as_str(), &[owner.as_str()])
    }

    /// World state key
    pub fn key(&self) -> String {
        Self::key_for(&self.owner, self.expiration_date)
    }

    /// Spending order: earliest expiration first, non-expiring last
    pub fn spend_order(&self, other: &Self) -> Ordering {
        match (self.expiration_date, other.expiration_date) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}
