//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (JSON with sorted object keys)
//! - Deterministic key derivation (NUL-delimited composite keys)
//! - Integer arithmetic for coin amounts

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Account id of the system account that is the source of mints and the sink of burns
pub const SYSTEM_ACCOUNT: &str = "0x0";

/// Attribute carrying the caller's role
pub const ROLE_ATTRIBUTE: &str = "role";

/// Role value granting administrative rights
pub const ADMIN_ROLE: &str = "admin";

/// Attribute carrying the caller's user name
pub const USERNAME_ATTRIBUTE: &str = "username";

/// Delimiter between composite key segments
pub const KEY_DELIMITER: char = '\u{0}';

/// Account identifier (the caller's enrollment id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The system account
    pub fn system() -> Self {
        Self(SYSTEM_ACCOUNT.to_string())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the system account
    pub fn is_system(&self) -> bool {
        self.0 == SYSTEM_ACCOUNT
    }

    /// Reject ids that cannot be used as a key segment
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(Error::Validation("account id must not be empty".into()));
        }
        validate_key_part(&self.0)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identity of the submitter of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    id: AccountId,
    msp_id: String,
    attributes: BTreeMap<String, String>,
}

impl ClientIdentity {
    /// Create identity for an account enrolled in an organization
    pub fn new(id: impl Into<AccountId>, msp_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            msp_id: msp_id.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Add a certificate attribute
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Account id of the caller
    pub fn id(&self) -> &AccountId {
        &self.id
    }

    /// Organization (MSP) id of the caller
    pub fn msp_id(&self) -> &str {
        &self.msp_id
    }

    /// Attribute value, if present
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// True when the attribute is present with exactly this value
    pub fn has_attribute_value(&self, name: &str, value: &str) -> bool {
        self.attribute(name) == Some(value)
    }

    /// True when the caller holds the admin role
    pub fn is_admin(&self) -> bool {
        self.has_attribute_value(ROLE_ATTRIBUTE, ADMIN_ROLE)
    }
}

/// Reject key segments containing the delimiter
pub fn validate_key_part(part: &str) -> Result<()> {
    if part.contains(KEY_DELIMITER) {
        return Err(Error::Validation(format!(
            "key segment {:?} contains a NUL character",
            part
        )));
    }
    Ok(())
}

/// Build a composite key: `\0<objectType>\0<attr1>\0<attr2>\0...`
pub fn composite_key(object_type: &str, attributes: &[&str]) -> String {
    let mut key = String::with_capacity(
        2 + object_type.len() + attributes.iter().map(|a| a.len() + 1).sum::<usize>(),
    );
    key.push(KEY_DELIMITER);
    key.push_str(object_type);
    key.push(KEY_DELIMITER);
    for attribute in attributes {
        key.push_str(attribute);
        key.push(KEY_DELIMITER);
    }
    key
}

/// Canonical timestamp format: RFC 3339 UTC with microseconds
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a `YYYY-MM-DD` date
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| Error::Validation(format!("invalid date {:?}: {}", value, e)))
}

/// Inclusive timestamp range used to filter event history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start: Option<String>,
    end: Option<String>,
}

impl DateRange {
    /// Unbounded range
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse optional bounds given as `YYYY-MM-DD` or RFC 3339.
    ///
    /// A plain end date covers the whole day.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self> {
        let start = start
            .filter(|s| !s.is_empty())
            .map(|s| parse_bound(s, NaiveTime::MIN))
            .transpose()?;
        let end = end
            .filter(|s| !s.is_empty())
            .map(|s| parse_bound(s, end_of_day()))
            .transpose()?;

        if let (Some(start), Some(end)) = (&start, &end) {
            if start > end {
                return Err(Error::Validation(format!(
                    "start date {} is after end date {}",
                    start, end
                )));
            }
        }

        Ok(Self { start, end })
    }

    /// True if the canonical timestamp lies within the range
    pub fn contains(&self, timestamp: &str) -> bool {
        self.start.as_deref().map_or(true, |s| timestamp >= s)
            && self.end.as_deref().map_or(true, |e| timestamp <= e)
    }
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap_or(NaiveTime::MIN)
}

fn parse_bound(value: &str, time_of_day: NaiveTime) -> Result<String> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(format_timestamp(date.and_time(time_of_day).and_utc()));
    }
    DateTime::parse_from_rfc3339(value)
        .map(|ts| format_timestamp(ts.with_timezone(&Utc)))
        .map_err(|e| Error::Validation(format!("invalid date {:?}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_composite_key_format() {
        let key = composite_key("coin", &["alice", "2022-06-30"]);
        assert_eq!(key, "\u{0}coin\u{0}alice\u{0}2022-06-30\u{0}");
    }

    #[test]
    fn test_owner_key_is_prefix_of_dated_keys() {
        let undated = composite_key("coin", &["alice"]);
        let dated = composite_key("coin", &["alice", "2022-06-30"]);
        let other = composite_key("coin", &["alice2"]);
        assert!(dated.starts_with(&undated));
        assert!(!other.starts_with(&undated));
    }

    #[test]
    fn test_account_id_validation() {
        assert!(AccountId::new("alice").validate().is_ok());
        assert!(AccountId::new("").validate().is_err());
        assert!(AccountId::new("al\u{0}ice").validate().is_err());
        assert!(AccountId::system().is_system());
    }

    #[test]
    fn test_identity_roles() {
        let admin = ClientIdentity::new("root", "IssuerMSP").with_attribute("role", "admin");
        let user = ClientIdentity::new("bob", "IssuerMSP").with_attribute("role", "user");
        assert!(admin.is_admin());
        assert!(!user.is_admin());
        assert_eq!(user.attribute("role"), Some("user"));
    }

    #[test]
    fn test_date_range_plain_dates_cover_whole_days() {
        let range = DateRange::parse(Some("2022-01-01"), Some("2022-01-31")).unwrap();
        let first = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        let last = Utc.with_ymd_and_hms(2022, 1, 31, 23, 59, 59).unwrap();
        let after = Utc.with_ymd_and_hms(2022, 2, 1, 0, 0, 0).unwrap();

        assert!(range.contains(&format_timestamp(first)));
        assert!(range.contains(&format_timestamp(last)));
        assert!(!range.contains(&format_timestamp(after)));
    }

    #[test]
    fn test_date_range_rejects_inverted_bounds() {
        assert!(DateRange::parse(Some("2022-02-01"), Some("2022-01-01")).is_err());
        assert!(DateRange::parse(Some("not-a-date"), None).is_err());
        assert_eq!(DateRange::parse(Some(""), None).unwrap(), DateRange::all());
    }
}
