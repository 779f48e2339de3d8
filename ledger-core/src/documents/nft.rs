use crate::documents::DocType;
use crate::types::{composite_key, AccountId};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Non-fungible token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nft {
    /// Token id
    pub id: String,
    /// Current owner
    pub owner: AccountId,
    /// Minting account
    pub creator: AccountId,
    /// Free-form metadata; always an object with a `name`
    pub metadata: Value,
    /// Creation timestamp
    pub created: String,
    /// Last modification timestamp
    pub last_updated: String,
    /// Retired
    #[serde(default)]
    pub burned: bool,
}

impl Nft {
    /// Key of the token `id`
    pub fn key_for(id: &str) -> String {
        composite_key(DocType::Nft.as_str(), &[id])
    }

    /// World state key
    pub fn key(&self) -> String {
        Self::key_for(&self.id)
    }

    /// Parse and check metadata supplied by a caller
    pub fn parse_metadata(metadata_json: &str) -> Result<Value> {
        let metadata: Value = serde_json::from_str(metadata_json)
            .map_err(|e| Error::Validation(format!("metadata is not valid JSON: {}", e)))?;
        let name = metadata
            .as_object()
            .ok_or_else(|| Error::Validation("metadata must be a JSON object".into()))?
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if name.trim().is_empty() {
            return Err(Error::Validation("metadata.name is required".into()));
        }
        Ok(metadata)
    }
}

/// Immutable record of an NFT changing hands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NftTransferEvent {
    /// Previous owner
    pub from: AccountId,
    /// New owner
    pub to: AccountId,
    /// Token id
    pub nft_id: String,
    /// Transaction timestamp
    pub timestamp: String,
}

impl NftTransferEvent {
    /// World state key
    pub fn key(&self) -> String {
        composite_key(
            DocType::NftTransferEvent.as_str(),
            &[
                &self.timestamp,
                &self.nft_id,
                self.from.as_str(),
                self.to.as_str(),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_requires_named_object() {
        assert!(Nft::parse_metadata(r#"{"name":"Sunset","price":10}"#).is_ok());
        assert!(Nft::parse_metadata(r#"{"price":10}"#).is_err());
        assert!(Nft::parse_metadata(r#"{"name":"  "}"#).is_err());
        assert!(Nft::parse_metadata(r#"["name"]"#).is_err());
        assert!(Nft::parse_metadata("not json").is_err());
    }
}
