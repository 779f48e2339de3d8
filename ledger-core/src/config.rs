//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// MSP id of the organization allowed to mint and burn
    pub issuer_msp_id: String,

    /// Token name reported by the TokenName query
    pub token_name: String,

    /// Page size used when aggregating transfer history
    pub query_page_size: usize,

    /// Actor mailbox capacity
    pub mailbox_capacity: usize,

    /// Notification broadcast buffer per subscriber
    pub notification_buffer: usize,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            service_name: "ledger-core".to_string(),
            issuer_msp_id: "IssuerMSP".to_string(),
            token_name: "coin".to_string(),
            query_page_size: 100,
            mailbox_capacity: 1000,     // Bounded for backpressure
            notification_buffer: 1024,
            rocksdb: RocksDBConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Level 0 file num compaction trigger
    pub level0_file_num_compaction_trigger: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,       // 64 MB
            max_write_buffer_number: 3,
            target_file_size_mb: 64,        // 64 MB
            max_background_jobs: 2,
            level0_file_num_compaction_trigger: 4,
            enable_statistics: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(msp_id) = std::env::var("LEDGER_ISSUER_MSP_ID") {
            config.issuer_msp_id = msp_id;
        }

        if let Ok(name) = std::env::var("LEDGER_TOKEN_NAME") {
            config.token_name = name;
        }

        if let Ok(size) = std::env::var("LEDGER_QUERY_PAGE_SIZE") {
            config.query_page_size = size.parse().map_err(|_| {
                crate::Error::Config(format!("LEDGER_QUERY_PAGE_SIZE is not a number: {}", size))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check values the ledger cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.issuer_msp_id.is_empty() {
            return Err(crate::Error::Config("issuer_msp_id must not be empty".into()));
        }
        if self.query_page_size == 0 {
            return Err(crate::Error::Config("query_page_size must be positive".into()));
        }
        if self.mailbox_capacity == 0 || self.notification_buffer == 0 {
            return Err(crate::Error::Config(
                "mailbox_capacity and notification_buffer must be positive".into(),
            ));
        }
        Ok(())
    }
}
