//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `state` - World state documents (key: composite document key)
//! - `notifications` - Committed notifications (key: big-endian sequence)

use crate::{
    envelope::Notification,
    error::{Error, Result},
    store::{CommitBatch, StateStore},
    Config,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use std::sync::Arc;

/// Column family names
const CF_STATE: &str = "state";
const CF_NOTIFICATIONS: &str = "notifications";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        // Database options
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        db_opts.set_level_zero_file_num_compaction_trigger(
            config.rocksdb.level0_file_num_compaction_trigger,
        );
        db_opts.set_compaction_style(DBCompactionStyle::Level);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_STATE, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_NOTIFICATIONS, Self::cf_options_notifications()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB world state");

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_state() -> Options {
        let mut opts = Options::default();
        // Documents are read on every transaction, favour decompression speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_options_notifications() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn decode_key(bytes: &[u8]) -> Result<String> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::Storage(format!("non UTF-8 key in state: {}", e)))
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

impl StateStore for Storage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let cf = self.cf_handle(CF_STATE)?;
        Ok(self.db.get_cf(cf, key.as_bytes())?)
    }

    fn scan(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>> {
        let cf = self.cf_handle(CF_STATE)?;
        let start = match start_after {
            Some(after) if after >= prefix => after,
            _ => prefix,
        };

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(start.as_bytes(), Direction::Forward));

        let mut page = Vec::new();
        for item in iter {
            if page.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let key = Self::decode_key(&key)?;
            if start_after == Some(key.as_str()) {
                continue;
            }
            page.push((key, value.to_vec()));
        }

        Ok(page)
    }

    fn commit(&self, commit: &CommitBatch) -> Result<()> {
        let mut batch = WriteBatch::default();

        let cf_state = self.cf_handle(CF_STATE)?;
        for (key, value) in &commit.writes {
            match value {
                Some(bytes) => batch.put_cf(cf_state, key.as_bytes(), bytes),
                None => batch.delete_cf(cf_state, key.as_bytes()),
            }
        }

        if let Some(notification) = &commit.notification {
            let expected = self.last_sequence()? + 1;
            if notification.sequence != expected {
                return Err(Error::InvariantViolation(format!(
                    "notification sequence {} does not follow {}",
                    notification.sequence,
                    expected - 1
                )));
            }
            let cf_notifications = self.cf_handle(CF_NOTIFICATIONS)?;
            batch.put_cf(
                cf_notifications,
                notification.sequence.to_be_bytes(),
                notification.to_bytes()?,
            );
        }

        // Atomic commit
        self.db.write(batch)?;

        tracing::debug!(
            writes = commit.writes.len(),
            sequence = commit.notification.as_ref().map(|n| n.sequence),
            "Transaction committed"
        );

        Ok(())
    }

    fn notifications_after(&self, sequence: u64, limit: usize) -> Result<Vec<Notification>> {
        let cf = self.cf_handle(CF_NOTIFICATIONS)?;
        let start = sequence.saturating_add(1).to_be_bytes();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));

        let mut notifications = Vec::new();
        for item in iter.take(limit) {
            let (_, value) = item?;
            notifications.push(Notification::from_bytes(&value)?);
        }
        Ok(notifications)
    }

    fn last_sequence(&self) -> Result<u64> {
        let cf = self.cf_handle(CF_NOTIFICATIONS)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                let bytes: [u8; 8] = key.as_ref().try_into().map_err(|_| {
                    Error::Storage("notification key is not a u64 sequence".to_string())
                })?;
                Ok(u64::from_be_bytes(bytes))
            }
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::WriteSet;
    use tempfile::TempDir;

    fn test_config() -> (Config, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (config, temp_dir)
    }

    fn writes(pairs: &[(&str, Option<&str>)]) -> WriteSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(|v| v.as_bytes().to_vec())))
            .collect()
    }

    #[test]
    fn test_storage_open() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config);
        assert!(storage.is_ok());
    }

    #[test]
    fn test_commit_and_get() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let batch = CommitBatch {
            writes: writes(&[("\u{0}coin\u{0}alice\u{0}", Some("{}"))]),
            notification: None,
        };
        storage.commit(&batch).unwrap();

        assert_eq!(
            storage.get("\u{0}coin\u{0}alice\u{0}").unwrap(),
            Some(b"{}".to_vec())
        );
        assert!(storage.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_scan_pages_within_prefix() {
        let (config, _temp) = test_config();
        let storage = Storage::open(&config).unwrap();

        let batch = CommitBatch {
            writes: writes(&[
                ("a/1", Some("x")),
                ("b/1", Some("1")),
                ("b/2", Some("2")),
                ("b/3", Some("3")),
                ("c/1", Some("y")),
            ]),
            notification: None,
        };
        storage.commit(&batch).unwrap();

        let first = storage.scan("b/", None, 2).unwrap();
        assert_eq!(first.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(), vec!["b/1", "b/2"]);

        let second = storage.scan("b/", Some("b/2"), 2).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].0, "b/3");

        assert!(storage.scan("b/", Some("b/3"), 2).unwrap().is_empty());
    }

    #[test]
    fn test_notification_log_survives_reopen() {
        let (config, _temp) = test_config();
        {
            let storage = Storage::open(&config).unwrap();
            for sequence in 1..=2 {
                let batch = CommitBatch {
                    writes: writes(&[("k", Some("v")), ("gone", None)]),
                    notification: Some(Notification {
                        sequence,
                        transaction_id: format!("tx{}", sequence),
                        event_count: 0,
                        events: vec![],
                    }),
                };
                storage.commit(&batch).unwrap();
            }
            storage.close().unwrap();
        }

        let storage = Storage::open(&config).unwrap();
        assert_eq!(storage.last_sequence().unwrap(), 2);
        let after = storage.notifications_after(1, 10).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].transaction_id, "tx2");
    }
}
