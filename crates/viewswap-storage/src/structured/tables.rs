//! redb table definitions and storage manager
//!
//! Defines all tables used for structured storage.

use std::path::PathBuf;
use std::sync::Arc;

use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};
use tracing::{debug, info, instrument};

use crate::error::StorageError;

/// Type alias for scan results to simplify complex type
pub type ScanResults = Vec<(Vec<u8>, Vec<u8>)>;

// Table definitions
// Key: participant id (8 bytes BE), Value: serialized ParticipantRecord
pub const PARTICIPANTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("participants");

// Key: (participant id, link id) concatenated, Value: empty
pub const VIEWED: TableDefinition<&[u8], &[u8]> = TableDefinition::new("viewed");

// Key: payment charge id, Value: serialized PaymentRecord
pub const PAYMENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("payments");

/// Configuration for redb storage
#[derive(Debug, Clone)]
pub struct RedbStorageConfig {
    /// Path to the database file
    pub db_path: PathBuf,
}

impl Default for RedbStorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/viewswap.redb"),
        }
    }
}

/// Main redb storage manager
pub struct RedbStorage {
    db: Arc<Database>,
    config: RedbStorageConfig,
}

impl RedbStorage {
    /// Open or create the database
    #[instrument(skip(config), fields(path = %config.db_path.display()))]
    pub fn open(config: RedbStorageConfig) -> Result<Self, StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&config.db_path)?;

        info!("Opened redb database");

        let storage = Self {
            db: Arc::new(db),
            config,
        };

        storage.init_tables()?;

        Ok(storage)
    }

    /// Initialize all tables
    fn init_tables(&self) -> Result<(), StorageError> {
        let write_txn = self.db.begin_write()?;

        // Create tables if they don't exist
        write_txn.open_table(PARTICIPANTS)?;
        write_txn.open_table(VIEWED)?;
        write_txn.open_table(PAYMENTS)?;

        write_txn.commit()?;

        debug!("Initialized redb tables");
        Ok(())
    }

    /// Get the configuration
    pub fn config(&self) -> &RedbStorageConfig {
        &self.config
    }

    /// Run `f` inside one write transaction and commit it
    ///
    /// Nothing is committed when `f` returns an error, so every change made
    /// inside the closure lands together or not at all.
    pub fn write<T>(
        &self,
        f: impl FnOnce(&WriteTransaction) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let write_txn = self.db.begin_write()?;
        let result = f(&write_txn)?;
        write_txn.commit()?;
        Ok(result)
    }

    /// Run `f` against one consistent read snapshot
    pub fn read<T>(
        &self,
        f: impl FnOnce(&ReadTransaction) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let read_txn = self.db.begin_read()?;
        f(&read_txn)
    }

    /// Put a key-value pair in a table
    pub fn put(
        &self,
        table: TableDefinition<&[u8], &[u8]>,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), StorageError> {
        self.write(|txn| {
            let mut table = txn.open_table(table)?;
            table.insert(key, value)?;
            Ok(())
        })
    }

    /// Insert a key only if it is absent
    ///
    /// Returns `true` when the key was inserted by this call.
    pub fn insert_if_absent(
        &self,
        table: TableDefinition<&[u8], &[u8]>,
        key: &[u8],
        value: &[u8],
    ) -> Result<bool, StorageError> {
        self.write(|txn| {
            let mut table = txn.open_table(table)?;
            if table.get(key)?.is_some() {
                return Ok(false);
            }
            table.insert(key, value)?;
            Ok(true)
        })
    }

    /// Remove a key; returns `true` when it existed
    pub fn remove(
        &self,
        table: TableDefinition<&[u8], &[u8]>,
        key: &[u8],
    ) -> Result<bool, StorageError> {
        self.write(|txn| {
            let mut table = txn.open_table(table)?;
            let removed = table.remove(key)?.is_some();
            Ok(removed)
        })
    }

    /// Get a value from a table
    pub fn get(
        &self,
        table: TableDefinition<&[u8], &[u8]>,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StorageError> {
        self.read(|txn| {
            let table = txn.open_table(table)?;
            Ok(table.get(key)?.map(|v| v.value().to_vec()))
        })
    }

    /// Iterate over all entries in a table with a prefix
    pub fn scan_prefix(
        &self,
        table: TableDefinition<&[u8], &[u8]>,
        prefix: &[u8],
    ) -> Result<ScanResults, StorageError> {
        self.read(|txn| scan_prefix_in(txn, table, prefix))
    }

    /// Count entries with a prefix
    pub fn count_prefix(
        &self,
        table: TableDefinition<&[u8], &[u8]>,
        prefix: &[u8],
    ) -> Result<usize, StorageError> {
        self.scan_prefix(table, prefix).map(|v| v.len())
    }
}

/// Prefix scan within an already open read transaction
pub fn scan_prefix_in(
    txn: &ReadTransaction,
    table: TableDefinition<&[u8], &[u8]>,
    prefix: &[u8],
) -> Result<ScanResults, StorageError> {
    let table = txn.open_table(table)?;
    let mut results = Vec::new();

    // Use range to get all keys >= prefix
    for entry in table.range(prefix..)? {
        let (key, value) = entry?;
        let key_bytes = key.value();

        // Stop when we're past the prefix
        if !key_bytes.starts_with(prefix) {
            break;
        }

        results.push((key_bytes.to_vec(), value.value().to_vec()));
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_storage() -> (RedbStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = RedbStorageConfig {
            db_path: temp_dir.path().join("test.redb"),
        };
        let storage = RedbStorage::open(config).unwrap();
        (storage, temp_dir)
    }

    #[test]
    fn test_put_get() {
        let (storage, _temp) = create_test_storage();

        storage.put(PAYMENTS, b"charge-1", b"value").unwrap();

        let retrieved = storage.get(PAYMENTS, b"charge-1").unwrap();
        assert_eq!(retrieved, Some(b"value".to_vec()));
        assert!(storage.get(PAYMENTS, b"charge-2").unwrap().is_none());
    }

    #[test]
    fn test_insert_if_absent() {
        let (storage, _temp) = create_test_storage();

        assert!(storage.insert_if_absent(VIEWED, b"k", b"").unwrap());
        assert!(!storage.insert_if_absent(VIEWED, b"k", b"").unwrap());
        assert_eq!(storage.count_prefix(VIEWED, b"").unwrap(), 1);
    }

    #[test]
    fn test_failed_write_is_not_committed() {
        let (storage, _temp) = create_test_storage();

        let result: Result<(), StorageError> = storage.write(|txn| {
            let mut table = txn.open_table(PAYMENTS)?;
            table.insert(b"half".as_slice(), b"done".as_slice())?;
            Err(StorageError::not_found("abort"))
        });

        assert!(result.is_err());
        assert!(storage.get(PAYMENTS, b"half").unwrap().is_none());
    }

    #[test]
    fn test_scan_prefix() {
        let (storage, _temp) = create_test_storage();

        storage.put(VIEWED, b"user:alice", b"").unwrap();
        storage.put(VIEWED, b"user:bob", b"").unwrap();
        storage.put(VIEWED, b"user:charlie", b"").unwrap();
        storage.put(VIEWED, b"group:admins", b"").unwrap();

        let users = storage.scan_prefix(VIEWED, b"user:").unwrap();
        assert_eq!(users.len(), 3);

        let groups = storage.scan_prefix(VIEWED, b"group:").unwrap();
        assert_eq!(groups.len(), 1);
    }
}
