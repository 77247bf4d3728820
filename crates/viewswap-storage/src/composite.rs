//! Composite storage combining the link log and the redb tables
//!
//! This module provides [`ExchangeStorage`], which opens everything the
//! exchange persists under one data directory:
//!
//! ```text
//! <data_dir>/
//!   viewswap.redb          participants, viewed, payments
//!   links/links-000001.seg append-only link segments
//!   links/links-000002.seg ...
//! ```
//!
//! It also prepares backups: link segments are copied as they are, and the
//! redb tables are exported to one JSON snapshot taken from a single read
//! transaction, so the export is consistent without pausing writers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use viewswap_core::{LinkId, ParticipantId};

use crate::append_log::{LinkLogConfig, SegmentedLinkLog};
use crate::error::StorageError;
use crate::structured::{
    PARTICIPANTS, PAYMENTS, ParticipantStore, PaymentRecord, RedbStorage, RedbStorageConfig,
    VIEWED, ViewedStore, decode_record, scan_prefix_in, split_viewed_key,
};
use crate::ParticipantRecord;

/// File name of the exported redb snapshot
pub const SNAPSHOT_FILE_NAME: &str = "viewswap-snapshot.json";

/// Configuration for composite storage
#[derive(Debug, Clone)]
pub struct ExchangeStorageConfig {
    /// Base directory for all storage
    pub base_dir: PathBuf,
    /// Link log configuration
    pub links: LinkLogConfig,
    /// redb configuration
    pub redb: RedbStorageConfig,
}

impl Default for ExchangeStorageConfig {
    fn default() -> Self {
        Self::with_base_dir("./data")
    }
}

impl ExchangeStorageConfig {
    /// Create a configuration with a custom base directory
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            base_dir: base_dir.clone(),
            links: LinkLogConfig {
                base_dir: base_dir.join("links"),
                ..Default::default()
            },
            redb: RedbStorageConfig {
                db_path: base_dir.join("viewswap.redb"),
            },
        }
    }

    /// Override the number of links per segment
    pub fn with_segment_capacity(mut self, capacity: usize) -> Self {
        self.links.segment_capacity = capacity;
        self
    }
}

/// Consistent export of the redb tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    pub taken_at: DateTime<Utc>,
    pub participants: Vec<ParticipantRecord>,
    pub viewed: Vec<(ParticipantId, LinkId)>,
    pub payments: Vec<PaymentRecord>,
}

/// A file ready to be handed to a backup sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupFile {
    /// Name to store the file under at the destination
    pub name: String,
    /// Local path of the prepared copy
    pub path: PathBuf,
}

/// All exchange storage under one directory
pub struct ExchangeStorage {
    links: Arc<SegmentedLinkLog>,
    redb: Arc<RedbStorage>,
    participants: Arc<ParticipantStore>,
    viewed: Arc<ViewedStore>,
    config: ExchangeStorageConfig,
}

impl ExchangeStorage {
    /// Open (or create) all storage
    #[instrument(skip(config), fields(base_dir = %config.base_dir.display()))]
    pub async fn open(config: ExchangeStorageConfig) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(&config.base_dir).await?;

        let redb = Arc::new(RedbStorage::open(config.redb.clone())?);
        let participants = Arc::new(ParticipantStore::new(redb.clone()));
        let viewed = Arc::new(ViewedStore::new(redb.clone()));
        let links = Arc::new(SegmentedLinkLog::open(config.links.clone()).await?);

        info!("Exchange storage opened");

        Ok(Self {
            links,
            redb,
            participants,
            viewed,
            config,
        })
    }

    pub fn links(&self) -> Arc<SegmentedLinkLog> {
        self.links.clone()
    }

    pub fn participants(&self) -> Arc<ParticipantStore> {
        self.participants.clone()
    }

    pub fn viewed(&self) -> Arc<ViewedStore> {
        self.viewed.clone()
    }

    pub fn config(&self) -> &ExchangeStorageConfig {
        &self.config
    }

    /// Export the redb tables from one read transaction
    pub fn snapshot(&self) -> Result<StorageSnapshot, StorageError> {
        self.redb.read(|txn| {
            let participants = scan_prefix_in(txn, PARTICIPANTS, &[])?
                .into_iter()
                .map(|(_, value)| decode_record(&value))
                .collect::<Result<Vec<_>, _>>()?;
            let viewed = scan_prefix_in(txn, VIEWED, &[])?
                .into_iter()
                .map(|(key, _)| split_viewed_key(&key))
                .collect::<Result<Vec<_>, _>>()?;
            let payments = scan_prefix_in(txn, PAYMENTS, &[])?
                .into_iter()
                .map(|(_, value)| {
                    postcard::from_bytes::<PaymentRecord>(&value).map_err(StorageError::from)
                })
                .collect::<Result<Vec<_>, _>>()?;

            Ok(StorageSnapshot {
                taken_at: Utc::now(),
                participants,
                viewed,
                payments,
            })
        })
    }

    /// Copy everything worth backing up into `staging_dir`
    ///
    /// Returns the prepared files in the order they should be mirrored:
    /// link segments first, then the table snapshot.
    #[instrument(skip(self, staging_dir))]
    pub async fn prepare_backup(&self, staging_dir: &Path) -> Result<Vec<BackupFile>, StorageError> {
        let mut files: Vec<BackupFile> = self
            .links
            .copy_segments_to(staging_dir)
            .await?
            .into_iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_str()?.to_string();
                Some(BackupFile { name, path })
            })
            .collect();

        let snapshot = self.snapshot()?;
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let path = staging_dir.join(SNAPSHOT_FILE_NAME);
        tokio::fs::write(&path, json).await?;
        files.push(BackupFile {
            name: SNAPSHOT_FILE_NAME.to_string(),
            path,
        });

        debug!(
            files = files.len(),
            participants = snapshot.participants.len(),
            "Backup prepared"
        );
        Ok(files)
    }
}
