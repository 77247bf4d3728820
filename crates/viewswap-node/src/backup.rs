//! Background backup task
//!
//! Handles:
//! - A full backup at startup
//! - Scheduled backups on a fixed interval
//! - Backups requested by the engine after a link submission
//! - A final backup at shutdown
//!
//! Each backup stages the link segments and a table snapshot, then mirrors
//! every staged file to the configured [`BackupSink`]. Failed backups back off
//! exponentially before honoring further requests; scheduled ticks always try.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use viewswap_core::{BackupSink, CollaboratorError};
use viewswap_engine::BackupReason;
use viewswap_storage::ExchangeStorage;

use crate::error::NodeResult;

/// Tracks failures for backoff between backup attempts.
struct BackupState {
    consecutive_failures: u32,
    last_attempt: Option<Instant>,
}

impl BackupState {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            last_attempt: None,
        }
    }

    /// Exponential backoff: 2^failures seconds, capped at 64s (2^6).
    fn backoff_duration(&self) -> Duration {
        Duration::from_secs(2u64.pow(self.consecutive_failures.min(6)))
    }

    fn should_retry(&self) -> bool {
        if self.consecutive_failures == 0 {
            return true;
        }
        self.last_attempt
            .is_none_or(|at| at.elapsed() >= self.backoff_duration())
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.last_attempt = Some(Instant::now());
    }

    fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_attempt = Some(Instant::now());
    }
}

/// Background backup task
pub struct BackupTask {
    storage: Arc<ExchangeStorage>,
    sink: Arc<dyn BackupSink>,
    /// Where files are copied before mirroring
    staging_dir: PathBuf,
    interval: Duration,
    /// Upper bound for mirroring one file
    mirror_timeout: Duration,
    requests: mpsc::Receiver<BackupReason>,
    shutdown_rx: broadcast::Receiver<()>,
    state: BackupState,
}

impl BackupTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<ExchangeStorage>,
        sink: Arc<dyn BackupSink>,
        staging_dir: PathBuf,
        interval: Duration,
        mirror_timeout: Duration,
        requests: mpsc::Receiver<BackupReason>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            storage,
            sink,
            staging_dir,
            interval,
            mirror_timeout,
            requests,
            shutdown_rx,
            state: BackupState::new(),
        }
    }

    /// Spawn the task
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        storage: Arc<ExchangeStorage>,
        sink: Arc<dyn BackupSink>,
        staging_dir: PathBuf,
        interval: Duration,
        mirror_timeout: Duration,
        requests: mpsc::Receiver<BackupReason>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let task = Self::new(
            storage,
            sink,
            staging_dir,
            interval,
            mirror_timeout,
            requests,
            shutdown_rx,
        );

        tokio::spawn(async move {
            task.run().await;
        })
    }

    async fn run(mut self) {
        info!(interval_secs = self.interval.as_secs(), "Backup task started");

        self.attempt(BackupReason::Startup).await;

        let mut interval = tokio::time::interval_at(Instant::now() + self.interval, self.interval);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    self.attempt(BackupReason::Shutdown).await;
                    info!("Backup task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.attempt(BackupReason::Scheduled).await;
                }
                Some(reason) = self.requests.recv() => {
                    if self.state.should_retry() {
                        self.attempt(reason).await;
                    } else {
                        debug!(
                            %reason,
                            backoff_secs = self.state.backoff_duration().as_secs(),
                            "Backup request skipped during backoff"
                        );
                    }
                }
            }
        }
    }

    async fn attempt(&mut self, reason: BackupReason) {
        match self.backup(reason).await {
            Ok(files) => {
                self.state.record_success();
                info!(%reason, files, "Backup mirrored");
            }
            Err(e) => {
                self.state.record_failure();
                error!(
                    %reason,
                    error = %e,
                    failures = self.state.consecutive_failures,
                    "Backup failed"
                );
            }
        }
    }

    /// Stage and mirror every file, returning how many were mirrored
    #[instrument(skip(self), fields(staging = %self.staging_dir.display()))]
    async fn backup(&self, reason: BackupReason) -> NodeResult<usize> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let files = self.storage.prepare_backup(&self.staging_dir).await?;

        for file in &files {
            tokio::time::timeout(self.mirror_timeout, self.sink.mirror(&file.name, &file.path))
                .await
                .map_err(|_| CollaboratorError::Timeout(self.mirror_timeout))??;
        }
        Ok(files.len())
    }
}

/// Mirrors backups into a local (or mounted) directory
///
/// Files are written under a temporary name and renamed into place, so the
/// destination never holds a partially written copy.
#[derive(Debug, Clone)]
pub struct DirectoryMirrorSink {
    directory: PathBuf,
}

impl DirectoryMirrorSink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

#[async_trait]
impl BackupSink for DirectoryMirrorSink {
    async fn mirror(&self, file_name: &str, path: &Path) -> Result<(), CollaboratorError> {
        tokio::fs::create_dir_all(&self.directory).await?;

        let temp = self.directory.join(format!(".{file_name}.tmp"));
        let target = self.directory.join(file_name);
        if let Err(e) = tokio::fs::copy(path, &temp).await {
            warn!(file = file_name, error = %e, "Backup copy failed");
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        tokio::fs::rename(&temp, &target).await?;
        Ok(())
    }
}
