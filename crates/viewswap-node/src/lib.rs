//! # ViewSwap Node
//!
//! Runs the exchange as a service.
//!
//! This crate provides [`ViewSwapNode`], which ties together:
//! - Storage (segmented link log + redb tables)
//! - The exchange engine and its collaborators
//! - An HTTP transport adapter for a chat gateway
//! - A background backup task mirroring persisted files
//! - Idle session sweeps and optional channel announcements
//!
//! ## Example
//!
//! ```rust,ignore
//! use viewswap_node::{NodeConfig, ViewSwapNode};
//!
//! let config = NodeConfig::with_data_dir("./viewswap-data").with_dev_mode(true);
//! let node = ViewSwapNode::new(config).await?;
//! node.start().await?;
//!
//! let listener = tokio::net::TcpListener::bind(node.config().listen).await?;
//! axum::serve(listener, node.router()).await?;
//!
//! node.stop().await?;
//! ```

pub mod announce;
pub mod backup;
pub mod config;
mod error;
pub mod http;
pub mod membership;
pub mod sweep;
pub mod verifier;

pub use announce::{AnnounceTask, CommandAnnouncer, DEFAULT_ANNOUNCEMENTS};
pub use backup::{BackupTask, DirectoryMirrorSink};
pub use config::{Args, NodeConfig};
pub use error::{NodeError, NodeResult};
pub use http::{ActionResponse, HealthResponse, HttpState, OutboxRenderer, RenderedMessage};
pub use membership::{OpenMembership, RosterMembership};
pub use sweep::SessionSweepTask;
pub use verifier::{CommandVerifier, DEFAULT_MARKERS, OpenVerifier};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use viewswap_core::{BackupSink, ChannelAnnouncer, IdentityVerifier, MembershipOracle};
use viewswap_engine::{BackupReason, BackupTrigger, Collaborators, ExchangeEngine, Ledgers};
use viewswap_storage::ExchangeStorage;

/// Pending backup requests buffered between the engine and the backup task
const BACKUP_REQUEST_CAPACITY: usize = 32;

/// A running exchange
pub struct ViewSwapNode {
    config: NodeConfig,
    storage: Arc<ExchangeStorage>,
    engine: Arc<ExchangeEngine>,
    outbox: Arc<OutboxRenderer>,
    backup_sink: Option<Arc<dyn BackupSink>>,
    backup_requests: Mutex<Option<mpsc::Receiver<BackupReason>>>,
    announcer: Option<Arc<dyn ChannelAnnouncer>>,
    shutdown_tx: broadcast::Sender<()>,
    background_tasks: RwLock<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl ViewSwapNode {
    /// Open storage and wire collaborators from the configuration
    ///
    /// Development mode admits everyone and accepts any non-empty screenshot;
    /// otherwise membership comes from the roster file and screenshots go
    /// through the verifier command.
    pub async fn new(config: NodeConfig) -> NodeResult<Self> {
        config.validate()?;

        let (membership, verifier): (Arc<dyn MembershipOracle>, Arc<dyn IdentityVerifier>) =
            if config.dev_mode {
                warn!("Development mode: membership and screenshots are not checked");
                (Arc::new(OpenMembership), Arc::new(OpenVerifier))
            } else {
                let roster = config
                    .roster_file
                    .clone()
                    .ok_or_else(|| NodeError::config("roster file is required"))?;
                let command = config
                    .verifier_command
                    .as_deref()
                    .ok_or_else(|| NodeError::config("verifier command is required"))?;
                let verifier =
                    CommandVerifier::from_command_line(command, config.verifier_markers.clone())?;
                (Arc::new(RosterMembership::new(roster)), Arc::new(verifier))
            };

        let backup_sink = config
            .backup_dir
            .clone()
            .map(|dir| Arc::new(DirectoryMirrorSink::new(dir)) as Arc<dyn BackupSink>);

        Self::with_collaborators(config, membership, verifier, backup_sink).await
    }

    /// Open storage with explicit collaborators
    #[instrument(skip_all, fields(data_dir = %config.data_dir.display()))]
    pub async fn with_collaborators(
        config: NodeConfig,
        membership: Arc<dyn MembershipOracle>,
        verifier: Arc<dyn IdentityVerifier>,
        backup_sink: Option<Arc<dyn BackupSink>>,
    ) -> NodeResult<Self> {
        let storage = Arc::new(ExchangeStorage::open(config.storage.clone()).await?);
        let outbox = Arc::new(OutboxRenderer::new());

        let mut engine = ExchangeEngine::new(
            config.engine.clone(),
            Ledgers::from_storage(&storage),
            Collaborators {
                renderer: outbox.clone(),
                membership,
                verifier,
            },
        )?;

        let mut backup_requests = None;
        if backup_sink.is_some() {
            let (trigger, requests) = BackupTrigger::channel(BACKUP_REQUEST_CAPACITY);
            engine = engine.with_backup_trigger(trigger);
            backup_requests = Some(requests);
        }

        let announcer = config
            .announce_command
            .as_deref()
            .map(CommandAnnouncer::from_command_line)
            .transpose()?
            .map(|announcer| Arc::new(announcer) as Arc<dyn ChannelAnnouncer>);

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(
            dev_mode = config.dev_mode,
            backups = backup_sink.is_some(),
            announcements = announcer.is_some(),
            "Node created"
        );

        Ok(Self {
            config,
            storage,
            engine: Arc::new(engine),
            outbox,
            backup_sink,
            backup_requests: Mutex::new(backup_requests),
            announcer,
            shutdown_tx,
            background_tasks: RwLock::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Post channel announcements through `announcer` instead of the
    /// configured command
    pub fn with_announcer(mut self, announcer: Arc<dyn ChannelAnnouncer>) -> Self {
        self.announcer = Some(announcer);
        self
    }

    /// Start background tasks
    pub async fn start(&self) -> NodeResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyStarted);
        }

        if let Some(sink) = &self.backup_sink {
            match self.backup_requests.lock().await.take() {
                Some(requests) => {
                    let task = BackupTask::spawn(
                        self.storage.clone(),
                        sink.clone(),
                        self.config.staging_dir(),
                        self.config.backup_interval,
                        self.config.engine.collaborator_timeout,
                        requests,
                        self.shutdown_tx.subscribe(),
                    );
                    self.background_tasks.write().await.push(task);
                }
                None => warn!("Backup task already ran; backups stay off after a restart"),
            }
        }

        let sweep = SessionSweepTask::spawn(
            self.engine.clone(),
            self.config.session_sweep_interval,
            self.shutdown_tx.subscribe(),
        );
        self.background_tasks.write().await.push(sweep);

        if let Some(announcer) = &self.announcer {
            if self.config.start_link.is_some() {
                let task = AnnounceTask::spawn(
                    announcer.clone(),
                    self.config.rendered_announcements(),
                    self.config.announce_interval,
                    self.config.engine.collaborator_timeout,
                    self.shutdown_tx.subscribe(),
                );
                self.background_tasks.write().await.push(task);
            } else {
                warn!("No start link configured; channel announcements are off");
            }
        }

        info!(listen = %self.config.listen, "Node started");
        Ok(())
    }

    /// Stop background tasks, waiting for the final backup
    pub async fn stop(&self) -> NodeResult<()> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let _ = self.shutdown_tx.send(());

        let mut tasks = self.background_tasks.write().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }

        info!("Node stopped");
        Ok(())
    }

    /// HTTP routes for the chat gateway
    pub fn router(&self) -> Router {
        http::router(HttpState {
            engine: self.engine.clone(),
            outbox: self.outbox.clone(),
            links: self.engine.ledgers().links.clone(),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<ExchangeEngine> {
        &self.engine
    }

    /// Messages rendered but not yet drained by the gateway
    pub fn outbox(&self) -> &Arc<OutboxRenderer> {
        &self.outbox
    }

    pub fn storage(&self) -> &Arc<ExchangeStorage> {
        &self.storage
    }

    /// Check if the node is started
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}
