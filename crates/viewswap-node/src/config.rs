//! Configuration for the exchange node
//!
//! CLI arguments with environment fallbacks (a `.env` file is loaded first
//! by the binary), converted into a [`NodeConfig`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use viewswap_core::ParticipantId;
use viewswap_engine::EngineConfig;
use viewswap_logging::LogFormat;
use viewswap_storage::ExchangeStorageConfig;

use crate::error::{NodeError, NodeResult};
use crate::announce::{DEFAULT_ANNOUNCEMENTS, render_announcements};
use crate::verifier::DEFAULT_MARKERS;

/// ViewSwap - peer-to-peer engagement exchange node
#[derive(Parser, Debug, Clone)]
#[command(name = "viewswap-node")]
#[command(about = "Peer-to-peer engagement exchange node")]
pub struct Args {
    /// Directory holding the link segments and the participant database
    #[arg(long, env = "VIEWSWAP_DATA_DIR", default_value = "./viewswap-data")]
    pub data_dir: PathBuf,

    /// Address for the HTTP transport adapter
    #[arg(long, env = "VIEWSWAP_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Participant ids created as privileged operators (comma separated)
    #[arg(long, env = "VIEWSWAP_OPERATOR_IDS", value_delimiter = ',')]
    pub operator_ids: Vec<i64>,

    /// Community channel participants must join (required in production)
    #[arg(long, env = "VIEWSWAP_CHANNEL_LINK")]
    pub channel_link: Option<String>,

    /// Link returned by "Explore" (defaults to the channel link)
    #[arg(long, env = "VIEWSWAP_EXPLORE_LINK")]
    pub explore_link: Option<String>,

    /// How-to links shown with the screenshot and submission prompts
    #[arg(long, env = "VIEWSWAP_GUIDE_LINKS", value_delimiter = ',')]
    pub guide_links: Vec<String>,

    /// File listing channel members, one participant id per line
    #[arg(long, env = "VIEWSWAP_ROSTER_FILE")]
    pub roster_file: Option<PathBuf>,

    /// OCR command reading an image on stdin and printing text (required in production)
    #[arg(long, env = "VIEWSWAP_VERIFIER_COMMAND")]
    pub verifier_command: Option<String>,

    /// Phrases the screenshot text must contain (comma separated)
    #[arg(long, env = "VIEWSWAP_VERIFIER_MARKERS", value_delimiter = ',')]
    pub verifier_markers: Vec<String>,

    /// Upper bound for membership checks and screenshot verification
    #[arg(long, env = "VIEWSWAP_COLLABORATOR_TIMEOUT_SECS", default_value = "30")]
    pub collaborator_timeout_secs: u64,

    /// Directory backups are mirrored into (no backups when unset)
    #[arg(long, env = "VIEWSWAP_BACKUP_DIR")]
    pub backup_dir: Option<PathBuf>,

    /// Seconds between scheduled backups
    #[arg(long, env = "VIEWSWAP_BACKUP_INTERVAL_SECS", default_value = "3600")]
    pub backup_interval_secs: u64,

    /// Command posting a message read from stdin to the community channel
    #[arg(long, env = "VIEWSWAP_ANNOUNCE_COMMAND")]
    pub announce_command: Option<String>,

    /// Seconds between channel announcements
    #[arg(long, env = "VIEWSWAP_ANNOUNCE_INTERVAL_SECS", default_value = "3600")]
    pub announce_interval_secs: u64,

    /// Link that opens the exchange, used in channel announcements
    #[arg(long, env = "VIEWSWAP_START_LINK")]
    pub start_link: Option<String>,

    /// Seconds without activity before a resumable session is dropped
    #[arg(long, env = "VIEWSWAP_SESSION_IDLE_SECS", default_value = "86400")]
    pub session_idle_secs: u64,

    /// Shortest required dwell per link, in seconds
    #[arg(long, env = "VIEWSWAP_DWELL_MIN_SECS", default_value = "60")]
    pub dwell_min_secs: u64,

    /// Longest required dwell per link, in seconds
    #[arg(long, env = "VIEWSWAP_DWELL_MAX_SECS", default_value = "90")]
    pub dwell_max_secs: u64,

    /// Payment units per whole point
    #[arg(long, env = "VIEWSWAP_PRICE_PER_POINT", default_value = "1")]
    pub price_per_point: u64,

    /// Links per segment file
    #[arg(long, env = "VIEWSWAP_SEGMENT_CAPACITY", default_value = "10000")]
    pub segment_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Console log format (pretty or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,

    /// Also write rotating JSONL log files here
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Enable development mode (open membership, accept any screenshot)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,
}

impl Args {
    /// Build the node configuration
    pub fn to_node_config(&self) -> NodeConfig {
        let mut engine = EngineConfig::default()
            .with_dwell_range(self.dwell_min_secs, self.dwell_max_secs)
            .with_operators(self.operator_ids.iter().copied().map(ParticipantId::new))
            .with_guide_links(self.guide_links.iter().cloned())
            .with_price_per_point(self.price_per_point)
            .with_collaborator_timeout(Duration::from_secs(self.collaborator_timeout_secs))
            .with_session_idle_timeout(Duration::from_secs(self.session_idle_secs));
        if let Some(channel) = &self.channel_link {
            engine = engine.with_channel_link(channel.clone());
        }
        if let Some(explore) = &self.explore_link {
            engine = engine.with_explore_link(explore.clone());
        }

        let mut config = NodeConfig::with_data_dir(&self.data_dir)
            .with_engine(engine)
            .with_segment_capacity(self.segment_capacity)
            .with_listen(self.listen)
            .with_backup_interval(Duration::from_secs(self.backup_interval_secs));
        config.backup_dir = self.backup_dir.clone();
        config.roster_file = self.roster_file.clone();
        config.verifier_command = self.verifier_command.clone();
        if !self.verifier_markers.is_empty() {
            config.verifier_markers = self.verifier_markers.clone();
        }
        config.announce_command = self.announce_command.clone();
        config.announce_interval = Duration::from_secs(self.announce_interval_secs);
        config.start_link = self.start_link.clone();
        config.dev_mode = self.dev_mode;
        config
    }
}

/// Configuration for a ViewSwapNode
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Base directory for all node data
    pub data_dir: PathBuf,
    /// HTTP listen address
    pub listen: SocketAddr,
    /// Exchange rules
    pub engine: EngineConfig,
    /// Storage configuration
    pub storage: ExchangeStorageConfig,
    /// Mirror destination for backups
    pub backup_dir: Option<PathBuf>,
    /// Time between scheduled backups
    pub backup_interval: Duration,
    /// Channel roster file
    pub roster_file: Option<PathBuf>,
    /// OCR command line, split on whitespace
    pub verifier_command: Option<String>,
    /// Phrases a valid screenshot must contain
    pub verifier_markers: Vec<String>,
    /// Channel announcement command line, split on whitespace
    pub announce_command: Option<String>,
    /// Time between channel announcements
    pub announce_interval: Duration,
    /// Link substituted for `{start_link}` in announcements
    pub start_link: Option<String>,
    /// Announcement rotation templates
    pub announcements: Vec<String>,
    /// Time between idle session sweeps
    pub session_sweep_interval: Duration,
    /// Development mode
    pub dev_mode: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::with_data_dir("./viewswap-data")
    }
}

impl NodeConfig {
    /// Create a configuration with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            storage: ExchangeStorageConfig::with_base_dir(&data_dir),
            data_dir,
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            engine: EngineConfig::default(),
            backup_dir: None,
            backup_interval: Duration::from_secs(3600),
            roster_file: None,
            verifier_command: None,
            verifier_markers: DEFAULT_MARKERS.iter().map(|m| m.to_string()).collect(),
            announce_command: None,
            announce_interval: Duration::from_secs(3600),
            start_link: None,
            announcements: DEFAULT_ANNOUNCEMENTS.iter().map(|m| m.to_string()).collect(),
            session_sweep_interval: Duration::from_secs(10 * 60),
            dev_mode: false,
        }
    }

    /// Set the exchange rules
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Set the number of links per segment file
    pub fn with_segment_capacity(mut self, capacity: usize) -> Self {
        self.storage = self.storage.with_segment_capacity(capacity);
        self
    }

    pub fn with_listen(mut self, listen: SocketAddr) -> Self {
        self.listen = listen;
        self
    }

    /// Mirror backups into `dir`
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    pub fn with_backup_interval(mut self, interval: Duration) -> Self {
        self.backup_interval = interval;
        self
    }

    /// Post channel announcements through `command`
    pub fn with_announcements(
        mut self,
        command: impl Into<String>,
        start_link: impl Into<String>,
        interval: Duration,
    ) -> Self {
        self.announce_command = Some(command.into());
        self.start_link = Some(start_link.into());
        self.announce_interval = interval;
        self
    }

    pub fn with_session_sweep_interval(mut self, interval: Duration) -> Self {
        self.session_sweep_interval = interval;
        self
    }

    /// Announcement texts with the start link filled in
    pub fn rendered_announcements(&self) -> Vec<String> {
        let start_link = self.start_link.as_deref().unwrap_or_default();
        render_announcements(self.announcements.iter().map(String::as_str), start_link)
    }

    /// Enable development mode
    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    /// Where backup copies are staged before mirroring
    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join("backup-staging")
    }

    /// Check the configuration before accepting any action
    pub fn validate(&self) -> NodeResult<()> {
        self.engine.validate()?;

        if !self.dev_mode {
            if self.engine.channel_link.is_none() {
                return Err(NodeError::config(
                    "VIEWSWAP_CHANNEL_LINK is required in production mode",
                ));
            }
            if self.verifier_command.is_none() {
                return Err(NodeError::config(
                    "VIEWSWAP_VERIFIER_COMMAND is required in production mode",
                ));
            }
            if self.roster_file.is_none() {
                return Err(NodeError::config(
                    "VIEWSWAP_ROSTER_FILE is required in production mode",
                ));
            }
        }

        if self
            .verifier_command
            .as_deref()
            .is_some_and(|command| command.split_whitespace().next().is_none())
        {
            return Err(NodeError::config("verifier command is empty"));
        }
        if self.backup_interval.is_zero() {
            return Err(NodeError::config("backup interval must be positive"));
        }
        if let Some(command) = &self.announce_command {
            if command.split_whitespace().next().is_none() {
                return Err(NodeError::config("announce command is empty"));
            }
            if self.start_link.is_none() {
                return Err(NodeError::config(
                    "VIEWSWAP_START_LINK is required when announcements are enabled",
                ));
            }
            if self.announce_interval.is_zero() {
                return Err(NodeError::config("announce interval must be positive"));
            }
        }
        if self.session_sweep_interval.is_zero() {
            return Err(NodeError::config("session sweep interval must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["viewswap-node"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_production_requires_channel_and_verifier() {
        let config = parse(&[]).to_node_config();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("VIEWSWAP_CHANNEL_LINK"));

        let config = parse(&["--channel-link", "https://t.me/viewswap"]).to_node_config();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("VIEWSWAP_VERIFIER_COMMAND"));

        let config = parse(&[
            "--channel-link",
            "https://t.me/viewswap",
            "--verifier-command",
            "tesseract stdin stdout",
            "--roster-file",
            "/etc/viewswap/roster.txt",
        ])
        .to_node_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_dev_mode_needs_nothing() {
        let config = parse(&["--dev-mode"]).to_node_config();
        assert!(config.dev_mode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lists_and_rules() {
        let config = parse(&[
            "--dev-mode",
            "--operator-ids",
            "100,200",
            "--guide-links",
            "https://youtu.be/a,https://youtu.be/b",
            "--dwell-min-secs",
            "30",
            "--dwell-max-secs",
            "45",
            "--log-format",
            "pretty",
        ]);
        assert_eq!(config.log_format, LogFormat::Pretty);

        let node = config.to_node_config();
        assert!(node.engine.is_operator(ParticipantId::new(200)));
        assert!(!node.engine.is_operator(ParticipantId::new(1)));
        assert_eq!(node.engine.guide_links.len(), 2);
        assert_eq!(node.engine.dwell_min_secs, 30);
        assert_eq!(node.engine.dwell_max_secs, 45);
        assert_eq!(node.verifier_markers.len(), DEFAULT_MARKERS.len());
    }

    #[test]
    fn test_inverted_dwell_rejected() {
        let config = parse(&["--dev-mode", "--dwell-min-secs", "90", "--dwell-max-secs", "60"])
            .to_node_config();
        assert!(matches!(config.validate(), Err(NodeError::Engine(_))));
    }

    #[test]
    fn test_announcements_need_start_link() {
        let config = parse(&["--dev-mode", "--announce-command", "post-to-channel"]).to_node_config();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("VIEWSWAP_START_LINK"));

        let config = parse(&[
            "--dev-mode",
            "--announce-command",
            "post-to-channel",
            "--start-link",
            "https://t.me/viewswap_bot",
            "--announce-interval-secs",
            "1800",
            "--session-idle-secs",
            "600",
        ])
        .to_node_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.announce_interval, Duration::from_secs(1800));
        assert_eq!(config.engine.session_idle_timeout, Duration::from_secs(600));

        let rendered = config.rendered_announcements();
        assert_eq!(rendered.len(), DEFAULT_ANNOUNCEMENTS.len());
        assert!(rendered[0].contains("https://t.me/viewswap_bot"));
    }

    #[test]
    fn test_storage_follows_data_dir() {
        let config = NodeConfig::with_data_dir("/srv/viewswap").with_segment_capacity(500);
        assert_eq!(config.storage.base_dir, PathBuf::from("/srv/viewswap"));
        assert_eq!(config.storage.links.segment_capacity, 500);
        assert_eq!(config.staging_dir(), PathBuf::from("/srv/viewswap/backup-staging"));
    }
}
