//! Scheduled promotional posts to the community channel
//!
//! Every interval the task posts the next message of a fixed rotation,
//! starting from a random position. A failed post is logged and the rotation
//! moves on; the next tick tries the next message.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use viewswap_core::{ChannelAnnouncer, CollaboratorError};

/// Replaced with the link that opens the exchange
pub const START_LINK_PLACEHOLDER: &str = "{start_link}";

/// Rotation posted when no custom messages are configured
pub const DEFAULT_ANNOUNCEMENTS: [&str; 4] = [
    "ViewSwap helps your news stories get seen!\n\n\
     - Post your links and get real views from other members.\n\
     - Gain points by viewing their links.\n\
     - Buy points for even more exposure.\n\n\
     Start here: {start_link}",
    "Boost your news stories!\n\n\
     1. Share your links\n\
     2. Earn points by helping others\n\
     3. Spend points to get more views\n\n\
     Start now: {start_link}",
    "Want more views on your news stories?\n\n\
     ViewSwap lets you exchange views with real members.\n\
     Join in: {start_link}",
    "How ViewSwap works:\n\n\
     - Post your news link\n\
     - View other members' links\n\
     - Earn and spend points\n\n\
     Start: {start_link}",
];

/// Fill the start link into every template
pub fn render_announcements<'a>(
    templates: impl IntoIterator<Item = &'a str>,
    start_link: &str,
) -> Vec<String> {
    templates
        .into_iter()
        .map(|template| template.replace(START_LINK_PLACEHOLDER, start_link))
        .collect()
}

/// Posts announcements through an external command
///
/// The text is written to the command's stdin, so any script that reads a
/// message and posts it to the channel works.
pub struct CommandAnnouncer {
    program: String,
    args: Vec<String>,
}

impl CommandAnnouncer {
    /// Build from a whitespace-separated command line
    pub fn from_command_line(command: &str) -> Result<Self, CollaboratorError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| CollaboratorError::Unavailable("empty announce command".into()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl ChannelAnnouncer for CommandAnnouncer {
    async fn announce(&self, text: &str) -> Result<(), CollaboratorError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let written = async {
                stdin.write_all(text.as_bytes()).await?;
                stdin.shutdown().await
            };
            if let Err(e) = written.await {
                // The exit status below decides the outcome
                debug!(error = %e, "Announce command closed stdin early");
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(CollaboratorError::Unavailable(format!(
                "{} exited with {}",
                self.program, status
            )));
        }
        Ok(())
    }
}

/// Background task posting the rotation on a fixed interval
pub struct AnnounceTask {
    announcer: Arc<dyn ChannelAnnouncer>,
    messages: Vec<String>,
    interval: Duration,
    /// Upper bound for one post
    timeout: Duration,
    next: usize,
    shutdown_rx: broadcast::Receiver<()>,
}

impl AnnounceTask {
    pub fn new(
        announcer: Arc<dyn ChannelAnnouncer>,
        messages: Vec<String>,
        interval: Duration,
        timeout: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let next = if messages.is_empty() {
            0
        } else {
            rand::rng().random_range(0..messages.len())
        };
        Self {
            announcer,
            messages,
            interval,
            timeout,
            next,
            shutdown_rx,
        }
    }

    /// Spawn the task
    pub fn spawn(
        announcer: Arc<dyn ChannelAnnouncer>,
        messages: Vec<String>,
        interval: Duration,
        timeout: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let task = Self::new(announcer, messages, interval, timeout, shutdown_rx);
        tokio::spawn(async move {
            task.run().await;
        })
    }

    async fn run(mut self) {
        if self.messages.is_empty() {
            warn!("No channel announcements configured, task not running");
            return;
        }
        info!(
            interval_secs = self.interval.as_secs(),
            messages = self.messages.len(),
            "Announce task started"
        );

        let mut interval = tokio::time::interval_at(Instant::now() + self.interval, self.interval);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Announce task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.post_next().await;
                }
            }
        }
    }

    async fn post_next(&mut self) {
        let index = self.next % self.messages.len();
        self.next = index + 1;

        let text = &self.messages[index];
        match tokio::time::timeout(self.timeout, self.announcer.announce(text)).await {
            Ok(Ok(())) => debug!(index, "Channel announcement posted"),
            Ok(Err(e)) => warn!(index, error = %e, "Channel announcement failed"),
            Err(_) => warn!(
                index,
                timeout_ms = self.timeout.as_millis() as u64,
                "Channel announcement timed out"
            ),
        }
    }
}
