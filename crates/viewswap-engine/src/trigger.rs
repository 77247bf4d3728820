//! On-demand backup requests
//!
//! The engine never mirrors files itself. It drops a request into a small
//! channel and the backup task picks it up; a full channel means a mirror
//! is already pending, so the request is simply dropped.

use std::fmt::{self, Display};

use tokio::sync::mpsc;
use tracing::debug;

/// Why a mirror was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackupReason {
    Startup,
    Scheduled,
    LinkSubmitted,
    Shutdown,
}

impl Display for BackupReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackupReason::Startup => "startup",
            BackupReason::Scheduled => "scheduled",
            BackupReason::LinkSubmitted => "link_submitted",
            BackupReason::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Sending half handed to the engine
#[derive(Debug, Clone)]
pub struct BackupTrigger {
    tx: mpsc::Sender<BackupReason>,
}

impl BackupTrigger {
    /// Create a trigger and the receiver the backup task listens on
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<BackupReason>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Ask for a mirror without waiting
    ///
    /// Returns `false` when the request was dropped.
    pub fn request(&self, reason: BackupReason) -> bool {
        match self.tx.try_send(reason) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(%reason, "Backup already pending, request coalesced");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(%reason, "Backup task gone, request dropped");
                false
            }
        }
    }
}
