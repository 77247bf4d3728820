//! Screenshot verification through an external OCR command

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use viewswap_core::{CollaboratorError, IdentityVerifier};

/// Phrases found on the account settings screen of a logged-in user
pub const DEFAULT_MARKERS: [&str; 3] = ["installation id", "version", "sign out"];

/// Runs an OCR command over the uploaded image
///
/// The image is written to the command's stdin; its stdout is the
/// recognized text. A screenshot passes when the text contains every marker,
/// ignoring case. The engine bounds the call with its collaborator timeout,
/// and the child is killed when that future is dropped.
pub struct CommandVerifier {
    program: String,
    args: Vec<String>,
    markers: Vec<String>,
}

impl CommandVerifier {
    /// Build from a whitespace-separated command line
    pub fn from_command_line(
        command: &str,
        markers: impl IntoIterator<Item = String>,
    ) -> Result<Self, CollaboratorError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| CollaboratorError::Unavailable("empty verifier command".into()))?;
        Ok(Self {
            program,
            args: parts.collect(),
            markers: markers
                .into_iter()
                .map(|m| m.trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        })
    }

    fn matches(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.markers.iter().all(|marker| text.contains(marker.as_str()))
    }
}

#[async_trait]
impl IdentityVerifier for CommandVerifier {
    async fn verify(&self, image: &[u8]) -> Result<bool, CollaboratorError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        // Feed stdin while draining stdout so large images cannot fill both pipes.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(image).await?;
                stdin.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        if let Err(e) = fed {
            // The command may legitimately stop reading early.
            debug!(error = %e, "Verifier closed stdin early");
        }
        if !output.status.success() {
            warn!(program = %self.program, status = %output.status, "Verifier command failed");
            return Err(CollaboratorError::Unavailable(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let verified = self.matches(&text);
        debug!(chars = text.len(), verified, "Screenshot text checked");
        Ok(verified)
    }
}

/// Development verifier accepting any non-empty upload
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenVerifier;

#[async_trait]
impl IdentityVerifier for OpenVerifier {
    async fn verify(&self, image: &[u8]) -> Result<bool, CollaboratorError> {
        Ok(!image.is_empty())
    }
}
