//! Channel membership oracles

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use viewswap_core::{CollaboratorError, MembershipOracle, ParticipantId};

/// Membership read from a roster file
///
/// One participant id per line; blank lines and `#` comments are skipped.
/// The file is re-read on every check so an external exporter can refresh it
/// without restarting the node.
#[derive(Debug, Clone)]
pub struct RosterMembership {
    path: PathBuf,
}

impl RosterMembership {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<Vec<ParticipantId>, CollaboratorError> {
        let contents = tokio::fs::read_to_string(&self.path).await?;
        let mut members = Vec::new();
        for line in contents.lines() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            match line.parse::<ParticipantId>() {
                Ok(id) => members.push(id),
                Err(_) => debug!(line, "Skipping malformed roster entry"),
            }
        }
        Ok(members)
    }
}

#[async_trait]
impl MembershipOracle for RosterMembership {
    async fn is_member(&self, participant: ParticipantId) -> Result<bool, CollaboratorError> {
        Ok(self.load().await?.contains(&participant))
    }
}

/// Development oracle treating everyone as a member
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenMembership;

#[async_trait]
impl MembershipOracle for OpenMembership {
    async fn is_member(&self, _participant: ParticipantId) -> Result<bool, CollaboratorError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_roster(contents: &str) -> (RosterMembership, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("roster.txt");
        std::fs::write(&path, contents).unwrap();
        (RosterMembership::new(path), temp_dir)
    }

    #[tokio::test]
    async fn test_roster_lookup() {
        let (roster, _temp) = create_test_roster("# members\n42\n\n  7  # added by hand\nnot-an-id\n");

        assert!(roster.is_member(ParticipantId::new(42)).await.unwrap());
        assert!(roster.is_member(ParticipantId::new(7)).await.unwrap());
        assert!(!roster.is_member(ParticipantId::new(8)).await.unwrap());
    }

    #[tokio::test]
    async fn test_roster_reloaded_on_each_check() {
        let (roster, temp) = create_test_roster("1\n");
        assert!(!roster.is_member(ParticipantId::new(2)).await.unwrap());

        std::fs::write(temp.path().join("roster.txt"), "1\n2\n").unwrap();
        assert!(roster.is_member(ParticipantId::new(2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_roster_is_error() {
        let roster = RosterMembership::new("/nonexistent/roster.txt");
        tokio_test::assert_err!(roster.is_member(ParticipantId::new(1)).await);
    }

    #[tokio::test]
    async fn test_open_membership() {
        assert!(OpenMembership.is_member(ParticipantId::new(9)).await.unwrap());
    }
}
