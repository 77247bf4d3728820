//! Exchange rules

use std::collections::HashSet;
use std::time::Duration;

use viewswap_core::{ParticipantId, Points};
use viewswap_storage::RetryPolicy;

use crate::error::{EngineError, EngineResult};

/// Configuration for the exchange engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Shortest required dwell per link, in seconds
    pub dwell_min_secs: u64,
    /// Longest required dwell per link, in seconds (inclusive)
    pub dwell_max_secs: u64,
    /// Credit for one verified view
    pub view_credit: Points,
    /// Debit for one link submission by a regular participant
    pub submission_cost: Points,
    /// Payment units per whole point
    pub price_per_point: u64,
    /// Participants created as privileged
    pub operator_ids: HashSet<ParticipantId>,
    /// Community channel participants must join
    pub channel_link: Option<String>,
    /// Link returned by "Explore" (falls back to the channel link)
    pub explore_link: Option<String>,
    /// How-to links shown with the screenshot and submission prompts
    pub guide_links: Vec<String>,
    /// Currency code for point invoices
    pub invoice_currency: String,
    /// Upper bound for membership checks and screenshot verification
    pub collaborator_timeout: Duration,
    /// Retry policy for storage calls
    pub retry: RetryPolicy,
    /// Idle time after which a resumable session may be dropped
    pub session_idle_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dwell_min_secs: 60,
            dwell_max_secs: 90,
            view_credit: Points::TENTH,
            submission_cost: Points::ONE,
            price_per_point: 1,
            operator_ids: HashSet::new(),
            channel_link: None,
            explore_link: None,
            guide_links: Vec::new(),
            invoice_currency: "XTR".to_string(),
            collaborator_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            session_idle_timeout: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl EngineConfig {
    /// Set the dwell range (inclusive)
    pub fn with_dwell_range(mut self, min_secs: u64, max_secs: u64) -> Self {
        self.dwell_min_secs = min_secs;
        self.dwell_max_secs = max_secs;
        self
    }

    /// Set the privileged participants
    pub fn with_operators(mut self, operators: impl IntoIterator<Item = ParticipantId>) -> Self {
        self.operator_ids = operators.into_iter().collect();
        self
    }

    pub fn with_channel_link(mut self, link: impl Into<String>) -> Self {
        self.channel_link = Some(link.into());
        self
    }

    pub fn with_explore_link(mut self, link: impl Into<String>) -> Self {
        self.explore_link = Some(link.into());
        self
    }

    pub fn with_guide_links(mut self, links: impl IntoIterator<Item = String>) -> Self {
        self.guide_links = links.into_iter().collect();
        self
    }

    pub fn with_price_per_point(mut self, price: u64) -> Self {
        self.price_per_point = price;
        self
    }

    pub fn with_collaborator_timeout(mut self, timeout: Duration) -> Self {
        self.collaborator_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout = timeout;
        self
    }

    /// Whether a participant is created privileged
    pub fn is_operator(&self, participant: ParticipantId) -> bool {
        self.operator_ids.contains(&participant)
    }

    /// Link returned by "Explore"
    pub fn explore_target(&self) -> Option<&str> {
        self.explore_link
            .as_deref()
            .or(self.channel_link.as_deref())
    }

    /// Convert a captured payment into points (whole points, rounded down)
    ///
    /// `None` when the amount is too large to represent as a balance.
    pub fn points_for_payment(&self, amount: u64) -> Option<Points> {
        let whole = amount / self.price_per_point.max(1);
        i64::try_from(whole).ok().and_then(Points::checked_from_whole)
    }

    /// Check the rules are internally consistent
    pub fn validate(&self) -> EngineResult<()> {
        if self.dwell_min_secs > self.dwell_max_secs {
            return Err(EngineError::config(format!(
                "dwell range is empty: {}..={}",
                self.dwell_min_secs, self.dwell_max_secs
            )));
        }
        if self.view_credit <= Points::ZERO {
            return Err(EngineError::config("view credit must be positive"));
        }
        if self.submission_cost.is_negative() {
            return Err(EngineError::config("submission cost must not be negative"));
        }
        if self.price_per_point == 0 {
            return Err(EngineError::config("price per point must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(EngineError::config("retry policy needs at least one attempt"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dwell_min_secs, 60);
        assert_eq!(config.dwell_max_secs, 90);
        assert_eq!(config.view_credit, Points::TENTH);
    }

    #[test]
    fn test_rejects_inverted_dwell_range() {
        let config = EngineConfig::default().with_dwell_range(90, 60);
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_points_for_payment() {
        let config = EngineConfig::default();
        assert_eq!(config.points_for_payment(25), Some(Points::from_whole(25)));
        assert_eq!(config.points_for_payment(u64::MAX), None);
        assert_eq!(config.points_for_payment(i64::MAX as u64), None);

        let pricier = EngineConfig::default().with_price_per_point(3);
        assert_eq!(pricier.points_for_payment(10), Some(Points::from_whole(3)));
        assert_eq!(pricier.points_for_payment(2), Some(Points::ZERO));
    }

    #[test]
    fn test_explore_target_falls_back_to_channel() {
        let config = EngineConfig::default().with_channel_link("https://t.me/channel");
        assert_eq!(config.explore_target(), Some("https://t.me/channel"));

        let config = config.with_explore_link("https://youtube.com/@guide");
        assert_eq!(config.explore_target(), Some("https://youtube.com/@guide"));
    }
}
