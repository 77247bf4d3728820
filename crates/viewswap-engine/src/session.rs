//! Per-participant conversation state

use std::fmt::{self, Display};

use chrono::{DateTime, Utc};

use viewswap_core::{Link, MessageId, PoolKind};

/// Where a participant is in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// First contact; waiting for the channel join to be confirmed
    AwaitingChannelMembership,
    AwaitingRulesAcceptance,
    AwaitingIdentityScreenshot,
    /// Verified hub
    MainMenu,
    AwaitingLinkSubmission,
    /// "Gain points" pressed; waiting for the go-ahead
    AwaitingGainPointsConfirmation,
    AwaitingViewConfirmation,
    /// Rules declined; only a restart leaves this state
    Terminated,
}

impl SessionState {
    /// Whether the participant passed identity verification
    pub fn is_verified(&self) -> bool {
        matches!(
            self,
            SessionState::MainMenu
                | SessionState::AwaitingLinkSubmission
                | SessionState::AwaitingGainPointsConfirmation
                | SessionState::AwaitingViewConfirmation
        )
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::AwaitingChannelMembership => "awaiting_channel_membership",
            SessionState::AwaitingRulesAcceptance => "awaiting_rules_acceptance",
            SessionState::AwaitingIdentityScreenshot => "awaiting_identity_screenshot",
            SessionState::MainMenu => "main_menu",
            SessionState::AwaitingLinkSubmission => "awaiting_link_submission",
            SessionState::AwaitingGainPointsConfirmation => "awaiting_gain_points_confirmation",
            SessionState::AwaitingViewConfirmation => "awaiting_view_confirmation",
            SessionState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// The link a participant is currently viewing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveView {
    pub link: Link,
    pub started_at: DateTime<Utc>,
    /// Rolled once when the link was delivered
    pub required_secs: u64,
}

/// In-memory session for one participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub state: SessionState,
    pub active: Option<ActiveView>,
    /// Pool of the most recently delivered link
    pub last_pool: Option<PoolKind>,
    /// Link messages to retract once the view is settled
    pub pending_messages: Vec<MessageId>,
    /// Time of the last action that completed
    pub last_action_at: Option<DateTime<Utc>>,
    /// Set once the durable store has been consulted for this session
    pub(crate) restored: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A fresh session at the start of onboarding
    pub fn new() -> Self {
        Self {
            state: SessionState::AwaitingChannelMembership,
            active: None,
            last_pool: None,
            pending_messages: Vec::new(),
            last_action_at: None,
            restored: false,
        }
    }

    /// Whether a fresh session could stand in for this one
    ///
    /// Onboarding and terminated sessions restart from the beginning anyway,
    /// and a verified participant at the menu is restored there from the
    /// point ledger. Only the pool alternation history is lost.
    pub fn is_evictable(&self) -> bool {
        !self.state.is_verified() || (self.state == SessionState::MainMenu && self.active.is_none())
    }

    /// Start viewing `link`
    pub fn begin_view(
        &mut self,
        link: Link,
        pool: PoolKind,
        started_at: DateTime<Utc>,
        required_secs: u64,
    ) {
        self.active = Some(ActiveView {
            link,
            started_at,
            required_secs,
        });
        self.last_pool = Some(pool);
        self.state = SessionState::AwaitingViewConfirmation;
    }

    /// Forget the active link; returns messages that should be retracted
    pub fn clear_view(&mut self) -> Vec<MessageId> {
        self.active = None;
        std::mem::take(&mut self.pending_messages)
    }

    /// Abandon any sub-state and return to the menu
    ///
    /// Alternation history survives so the next delivery still alternates.
    pub fn back_to_menu(&mut self) -> Vec<MessageId> {
        self.state = SessionState::MainMenu;
        self.clear_view()
    }

    /// Restart onboarding from the beginning
    pub fn restart(&mut self) -> Vec<MessageId> {
        let pending = self.clear_view();
        self.state = SessionState::AwaitingChannelMembership;
        self.last_pool = None;
        pending
    }
}
