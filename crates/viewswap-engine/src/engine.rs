//! The exchange engine
//!
//! [`ExchangeEngine::handle`] takes one participant action at a time per
//! participant. Each action runs against a working copy of the session; the
//! copy replaces the stored session only when the action completes, so a
//! failed storage call leaves the conversation where it was.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use viewswap_core::{
    ActionEnvelope, Button, Clock, CollaboratorError, IdentityVerifier, Link, LinkId,
    MembershipOracle, MessageId, NewLink, OutboundMessage, ParticipantAction, ParticipantId,
    Points, PoolKind, Renderer, SystemClock, validate_link,
};
use viewswap_storage::{
    DebitOutcome, ExchangeStorage, InMemoryLinkLedger, InMemoryPointLedger, InMemoryViewedSet,
    LinkLedger, PaymentOutcome, PointLedger, StorageError, ViewedSetStore,
};

use crate::allocator;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::manager::SessionManager;
use crate::messages;
use crate::session::{Session, SessionState};
use crate::timer::DwellTimer;
use crate::trigger::{BackupReason, BackupTrigger};

/// The three durable stores the engine works against
#[derive(Clone)]
pub struct Ledgers {
    pub links: Arc<dyn LinkLedger>,
    pub points: Arc<dyn PointLedger>,
    pub viewed: Arc<dyn ViewedSetStore>,
}

impl Ledgers {
    /// Fresh in-memory stores
    pub fn in_memory() -> Self {
        Self {
            links: Arc::new(InMemoryLinkLedger::new()),
            points: Arc::new(InMemoryPointLedger::new()),
            viewed: Arc::new(InMemoryViewedSet::new()),
        }
    }

    /// The persistent stores of an opened [`ExchangeStorage`]
    pub fn from_storage(storage: &ExchangeStorage) -> Self {
        Self {
            links: storage.links(),
            points: storage.participants(),
            viewed: storage.viewed(),
        }
    }
}

/// External services the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub renderer: Arc<dyn Renderer>,
    pub membership: Arc<dyn MembershipOracle>,
    pub verifier: Arc<dyn IdentityVerifier>,
}

/// Session state machine over the ledgers
pub struct ExchangeEngine {
    config: EngineConfig,
    ledgers: Ledgers,
    collaborators: Collaborators,
    sessions: SessionManager,
    timer: DwellTimer,
    clock: Arc<dyn Clock>,
    backup: Option<BackupTrigger>,
}

impl ExchangeEngine {
    /// Create an engine; fails if the configuration is inconsistent
    pub fn new(
        config: EngineConfig,
        ledgers: Ledgers,
        collaborators: Collaborators,
    ) -> EngineResult<Self> {
        config.validate()?;
        let timer = DwellTimer::new(config.dwell_min_secs, config.dwell_max_secs);
        Ok(Self {
            config,
            ledgers,
            collaborators,
            sessions: SessionManager::new(),
            timer,
            clock: Arc::new(SystemClock),
            backup: None,
        })
    }

    /// Replace the wall clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Request a mirror after every accepted submission
    pub fn with_backup_trigger(mut self, trigger: BackupTrigger) -> Self {
        self.backup = Some(trigger);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledgers(&self) -> &Ledgers {
        &self.ledgers
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Drop sessions idle for longer than the configured timeout
    ///
    /// Only sessions a fresh one can stand in for are dropped; see
    /// [`Session::is_evictable`].
    pub fn evict_idle_sessions(&self) -> usize {
        let now = self.clock.now_utc();
        let Some(idle_before) = chrono::Duration::from_std(self.config.session_idle_timeout)
            .ok()
            .and_then(|idle| now.checked_sub_signed(idle))
        else {
            return 0;
        };
        let evicted = self.sessions.evict_idle(idle_before);
        if evicted > 0 {
            info!(evicted, remaining = self.sessions.len(), "Evicted idle sessions");
        }
        evicted
    }

    /// Copy of a participant's session, if one exists
    pub async fn session(&self, participant: ParticipantId) -> Option<Session> {
        let slot = self.sessions.get(participant)?;
        let session = slot.lock().await;
        Some(session.clone())
    }

    /// Handle one participant action
    ///
    /// On error the participant is asked to try again and the session is
    /// left exactly as it was before the action.
    #[instrument(
        skip_all,
        fields(participant = %envelope.participant, action = envelope.action.kind())
    )]
    pub async fn handle(&self, envelope: ActionEnvelope) -> EngineResult<()> {
        let ActionEnvelope {
            participant,
            handle,
            action,
        } = envelope;
        let action = action.normalized();

        let slot = self.sessions.slot(participant);
        let mut session = slot.lock().await;
        let mut working = session.clone();

        match self
            .dispatch(participant, handle, action, &mut working)
            .await
        {
            Ok(()) => {
                if working.state != session.state {
                    debug!(from = %session.state, to = %working.state, "Session transition");
                }
                working.last_action_at = Some(self.clock.now_utc());
                *session = working;
                Ok(())
            }
            Err(e) => {
                warn!(state = %session.state, error = %e, "Action failed, session unchanged");
                self.send(participant, messages::try_again()).await;
                Err(e)
            }
        }
    }

    async fn dispatch(
        &self,
        participant: ParticipantId,
        handle: Option<String>,
        action: ParticipantAction,
        session: &mut Session,
    ) -> EngineResult<()> {
        if !session.restored {
            self.restore(participant, session).await?;
        }

        // Actions accepted in every state
        match action {
            ParticipantAction::Start => return self.on_start(participant, session).await,
            ParticipantAction::PaymentConfirmed { charge_id, amount } => {
                return self.on_payment(participant, &charge_id, amount).await;
            }
            ParticipantAction::Button {
                button: Button::BackToMenu,
            } => return self.on_back_to_menu(participant, session).await,
            _ => {}
        }

        match session.state {
            SessionState::AwaitingChannelMembership => {
                self.on_awaiting_membership(participant, handle, action, session)
                    .await
            }
            SessionState::AwaitingRulesAcceptance => {
                self.on_awaiting_rules(participant, handle, action, session)
                    .await
            }
            SessionState::AwaitingIdentityScreenshot => {
                self.on_awaiting_screenshot(participant, handle, action, session)
                    .await
            }
            SessionState::MainMenu => self.on_main_menu(participant, action, session).await,
            SessionState::AwaitingLinkSubmission => {
                self.on_awaiting_link(participant, action, session).await
            }
            SessionState::AwaitingGainPointsConfirmation => {
                self.on_awaiting_gain_points(participant, action, session)
                    .await
            }
            SessionState::AwaitingViewConfirmation => {
                self.on_awaiting_view(participant, action, session).await
            }
            SessionState::Terminated => {
                self.send(participant, messages::restart_required()).await;
                Ok(())
            }
        }
    }

    /// A participant already in the point ledger skips onboarding
    async fn restore(&self, participant: ParticipantId, session: &mut Session) -> EngineResult<()> {
        let record = self
            .config
            .retry
            .run("get_participant", || self.ledgers.points.get(participant))
            .await?;
        if record.is_some() && !session.state.is_verified() {
            info!("Restoring session of known participant");
            session.state = SessionState::MainMenu;
        }
        session.restored = true;
        Ok(())
    }

    async fn on_start(&self, participant: ParticipantId, session: &mut Session) -> EngineResult<()> {
        if session.state.is_verified() {
            self.retract(participant, session.back_to_menu()).await;
            self.send(participant, messages::main_menu()).await;
            return Ok(());
        }
        self.retract(participant, session.restart()).await;
        self.check_membership(participant, None, session).await;
        Ok(())
    }

    async fn on_back_to_menu(
        &self,
        participant: ParticipantId,
        session: &mut Session,
    ) -> EngineResult<()> {
        if !session.state.is_verified() {
            self.reprompt_onboarding(participant, None, session.state)
                .await;
            return Ok(());
        }
        self.retract(participant, session.back_to_menu()).await;
        self.send(participant, messages::returning_to_menu()).await;
        Ok(())
    }

    #[instrument(skip(self, charge_id), fields(participant = %participant))]
    async fn on_payment(
        &self,
        participant: ParticipantId,
        charge_id: &str,
        amount: u64,
    ) -> EngineResult<()> {
        let credit = self.config.points_for_payment(amount).ok_or_else(|| {
            error!(charge_id, amount, "Payment amount exceeds the balance range");
            StorageError::balance_overflow(participant)
        })?;
        let outcome = self
            .config
            .retry
            .run("credit_payment", || {
                self.ledgers
                    .points
                    .credit_payment(participant, charge_id, credit)
            })
            .await?;

        match outcome {
            PaymentOutcome::Credited { balance } => {
                info!(charge_id, %credit, %balance, "Payment credited");
                self.send(participant, messages::payment_credited(credit, balance))
                    .await;
            }
            PaymentOutcome::Duplicate => {
                info!(charge_id, "Payment already credited, ignoring replay");
                self.send(participant, messages::payment_already_credited())
                    .await;
            }
        }
        Ok(())
    }

    // ========== Onboarding ==========

    async fn on_awaiting_membership(
        &self,
        participant: ParticipantId,
        handle: Option<String>,
        action: ParticipantAction,
        session: &mut Session,
    ) -> EngineResult<()> {
        match action {
            ParticipantAction::MembershipCheck
            | ParticipantAction::Button {
                button: Button::CheckMembership,
            } => {
                self.check_membership(participant, handle.as_deref(), session)
                    .await;
            }
            _ => {
                self.send(participant, messages::join_channel(&self.config))
                    .await;
            }
        }
        Ok(())
    }

    async fn check_membership(
        &self,
        participant: ParticipantId,
        handle: Option<&str>,
        session: &mut Session,
    ) {
        let member = self
            .ask(
                "membership",
                self.collaborators.membership.is_member(participant),
            )
            .await;
        if member {
            session.state = SessionState::AwaitingRulesAcceptance;
            self.send(participant, messages::welcome(handle)).await;
        } else {
            session.state = SessionState::AwaitingChannelMembership;
            self.send(participant, messages::join_channel(&self.config))
                .await;
        }
    }

    async fn on_awaiting_rules(
        &self,
        participant: ParticipantId,
        handle: Option<String>,
        action: ParticipantAction,
        session: &mut Session,
    ) -> EngineResult<()> {
        let accepted = match action {
            ParticipantAction::RulesAnswer { accepted } => accepted,
            ParticipantAction::Button {
                button: Button::AcceptRules,
            } => true,
            ParticipantAction::Button {
                button: Button::DeclineRules,
            } => false,
            _ => {
                self.send(participant, messages::welcome(handle.as_deref()))
                    .await;
                return Ok(());
            }
        };

        if accepted {
            session.state = SessionState::AwaitingIdentityScreenshot;
            self.send(participant, messages::screenshot_prompt(&self.config))
                .await;
        } else {
            info!("Rules declined, session terminated");
            session.state = SessionState::Terminated;
            self.send(participant, messages::rules_declined()).await;
        }
        Ok(())
    }

    async fn on_awaiting_screenshot(
        &self,
        participant: ParticipantId,
        handle: Option<String>,
        action: ParticipantAction,
        session: &mut Session,
    ) -> EngineResult<()> {
        let ParticipantAction::ImageUpload { image } = action else {
            self.send(participant, messages::screenshot_prompt(&self.config))
                .await;
            return Ok(());
        };

        let passed = self
            .ask("identity", self.collaborators.verifier.verify(&image))
            .await;
        if !passed {
            self.send(participant, messages::screenshot_rejected()).await;
            return Ok(());
        }

        let privileged = self.config.is_operator(participant);
        let (record, created) = self
            .config
            .retry
            .run("ensure_participant", || {
                self.ledgers
                    .points
                    .ensure_participant(participant, handle.clone(), privileged)
            })
            .await?;
        if created {
            info!(privileged = record.privileged, "Participant verified and created");
        } else {
            debug!("Participant verified again, record kept");
        }

        session.state = SessionState::MainMenu;
        self.send(participant, messages::verified()).await;
        self.send(participant, messages::main_menu()).await;
        Ok(())
    }

    async fn reprompt_onboarding(
        &self,
        participant: ParticipantId,
        handle: Option<&str>,
        state: SessionState,
    ) {
        let prompt = match state {
            SessionState::AwaitingChannelMembership => messages::join_channel(&self.config),
            SessionState::AwaitingRulesAcceptance => messages::welcome(handle),
            SessionState::AwaitingIdentityScreenshot => {
                messages::screenshot_prompt(&self.config)
            }
            _ => messages::restart_required(),
        };
        self.send(participant, prompt).await;
    }

    // ========== Verified participants ==========

    async fn on_main_menu(
        &self,
        participant: ParticipantId,
        action: ParticipantAction,
        session: &mut Session,
    ) -> EngineResult<()> {
        let ParticipantAction::Button { button } = action else {
            self.send(participant, messages::use_menu()).await;
            return Ok(());
        };

        match button {
            Button::PostLink => {
                session.state = SessionState::AwaitingLinkSubmission;
                self.send(participant, messages::post_link_prompt(&self.config))
                    .await;
            }
            Button::GainPoints => {
                session.state = SessionState::AwaitingGainPointsConfirmation;
                self.send(participant, messages::gain_points_rules()).await;
            }
            Button::BuyPoints => {
                self.send(participant, messages::buy_points(&self.config))
                    .await;
            }
            Button::Explore => {
                self.send(participant, messages::explore(&self.config))
                    .await;
            }
            Button::ViewPoints => {
                let balance = self
                    .config
                    .retry
                    .run("balance", || self.ledgers.points.balance(participant))
                    .await?
                    .unwrap_or(Points::ZERO);
                self.send(participant, messages::balance(balance)).await;
            }
            _ => {
                self.send(participant, messages::use_menu()).await;
            }
        }
        Ok(())
    }

    async fn on_awaiting_link(
        &self,
        participant: ParticipantId,
        action: ParticipantAction,
        session: &mut Session,
    ) -> EngineResult<()> {
        let ParticipantAction::Text { text } = action else {
            self.send(participant, messages::post_link_prompt(&self.config))
                .await;
            return Ok(());
        };

        let url = match validate_link(&text) {
            Ok(url) => url,
            Err(e) => {
                debug!(error = %e, "Rejected submission");
                self.send(participant, messages::invalid_link()).await;
                return Ok(());
            }
        };

        self.submit_link(participant, url, session).await
    }

    #[instrument(skip(self, url, session), fields(participant = %participant))]
    async fn submit_link(
        &self,
        participant: ParticipantId,
        url: String,
        session: &mut Session,
    ) -> EngineResult<()> {
        let record = self
            .config
            .retry
            .run("get_participant", || self.ledgers.points.get(participant))
            .await?
            .ok_or_else(|| StorageError::not_found(format!("participant {participant}")))?;
        let privileged = record.privileged;
        let cost = self.config.submission_cost;

        if !privileged {
            let outcome = self
                .config
                .retry
                .run("debit", || {
                    self.ledgers.points.debit_if_at_least(participant, cost)
                })
                .await?;
            if let DebitOutcome::Insufficient { balance } = outcome {
                info!(%balance, required = %cost, "Submission rejected, insufficient points");
                session.state = SessionState::MainMenu;
                self.send(participant, messages::insufficient_points(cost, balance))
                    .await;
                return Ok(());
            }
        }

        let new_link = NewLink {
            url,
            submitter: participant,
            privileged_origin: privileged,
        };
        let submitted = self
            .config
            .retry
            .run("submit_link", || self.ledgers.links.submit(new_link.clone()))
            .await;

        let link = match submitted {
            Ok(link) => link,
            Err(e) => {
                if !privileged {
                    self.compensate_debit(participant, cost).await;
                }
                return Err(e.into());
            }
        };

        info!(link_id = %link.id, privileged, "Link submitted");
        if let Some(backup) = &self.backup {
            backup.request(BackupReason::LinkSubmitted);
        }
        session.state = SessionState::MainMenu;
        self.send(participant, messages::link_posted(&link)).await;
        Ok(())
    }

    async fn compensate_debit(&self, participant: ParticipantId, cost: Points) {
        match self
            .config
            .retry
            .run("refund", || self.ledgers.points.adjust(participant, cost))
            .await
        {
            Ok(balance) => info!(%balance, "Submission failed, debit refunded"),
            Err(e) => error!(error = %e, amount = %cost, "Submission failed and refund failed"),
        }
    }

    async fn compensate_view(&self, participant: ParticipantId, link_id: &LinkId) {
        match self
            .config
            .retry
            .run("forget_view", || self.ledgers.viewed.forget(participant, link_id))
            .await
        {
            Ok(_) => info!(%link_id, "Credit failed, view record withdrawn"),
            Err(e) => error!(%link_id, error = %e, "Credit failed and view record could not be withdrawn"),
        }
    }

    async fn on_awaiting_gain_points(
        &self,
        participant: ParticipantId,
        action: ParticipantAction,
        session: &mut Session,
    ) -> EngineResult<()> {
        match action {
            ParticipantAction::Button {
                button: Button::ConfirmGainPoints,
            } => {
                session.state = SessionState::AwaitingViewConfirmation;
                if !self.deliver_next(participant, session).await? {
                    self.send(participant, messages::no_links_available())
                        .await;
                }
            }
            ParticipantAction::Button {
                button: Button::DeclineGainPoints,
            } => {
                session.state = SessionState::MainMenu;
                self.send(participant, messages::returning_to_menu()).await;
            }
            _ => {
                self.send(participant, messages::gain_points_rules()).await;
            }
        }
        Ok(())
    }

    async fn on_awaiting_view(
        &self,
        participant: ParticipantId,
        action: ParticipantAction,
        session: &mut Session,
    ) -> EngineResult<()> {
        match action {
            ParticipantAction::Button {
                button: Button::DoneViewing,
            } => self.on_done_viewing(participant, session).await,
            _ => {
                let prompt = match &session.active {
                    Some(active) => messages::link_to_view(&active.link),
                    None => messages::no_links_available(),
                };
                self.send(participant, prompt).await;
                Ok(())
            }
        }
    }

    #[instrument(skip(self, session), fields(participant = %participant))]
    async fn on_done_viewing(
        &self,
        participant: ParticipantId,
        session: &mut Session,
    ) -> EngineResult<()> {
        let Some(active) = session.active.clone() else {
            session.state = SessionState::MainMenu;
            self.send(participant, messages::no_link_in_progress())
                .await;
            return Ok(());
        };

        let now = self.clock.now_utc();
        if !DwellTimer::check(active.started_at, active.required_secs, now) {
            let remaining = DwellTimer::remaining_secs(active.started_at, active.required_secs, now);
            debug!(link_id = %active.link.id, remaining, "Done pressed too early");
            let stale = std::mem::take(&mut session.pending_messages);
            self.retract(participant, stale).await;
            let shown = [
                self.send(participant, messages::stay_longer(remaining)).await,
                self.send(participant, messages::link_to_view(&active.link))
                    .await,
            ];
            session.pending_messages.extend(shown.into_iter().flatten());
            return Ok(());
        }

        let link_id = &active.link.id;
        let newly_viewed = self
            .config
            .retry
            .run("record_view", || {
                self.ledgers.viewed.record(participant, link_id)
            })
            .await?;

        if newly_viewed {
            let credit = self.config.view_credit;
            let balance = match self
                .config
                .retry
                .run("credit_view", || self.ledgers.points.adjust(participant, credit))
                .await
            {
                Ok(balance) => balance,
                Err(e) => {
                    self.compensate_view(participant, link_id).await;
                    return Err(e.into());
                }
            };
            info!(%link_id, %balance, "View verified and credited");
            self.send(participant, messages::view_credited(credit, balance))
                .await;
        } else {
            info!(%link_id, "View already recorded, nothing credited");
            self.send(participant, messages::view_already_counted())
                .await;
        }

        // A failed lookup rolls the session back, so the shown link must
        // still be on screen
        let next = self.next_link(participant, session.last_pool).await?;
        self.retract(participant, session.clear_view()).await;

        match next {
            Some((kind, link)) => self.offer(participant, kind, link, session).await,
            None => {
                session.state = SessionState::MainMenu;
                self.send(participant, messages::no_more_links()).await;
            }
        }
        Ok(())
    }

    /// Offer the next link; returns `false` when both pools are exhausted
    async fn deliver_next(
        &self,
        participant: ParticipantId,
        session: &mut Session,
    ) -> EngineResult<bool> {
        match self.next_link(participant, session.last_pool).await? {
            Some((kind, link)) => {
                self.offer(participant, kind, link, session).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pick the next unviewed link, alternating away from `last_pool`
    async fn next_link(
        &self,
        participant: ParticipantId,
        last_pool: Option<PoolKind>,
    ) -> EngineResult<Option<(PoolKind, Link)>> {
        let links = self
            .config
            .retry
            .run("list_links", || self.ledgers.links.list_all())
            .await?;
        let viewed = self
            .config
            .retry
            .run("viewed_by", || self.ledgers.viewed.viewed_by(participant))
            .await?;

        let pools = allocator::pools(&links, participant, &viewed);
        let Some((kind, link)) = pools.choose(last_pool) else {
            debug!(total = links.len(), viewed = viewed.len(), "No links left for participant");
            return Ok(None);
        };
        Ok(Some((kind, link.clone())))
    }

    /// Show `link` and start its dwell
    async fn offer(
        &self,
        participant: ParticipantId,
        kind: PoolKind,
        link: Link,
        session: &mut Session,
    ) {
        let required_secs = self.timer.start();
        debug!(link_id = %link.id, pool = %kind, required_secs, "Delivering link");

        let shown = self.send(participant, messages::link_to_view(&link)).await;
        session.begin_view(link, kind, self.clock.now_utc(), required_secs);
        session.pending_messages.extend(shown);
    }

    // ========== Collaborators ==========

    /// Run a yes/no collaborator call; errors and timeouts count as "no"
    async fn ask<F>(&self, what: &'static str, call: F) -> bool
    where
        F: Future<Output = Result<bool, CollaboratorError>>,
    {
        match tokio::time::timeout(self.config.collaborator_timeout, call).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                warn!(collaborator = what, error = %e, "Collaborator failed, treating as negative");
                false
            }
            Err(_) => {
                warn!(
                    collaborator = what,
                    timeout_ms = self.config.collaborator_timeout.as_millis() as u64,
                    "Collaborator timed out, treating as negative"
                );
                false
            }
        }
    }

    async fn send(&self, participant: ParticipantId, message: OutboundMessage) -> Option<MessageId> {
        match self.collaborators.renderer.send(participant, message).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(participant = %participant, error = %e, "Failed to send message");
                None
            }
        }
    }

    async fn retract(&self, participant: ParticipantId, messages: Vec<MessageId>) {
        for message in messages {
            if let Err(e) = self.collaborators.renderer.retract(participant, message).await {
                debug!(%message, error = %e, "Retract failed, ignoring");
            }
        }
    }
}
