//! End-to-end exchange scenarios against in-memory stores and scripted
//! collaborators.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use viewswap_core::{
    ActionEnvelope, Button, Link, LinkId, ManualClock, NewLink, ParticipantAction, ParticipantId,
    Points, PoolKind, RecordingRenderer, StaticMembership, StaticVerifier, VerifierResponse,
};
use viewswap_engine::{
    BackupReason, BackupTrigger, Collaborators, EngineConfig, EngineError, ExchangeEngine,
    Ledgers, SessionState,
};
use viewswap_storage::{
    ExchangeStorage, ExchangeStorageConfig, InMemoryLinkLedger, InMemoryPointLedger,
    InMemoryViewedSet, LinkLedger, PointLedger, RetryPolicy, StorageError, ViewedSetStore,
};

const OPERATOR: ParticipantId = ParticipantId(100);

struct Harness {
    engine: Arc<ExchangeEngine>,
    renderer: Arc<RecordingRenderer>,
    membership: Arc<StaticMembership>,
    verifier: Arc<StaticVerifier>,
    clock: Arc<ManualClock>,
    links: Arc<InMemoryLinkLedger>,
    points: Arc<InMemoryPointLedger>,
    viewed: Arc<InMemoryViewedSet>,
}

fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_operators([OPERATOR])
        .with_channel_link("https://t.me/viewswap")
        .with_retry(RetryPolicy::none())
}

fn create_test_harness(config: EngineConfig) -> Harness {
    let renderer = Arc::new(RecordingRenderer::new());
    let membership = Arc::new(StaticMembership::new());
    let verifier = Arc::new(StaticVerifier::accepting());
    let clock = Arc::new(ManualClock::starting_now());
    let links = Arc::new(InMemoryLinkLedger::new());
    let points = Arc::new(InMemoryPointLedger::new());
    let viewed = Arc::new(InMemoryViewedSet::new());

    let engine = ExchangeEngine::new(
        config,
        Ledgers {
            links: links.clone(),
            points: points.clone(),
            viewed: viewed.clone(),
        },
        Collaborators {
            renderer: renderer.clone(),
            membership: membership.clone(),
            verifier: verifier.clone(),
        },
    )
    .unwrap()
    .with_clock(clock.clone());

    Harness {
        engine: Arc::new(engine),
        renderer,
        membership,
        verifier,
        clock,
        links,
        points,
        viewed,
    }
}

impl Harness {
    async fn act(&self, who: ParticipantId, action: ParticipantAction) -> Result<(), EngineError> {
        self.engine.handle(ActionEnvelope::new(who, action)).await
    }

    async fn press(&self, who: ParticipantId, button: Button) {
        self.act(who, ParticipantAction::Button { button })
            .await
            .unwrap();
    }

    async fn say(&self, who: ParticipantId, text: &str) -> Result<(), EngineError> {
        self.act(who, ParticipantAction::Text { text: text.into() })
            .await
    }

    async fn state(&self, who: ParticipantId) -> SessionState {
        self.engine.session(who).await.unwrap().state
    }

    async fn active_link(&self, who: ParticipantId) -> Option<Link> {
        self.engine
            .session(who)
            .await
            .unwrap()
            .active
            .map(|active| active.link)
    }

    async fn balance(&self, who: ParticipantId) -> Points {
        self.points.balance(who).await.unwrap().unwrap()
    }

    fn last_text(&self, who: ParticipantId) -> String {
        self.renderer.last(who).unwrap().text
    }

    /// Walk a participant through onboarding into the main menu
    async fn onboard(&self, who: ParticipantId) {
        self.membership.add(who);
        self.act(who, ParticipantAction::Start).await.unwrap();
        self.act(who, ParticipantAction::RulesAnswer { accepted: true })
            .await
            .unwrap();
        self.act(who, ParticipantAction::ImageUpload { image: vec![1, 2, 3] })
            .await
            .unwrap();
        assert_eq!(self.state(who).await, SessionState::MainMenu);
    }

    async fn seed_link(&self, submitter: ParticipantId, token: &str, privileged: bool) -> Link {
        self.links
            .submit(NewLink {
                url: format!("https://opr.news/{token}?link=1"),
                submitter,
                privileged_origin: privileged,
            })
            .await
            .unwrap()
    }

    /// Enter the viewing loop from the main menu
    async fn start_viewing(&self, who: ParticipantId) {
        self.press(who, Button::GainPoints).await;
        self.press(who, Button::ConfirmGainPoints).await;
        assert_eq!(self.state(who).await, SessionState::AwaitingViewConfirmation);
    }

    /// Wait out the dwell and confirm the active link
    async fn finish_view(&self, who: ParticipantId) {
        self.clock.advance(Duration::from_secs(90));
        self.press(who, Button::DoneViewing).await;
    }
}

// ========== Onboarding ==========

#[tokio::test]
async fn test_onboarding_flow() {
    let h = create_test_harness(test_config());
    let alice = ParticipantId::new(1);

    h.act(alice, ParticipantAction::Start).await.unwrap();
    assert_eq!(h.state(alice).await, SessionState::AwaitingChannelMembership);
    assert!(h.last_text(alice).contains("https://t.me/viewswap"));

    // Still not a member
    h.act(alice, ParticipantAction::MembershipCheck).await.unwrap();
    assert_eq!(h.state(alice).await, SessionState::AwaitingChannelMembership);

    h.membership.add(alice);
    h.press(alice, Button::CheckMembership).await;
    assert_eq!(h.state(alice).await, SessionState::AwaitingRulesAcceptance);

    // Anything but an answer repeats the rules
    h.say(alice, "hello").await.unwrap();
    assert_eq!(h.state(alice).await, SessionState::AwaitingRulesAcceptance);
    assert_eq!(
        h.renderer.last(alice).unwrap().buttons,
        vec![Button::AcceptRules, Button::DeclineRules]
    );

    h.press(alice, Button::AcceptRules).await;
    assert_eq!(h.state(alice).await, SessionState::AwaitingIdentityScreenshot);

    // Non-image input re-prompts
    h.say(alice, "here you go").await.unwrap();
    assert_eq!(h.state(alice).await, SessionState::AwaitingIdentityScreenshot);
    assert!(h.last_text(alice).contains("screenshot"));

    h.verifier.set_response(VerifierResponse::Reject);
    h.act(alice, ParticipantAction::ImageUpload { image: vec![0; 16] })
        .await
        .unwrap();
    assert_eq!(h.state(alice).await, SessionState::AwaitingIdentityScreenshot);
    assert!(h.points.get(alice).await.unwrap().is_none());

    h.verifier.set_response(VerifierResponse::Accept);
    h.act(alice, ParticipantAction::ImageUpload { image: vec![0; 16] })
        .await
        .unwrap();
    assert_eq!(h.state(alice).await, SessionState::MainMenu);

    let record = h.points.get(alice).await.unwrap().unwrap();
    assert_eq!(record.balance, Points::ZERO);
    assert!(!record.privileged);
    assert_eq!(h.verifier.calls(), 2);
}

#[tokio::test]
async fn test_membership_failure_counts_as_not_member() {
    let h = create_test_harness(test_config());
    let bob = ParticipantId::new(2);
    h.membership.add(bob);
    h.membership.set_unavailable(true);

    h.act(bob, ParticipantAction::Start).await.unwrap();
    assert_eq!(h.state(bob).await, SessionState::AwaitingChannelMembership);

    h.membership.set_unavailable(false);
    h.act(bob, ParticipantAction::MembershipCheck).await.unwrap();
    assert_eq!(h.state(bob).await, SessionState::AwaitingRulesAcceptance);
}

#[tokio::test]
async fn test_declined_rules_terminate_until_restart() {
    let h = create_test_harness(test_config());
    let carol = ParticipantId::new(3);
    h.membership.add(carol);

    h.act(carol, ParticipantAction::Start).await.unwrap();
    h.press(carol, Button::DeclineRules).await;
    assert_eq!(h.state(carol).await, SessionState::Terminated);

    h.act(carol, ParticipantAction::ImageUpload { image: vec![1] })
        .await
        .unwrap();
    assert_eq!(h.state(carol).await, SessionState::Terminated);
    assert_eq!(h.verifier.calls(), 0);

    h.act(carol, ParticipantAction::Start).await.unwrap();
    assert_eq!(h.state(carol).await, SessionState::AwaitingRulesAcceptance);
}

#[tokio::test(start_paused = true)]
async fn test_verifier_timeout_keeps_participant_waiting() {
    let config = test_config().with_collaborator_timeout(Duration::from_secs(5));
    let h = create_test_harness(config);
    let dave = ParticipantId::new(4);
    h.membership.add(dave);
    h.verifier.set_response(VerifierResponse::Hang);

    h.act(dave, ParticipantAction::Start).await.unwrap();
    h.act(dave, ParticipantAction::RulesAnswer { accepted: true })
        .await
        .unwrap();
    h.act(dave, ParticipantAction::ImageUpload { image: vec![9] })
        .await
        .unwrap();

    assert_eq!(h.state(dave).await, SessionState::AwaitingIdentityScreenshot);
    assert!(h.last_text(dave).contains("Could not verify"));
    assert!(h.points.get(dave).await.unwrap().is_none());
}

#[tokio::test]
async fn test_operator_is_created_privileged() {
    let h = create_test_harness(test_config());
    h.onboard(OPERATOR).await;
    assert!(h.points.is_privileged(OPERATOR).await.unwrap());
}

#[tokio::test]
async fn test_back_to_menu_before_verification_reprompts() {
    let h = create_test_harness(test_config());
    let erin = ParticipantId::new(5);
    h.membership.add(erin);
    h.act(erin, ParticipantAction::Start).await.unwrap();
    h.press(erin, Button::AcceptRules).await;

    h.press(erin, Button::BackToMenu).await;
    assert_eq!(h.state(erin).await, SessionState::AwaitingIdentityScreenshot);
    assert!(h.last_text(erin).contains("screenshot"));
}

// ========== Submissions ==========

#[tokio::test]
async fn test_submit_with_half_point_is_rejected() {
    let h = create_test_harness(test_config());
    let alice = ParticipantId::new(1);
    h.onboard(alice).await;
    h.points.adjust(alice, Points::from_tenths(5)).await.unwrap();

    h.press(alice, Button::PostLink).await;
    assert_eq!(h.state(alice).await, SessionState::AwaitingLinkSubmission);
    tokio_test::assert_ok!(h.say(alice, "https://opr.news/abc123?link=1").await);

    assert_eq!(h.state(alice).await, SessionState::MainMenu);
    assert_eq!(h.balance(alice).await, Points::from_tenths(5));
    assert_eq!(h.links.count().await.unwrap(), 0);
    assert!(h.last_text(alice).contains("need 1.0 points and have 0.5"));
}

#[tokio::test]
async fn test_invalid_link_reprompts() {
    let h = create_test_harness(test_config());
    let alice = ParticipantId::new(1);
    h.onboard(alice).await;
    h.points.adjust(alice, Points::from_whole(3)).await.unwrap();

    h.press(alice, Button::PostLink).await;
    h.say(alice, "https://example.com/story").await.unwrap();

    assert_eq!(h.state(alice).await, SessionState::AwaitingLinkSubmission);
    assert_eq!(h.balance(alice).await, Points::from_whole(3));
    assert_eq!(h.links.count().await.unwrap(), 0);
    assert!(h.last_text(alice).contains("valid news link"));
}

#[tokio::test]
async fn test_oversized_link_reprompts_without_debit() {
    let h = create_test_harness(test_config());
    let alice = ParticipantId::new(1);
    h.onboard(alice).await;
    h.points.adjust(alice, Points::from_whole(3)).await.unwrap();

    h.press(alice, Button::PostLink).await;
    let oversized = format!("https://opr.news/big?{}", "q".repeat(70_000));
    h.say(alice, &oversized).await.unwrap();

    assert_eq!(h.state(alice).await, SessionState::AwaitingLinkSubmission);
    assert_eq!(h.balance(alice).await, Points::from_whole(3));
    assert_eq!(h.links.count().await.unwrap(), 0);
    assert!(h.last_text(alice).contains("valid news link"));
}

#[tokio::test]
async fn test_submit_debits_and_requests_backup() {
    let (trigger, mut requests) = BackupTrigger::channel(4);
    let renderer = Arc::new(RecordingRenderer::new());
    let points = Arc::new(InMemoryPointLedger::new());
    let links = Arc::new(InMemoryLinkLedger::new());
    let alice = ParticipantId::new(1);

    let engine = ExchangeEngine::new(
        test_config(),
        Ledgers {
            links: links.clone(),
            points: points.clone(),
            viewed: Arc::new(InMemoryViewedSet::new()),
        },
        Collaborators {
            renderer: renderer.clone(),
            membership: Arc::new(StaticMembership::with_members([alice])),
            verifier: Arc::new(StaticVerifier::accepting()),
        },
    )
    .unwrap()
    .with_backup_trigger(trigger);

    for action in [
        ParticipantAction::Start,
        ParticipantAction::RulesAnswer { accepted: true },
        ParticipantAction::ImageUpload { image: vec![7] },
    ] {
        engine.handle(ActionEnvelope::new(alice, action)).await.unwrap();
    }
    points.adjust(alice, Points::from_tenths(15)).await.unwrap();

    for text in ["Post Link", "https://opr.news/story42?link=1&client=news"] {
        engine
            .handle(ActionEnvelope::new(
                alice,
                ParticipantAction::Text { text: text.into() },
            ))
            .await
            .unwrap();
    }

    assert_eq!(points.balance(alice).await.unwrap(), Some(Points::from_tenths(5)));
    let all = links.list_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, LinkId::first());
    assert_eq!(all[0].submitter, alice);
    assert!(!all[0].privileged_origin);
    assert_eq!(requests.recv().await, Some(BackupReason::LinkSubmitted));
    assert!(renderer.texts(alice).last().unwrap().contains("Link posted"));
}

#[tokio::test]
async fn test_privileged_submit_is_free() {
    let h = create_test_harness(test_config());
    h.onboard(OPERATOR).await;

    h.press(OPERATOR, Button::PostLink).await;
    h.say(OPERATOR, "https://opr.news/official1?link=1").await.unwrap();
    h.press(OPERATOR, Button::PostLink).await;
    h.say(OPERATOR, "https://opr.news/official2?link=1").await.unwrap();

    assert_eq!(h.balance(OPERATOR).await, Points::ZERO);
    let all = h.links.list_all().await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|link| link.privileged_origin));
    assert_eq!(all[1].id, LinkId::new("b"));
}

#[tokio::test]
async fn test_long_form_is_stored_canonical() {
    let h = create_test_harness(test_config());
    h.onboard(OPERATOR).await;

    h.press(OPERATOR, Button::PostLink).await;
    h.say(
        OPERATOR,
        "https://www.operanewsapp.com/ng/en/share/detail?news_entry_id=XYZ123&from=app",
    )
    .await
    .unwrap();

    let all = h.links.list_all().await.unwrap();
    assert_eq!(all[0].url, "https://opr.news/XYZ123?link=1&client=news");
}

#[tokio::test]
async fn test_failed_append_refunds_debit() {
    let h = create_test_harness(test_config());
    let alice = ParticipantId::new(1);
    h.onboard(alice).await;
    h.points.adjust(alice, Points::from_whole(2)).await.unwrap();
    h.links.fail_appends(true);

    h.press(alice, Button::PostLink).await;
    let result = h.say(alice, "https://opr.news/abc?link=1").await;

    assert!(matches!(result, Err(EngineError::Storage(_))));
    assert_eq!(h.balance(alice).await, Points::from_whole(2));
    assert_eq!(h.links.count().await.unwrap(), 0);
    assert_eq!(h.state(alice).await, SessionState::AwaitingLinkSubmission);
    assert!(h.last_text(alice).contains("try again"));

    // Same submission succeeds once the ledger recovers
    h.links.fail_appends(false);
    h.say(alice, "https://opr.news/abc?link=1").await.unwrap();
    assert_eq!(h.balance(alice).await, Points::from_whole(1));
    assert_eq!(h.links.count().await.unwrap(), 1);
}

// ========== Viewing ==========

#[tokio::test]
async fn test_verified_view_credits_and_offers_next() {
    let h = create_test_harness(test_config());
    let viewer = ParticipantId::new(1);
    let first = h.seed_link(OPERATOR, "op1", true).await;
    let second = h.seed_link(ParticipantId::new(2), "p1", false).await;
    h.onboard(viewer).await;

    h.start_viewing(viewer).await;
    assert_eq!(h.active_link(viewer).await, Some(first.clone()));
    let shown = h.renderer.messages(viewer).last().unwrap().id;

    h.finish_view(viewer).await;

    assert_eq!(h.balance(viewer).await, Points::TENTH);
    assert!(h.viewed.contains(viewer, &first.id).await.unwrap());
    assert_eq!(h.viewed.total(), 1);
    assert_eq!(h.active_link(viewer).await, Some(second));
    assert_eq!(h.state(viewer).await, SessionState::AwaitingViewConfirmation);

    let retracted = h
        .renderer
        .messages(viewer)
        .into_iter()
        .find(|m| m.id == shown)
        .unwrap();
    assert!(retracted.retracted);
}

#[tokio::test]
async fn test_failed_credit_withdraws_view() {
    let h = create_test_harness(test_config());
    let viewer = ParticipantId::new(1);
    let link = h.seed_link(OPERATOR, "op1", true).await;
    h.onboard(viewer).await;
    h.start_viewing(viewer).await;

    h.points.fail_adjustments(true);
    h.clock.advance(Duration::from_secs(90));
    let result = h
        .act(viewer, ParticipantAction::Button { button: Button::DoneViewing })
        .await;

    assert!(matches!(result, Err(EngineError::Storage(_))));
    assert_eq!(h.balance(viewer).await, Points::ZERO);
    assert!(!h.viewed.contains(viewer, &link.id).await.unwrap());
    assert_eq!(h.active_link(viewer).await, Some(link.clone()));

    // Once storage recovers the same confirmation succeeds
    h.points.fail_adjustments(false);
    h.press(viewer, Button::DoneViewing).await;
    assert_eq!(h.balance(viewer).await, Points::TENTH);
    assert!(h.viewed.contains(viewer, &link.id).await.unwrap());
}

#[tokio::test]
async fn test_failed_lookup_keeps_the_shown_link() {
    let h = create_test_harness(test_config());
    let viewer = ParticipantId::new(1);
    let first = h.seed_link(OPERATOR, "op1", true).await;
    let second = h.seed_link(ParticipantId::new(2), "p1", false).await;
    h.onboard(viewer).await;
    h.start_viewing(viewer).await;
    let shown = h.renderer.messages(viewer).last().unwrap().id;

    h.viewed.fail_reads(true);
    h.clock.advance(Duration::from_secs(90));
    let result = h
        .act(viewer, ParticipantAction::Button { button: Button::DoneViewing })
        .await;
    assert!(matches!(result, Err(EngineError::Storage(_))));

    let session = h.engine.session(viewer).await.unwrap();
    assert_eq!(session.active.map(|a| a.link), Some(first.clone()));
    assert!(session.pending_messages.contains(&shown));
    let still_shown = h
        .renderer
        .messages(viewer)
        .into_iter()
        .find(|m| m.id == shown)
        .unwrap();
    assert!(!still_shown.retracted);

    // The retry finds the view already counted and moves on
    h.viewed.fail_reads(false);
    h.press(viewer, Button::DoneViewing).await;
    assert_eq!(h.balance(viewer).await, Points::TENTH);
    assert_eq!(h.active_link(viewer).await, Some(second));
    let retracted = h
        .renderer
        .messages(viewer)
        .into_iter()
        .find(|m| m.id == shown)
        .unwrap();
    assert!(retracted.retracted);
}

#[tokio::test]
async fn test_early_done_keeps_the_same_dwell() {
    let h = create_test_harness(test_config());
    let viewer = ParticipantId::new(1);
    h.seed_link(OPERATOR, "op1", true).await;
    h.onboard(viewer).await;
    h.start_viewing(viewer).await;

    let before = h.engine.session(viewer).await.unwrap().active.unwrap();
    assert!((60..=90).contains(&before.required_secs));

    h.clock.advance(Duration::from_secs(30));
    h.press(viewer, Button::DoneViewing).await;

    let after = h.engine.session(viewer).await.unwrap().active.unwrap();
    assert_eq!(after.required_secs, before.required_secs);
    assert_eq!(after.started_at, before.started_at);
    assert_eq!(h.balance(viewer).await, Points::ZERO);
    assert_eq!(h.viewed.total(), 0);

    let texts = h.renderer.texts(viewer);
    let warning = &texts[texts.len() - 2];
    assert!(warning.contains(&format!("({}s left)", before.required_secs - 30)));
    assert!(texts.last().unwrap().contains("https://opr.news/op1"));

    // Exactly at the deadline the view counts
    h.clock
        .advance(Duration::from_secs(before.required_secs - 30));
    h.press(viewer, Button::DoneViewing).await;
    assert_eq!(h.balance(viewer).await, Points::TENTH);
    assert_eq!(h.state(viewer).await, SessionState::MainMenu);
    assert!(h.last_text(viewer).contains("No more links"));
}

#[tokio::test]
async fn test_delivery_alternates_between_pools() {
    let h = create_test_harness(test_config());
    let viewer = ParticipantId::new(1);
    let o1 = h.seed_link(OPERATOR, "op1", true).await;
    let p1 = h.seed_link(ParticipantId::new(2), "p1", false).await;
    let o2 = h.seed_link(OPERATOR, "op2", true).await;
    let p2 = h.seed_link(ParticipantId::new(3), "p2", false).await;
    let own = h.seed_link(viewer, "mine", false).await;
    h.onboard(viewer).await;

    h.start_viewing(viewer).await;
    let mut delivered = Vec::new();
    while let Some(link) = h.active_link(viewer).await {
        let session = h.engine.session(viewer).await.unwrap();
        assert_eq!(session.last_pool, Some(link.pool_kind()));
        delivered.push(link.id);
        h.finish_view(viewer).await;
    }

    assert_eq!(delivered, vec![o1.id, p1.id, o2.id, p2.id]);
    assert!(!h.viewed.contains(viewer, &own.id).await.unwrap());
    assert_eq!(h.balance(viewer).await, Points::from_tenths(4));
    assert_eq!(h.state(viewer).await, SessionState::MainMenu);
}

#[tokio::test]
async fn test_same_pool_repeats_when_other_is_empty() {
    let h = create_test_harness(test_config());
    let viewer = ParticipantId::new(1);
    h.seed_link(ParticipantId::new(2), "p1", false).await;
    h.seed_link(ParticipantId::new(3), "p2", false).await;
    h.onboard(viewer).await;

    h.start_viewing(viewer).await;
    h.finish_view(viewer).await;

    let session = h.engine.session(viewer).await.unwrap();
    assert_eq!(session.last_pool, Some(PoolKind::Participant));
    assert_eq!(session.active.unwrap().link.id, LinkId::new("b"));
}

#[tokio::test]
async fn test_no_links_available() {
    let h = create_test_harness(test_config());
    let viewer = ParticipantId::new(1);
    h.onboard(viewer).await;

    h.start_viewing(viewer).await;
    assert!(h.active_link(viewer).await.is_none());
    assert!(h.last_text(viewer).contains("no links available"));

    h.press(viewer, Button::DoneViewing).await;
    assert_eq!(h.state(viewer).await, SessionState::MainMenu);
    assert!(h.last_text(viewer).contains("No link in progress"));
}

#[tokio::test]
async fn test_duplicate_confirmation_credits_nothing() {
    let h = create_test_harness(test_config());
    let viewer = ParticipantId::new(1);
    let link = h.seed_link(OPERATOR, "op1", true).await;
    h.onboard(viewer).await;
    h.start_viewing(viewer).await;

    // Another confirmation got there first
    assert!(h.viewed.record(viewer, &link.id).await.unwrap());

    h.finish_view(viewer).await;
    assert_eq!(h.balance(viewer).await, Points::ZERO);
    assert_eq!(h.viewed.total(), 1);
    assert!(
        h.renderer
            .texts(viewer)
            .iter()
            .any(|t| t.contains("already counted"))
    );
}

#[tokio::test]
async fn test_concurrent_done_presses_credit_once() {
    let h = create_test_harness(test_config());
    let viewer = ParticipantId::new(1);
    h.seed_link(OPERATOR, "op1", true).await;
    h.onboard(viewer).await;
    h.start_viewing(viewer).await;
    h.clock.advance(Duration::from_secs(90));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .handle(ActionEnvelope::new(
                    viewer,
                    ParticipantAction::Button {
                        button: Button::DoneViewing,
                    },
                ))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(h.balance(viewer).await, Points::TENTH);
    assert_eq!(h.viewed.total(), 1);
    assert_eq!(h.state(viewer).await, SessionState::MainMenu);
}

#[tokio::test]
async fn test_back_to_menu_mid_view() {
    let h = create_test_harness(test_config());
    let viewer = ParticipantId::new(1);
    h.seed_link(OPERATOR, "op1", true).await;
    h.onboard(viewer).await;
    h.start_viewing(viewer).await;
    let shown = h.renderer.messages(viewer).last().unwrap().id;

    h.clock.advance(Duration::from_secs(120));
    h.press(viewer, Button::BackToMenu).await;

    let session = h.engine.session(viewer).await.unwrap();
    assert_eq!(session.state, SessionState::MainMenu);
    assert!(session.active.is_none());
    assert!(session.pending_messages.is_empty());
    assert_eq!(h.viewed.total(), 0);
    assert_eq!(h.balance(viewer).await, Points::ZERO);
    assert!(
        h.renderer
            .messages(viewer)
            .iter()
            .any(|m| m.id == shown && m.retracted)
    );
}

#[tokio::test]
async fn test_decline_gain_points() {
    let h = create_test_harness(test_config());
    let viewer = ParticipantId::new(1);
    h.onboard(viewer).await;

    h.press(viewer, Button::GainPoints).await;
    assert_eq!(
        h.state(viewer).await,
        SessionState::AwaitingGainPointsConfirmation
    );
    h.press(viewer, Button::DeclineGainPoints).await;
    assert_eq!(h.state(viewer).await, SessionState::MainMenu);
}

// ========== Menu extras ==========

#[tokio::test]
async fn test_view_points_and_explore() {
    let config = test_config().with_explore_link("https://youtube.com/@viewswap");
    let h = create_test_harness(config);
    let alice = ParticipantId::new(1);
    h.onboard(alice).await;
    h.points.adjust(alice, Points::from_tenths(23)).await.unwrap();

    h.say(alice, "View My Points").await.unwrap();
    assert_eq!(h.last_text(alice), "You have 2.3 points.");

    h.press(alice, Button::Explore).await;
    assert!(h.last_text(alice).ends_with("https://youtube.com/@viewswap"));

    h.say(alice, "what now?").await.unwrap();
    assert_eq!(h.state(alice).await, SessionState::MainMenu);
    assert!(h.last_text(alice).contains("use the menu"));
}

#[tokio::test]
async fn test_buy_points_and_duplicate_payment() {
    let h = create_test_harness(test_config());
    let alice = ParticipantId::new(1);
    h.onboard(alice).await;

    h.press(alice, Button::BuyPoints).await;
    let invoice = h.renderer.last(alice).unwrap().invoice.unwrap();
    assert_eq!(invoice.currency, "XTR");

    let payment = ParticipantAction::PaymentConfirmed {
        charge_id: "ch_1".into(),
        amount: 5,
    };
    h.act(alice, payment.clone()).await.unwrap();
    assert_eq!(h.balance(alice).await, Points::from_whole(5));

    h.act(alice, payment).await.unwrap();
    assert_eq!(h.balance(alice).await, Points::from_whole(5));
    assert!(h.last_text(alice).contains("already credited"));
    assert_eq!(h.state(alice).await, SessionState::MainMenu);
}

#[tokio::test]
async fn test_payment_beyond_balance_range_is_refused() {
    let h = create_test_harness(test_config());
    let alice = ParticipantId::new(1);
    h.onboard(alice).await;

    let huge = |charge_id: &str| ParticipantAction::PaymentConfirmed {
        charge_id: charge_id.into(),
        amount: u64::MAX,
    };
    let result = h.act(alice, huge("ch_1")).await;
    assert!(matches!(
        result,
        Err(EngineError::Storage(StorageError::BalanceOverflow(_)))
    ));
    assert_eq!(h.balance(alice).await, Points::ZERO);
    assert_eq!(h.state(alice).await, SessionState::MainMenu);

    // Two large but representable payments overflow on the second credit
    let large = |charge_id: &str| ParticipantAction::PaymentConfirmed {
        charge_id: charge_id.into(),
        amount: (i64::MAX / 10) as u64,
    };
    h.act(alice, large("ch_2")).await.unwrap();
    let credited = h.balance(alice).await;
    assert!(credited > Points::ZERO);

    let result = h.act(alice, large("ch_3")).await;
    assert!(matches!(
        result,
        Err(EngineError::Storage(StorageError::BalanceOverflow(_)))
    ));
    assert_eq!(h.balance(alice).await, credited);
    assert!(h.last_text(alice).contains("try again"));
}

#[tokio::test]
async fn test_send_failures_do_not_block_progress() {
    let h = create_test_harness(test_config());
    let alice = ParticipantId::new(1);
    h.membership.add(alice);
    h.renderer.fail_sends(true);

    h.act(alice, ParticipantAction::Start).await.unwrap();
    h.press(alice, Button::AcceptRules).await;
    assert_eq!(h.state(alice).await, SessionState::AwaitingIdentityScreenshot);
    assert!(h.renderer.messages(alice).is_empty());
}

// ========== Idle sessions ==========

#[tokio::test]
async fn test_idle_sessions_are_evicted_and_resume() {
    let h = create_test_harness(test_config());
    let alice = ParticipantId::new(1);
    let bob = ParticipantId::new(2);
    let carol = ParticipantId::new(3);
    h.seed_link(OPERATOR, "op1", true).await;

    h.onboard(alice).await;
    h.onboard(bob).await;
    h.start_viewing(bob).await;
    h.membership.add(carol);
    h.act(carol, ParticipantAction::Start).await.unwrap();
    h.press(carol, Button::DeclineRules).await;

    h.clock.advance(Duration::from_secs(60 * 60));
    assert_eq!(h.engine.evict_idle_sessions(), 0);

    h.clock.advance(Duration::from_secs(24 * 60 * 60));
    assert_eq!(h.engine.evict_idle_sessions(), 2);
    assert_eq!(h.engine.sessions().len(), 1);
    assert!(h.engine.session(alice).await.is_none());
    assert!(h.engine.session(carol).await.is_none());

    // The viewer mid-task keeps the session
    assert_eq!(h.state(bob).await, SessionState::AwaitingViewConfirmation);

    // A verified participant resumes at the menu from the point ledger
    h.press(alice, Button::ViewPoints).await;
    assert_eq!(h.state(alice).await, SessionState::MainMenu);
    assert!(h.last_text(alice).contains("You have"));

    // A terminated participant starts over
    h.press(carol, Button::AcceptRules).await;
    assert_eq!(h.state(carol).await, SessionState::AwaitingChannelMembership);
}

// ========== Restore ==========

#[tokio::test]
async fn test_known_participant_skips_onboarding() {
    let h = create_test_harness(test_config());
    let alice = ParticipantId::new(1);
    h.points
        .ensure_participant(alice, Some("alice".into()), false)
        .await
        .unwrap();

    h.act(alice, ParticipantAction::Start).await.unwrap();
    assert_eq!(h.state(alice).await, SessionState::MainMenu);
    assert_eq!(h.verifier.calls(), 0);
}

fn create_test_storage_config() -> (ExchangeStorageConfig, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = ExchangeStorageConfig::with_base_dir(temp_dir.path());
    (config, temp_dir)
}

#[tokio::test]
async fn test_restart_restores_from_persistent_storage() {
    let (storage_config, _temp_dir) = create_test_storage_config();
    let alice = ParticipantId::new(1);
    let renderer = Arc::new(RecordingRenderer::new());
    let collaborators = Collaborators {
        renderer: renderer.clone(),
        membership: Arc::new(StaticMembership::with_members([alice])),
        verifier: Arc::new(StaticVerifier::accepting()),
    };

    {
        let storage = ExchangeStorage::open(storage_config.clone()).await.unwrap();
        let engine = ExchangeEngine::new(
            test_config(),
            Ledgers::from_storage(&storage),
            collaborators.clone(),
        )
        .unwrap();
        for action in [
            ParticipantAction::Start,
            ParticipantAction::RulesAnswer { accepted: true },
            ParticipantAction::ImageUpload { image: vec![1] },
        ] {
            engine.handle(ActionEnvelope::new(alice, action)).await.unwrap();
        }
        storage
            .participants()
            .adjust(alice, Points::from_whole(1))
            .await
            .unwrap();
    }

    let storage = ExchangeStorage::open(storage_config).await.unwrap();
    let engine = ExchangeEngine::new(test_config(), Ledgers::from_storage(&storage), collaborators)
        .unwrap();
    engine
        .handle(ActionEnvelope::new(
            alice,
            ParticipantAction::Text {
                text: "View My Points".into(),
            },
        ))
        .await
        .unwrap();

    assert_eq!(
        engine.session(alice).await.unwrap().state,
        SessionState::MainMenu
    );
    assert_eq!(renderer.texts(alice).last().unwrap(), "You have 1.0 points.");
}
