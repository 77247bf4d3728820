//! Mock collaborators for testing
//!
//! In-memory stand-ins for the chat transport and the other external
//! collaborators, so engine scenarios can run without a network, an OCR
//! binary or a backup destination.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use viewswap_core::{RecordingRenderer, ParticipantId, Renderer, OutboundMessage};
//!
//! let renderer = RecordingRenderer::new();
//! let alice = ParticipantId::new(1);
//! renderer.send(alice, OutboundMessage::text("hello")).await.unwrap();
//! assert_eq!(renderer.texts(alice), vec!["hello".to_string()]);
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::collaborator::{
    BackupSink, ChannelAnnouncer, IdentityVerifier, MembershipOracle, MessageId, OutboundMessage,
    Renderer,
};
use crate::error::{CollaboratorError, TransportError};
use crate::identity::ParticipantId;

/// Message captured by [`RecordingRenderer`]
#[derive(Debug, Clone)]
pub struct RecordedMessage {
    pub id: MessageId,
    pub message: OutboundMessage,
    /// Whether the message has since been retracted
    pub retracted: bool,
}

/// A renderer that records everything it is asked to deliver
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    next_id: AtomicU64,
    inboxes: DashMap<ParticipantId, Vec<RecordedMessage>>,
    fail_sends: AtomicBool,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// All messages sent to a participant, oldest first
    pub fn messages(&self, participant: ParticipantId) -> Vec<RecordedMessage> {
        self.inboxes
            .get(&participant)
            .map(|inbox| inbox.clone())
            .unwrap_or_default()
    }

    /// Texts of all messages sent to a participant
    pub fn texts(&self, participant: ParticipantId) -> Vec<String> {
        self.messages(participant)
            .into_iter()
            .map(|m| m.message.text)
            .collect()
    }

    /// The most recent message sent to a participant
    pub fn last(&self, participant: ParticipantId) -> Option<OutboundMessage> {
        self.inboxes
            .get(&participant)
            .and_then(|inbox| inbox.last().map(|m| m.message.clone()))
    }

    /// Messages that have not been retracted
    pub fn visible(&self, participant: ParticipantId) -> Vec<OutboundMessage> {
        self.messages(participant)
            .into_iter()
            .filter(|m| !m.retracted)
            .map(|m| m.message)
            .collect()
    }

    /// Drop everything recorded for a participant and return it
    pub fn drain(&self, participant: ParticipantId) -> Vec<RecordedMessage> {
        self.inboxes
            .remove(&participant)
            .map(|(_, inbox)| inbox)
            .unwrap_or_default()
    }
}

#[async_trait]
impl Renderer for RecordingRenderer {
    async fn send(
        &self,
        participant: ParticipantId,
        message: OutboundMessage,
    ) -> Result<MessageId, TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed(format!(
                "send to {participant} disabled"
            )));
        }
        let id = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.inboxes
            .entry(participant)
            .or_default()
            .push(RecordedMessage {
                id,
                message,
                retracted: false,
            });
        Ok(id)
    }

    async fn retract(
        &self,
        participant: ParticipantId,
        message: MessageId,
    ) -> Result<(), TransportError> {
        let mut inbox = self
            .inboxes
            .get_mut(&participant)
            .ok_or_else(|| TransportError::NotConnected(participant.to_string()))?;
        let recorded = inbox
            .iter_mut()
            .find(|m| m.id == message)
            .ok_or_else(|| TransportError::RetractFailed(format!("{message} not found")))?;
        recorded.retracted = true;
        Ok(())
    }
}

/// Membership oracle backed by a fixed set of members
#[derive(Debug, Default)]
pub struct StaticMembership {
    members: Mutex<HashSet<ParticipantId>>,
    unavailable: AtomicBool,
}

impl StaticMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_members(members: impl IntoIterator<Item = ParticipantId>) -> Self {
        Self {
            members: Mutex::new(members.into_iter().collect()),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn add(&self, participant: ParticipantId) {
        self.members
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(participant);
    }

    /// Make every lookup fail
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl MembershipOracle for StaticMembership {
    async fn is_member(&self, participant: ParticipantId) -> Result<bool, CollaboratorError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("membership lookup".into()));
        }
        Ok(self
            .members
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&participant))
    }
}

/// How [`StaticVerifier`] answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierResponse {
    Accept,
    Reject,
    Fail,
    /// Never answer within any reasonable timeout
    Hang,
}

/// Identity verifier with a scripted answer
#[derive(Debug)]
pub struct StaticVerifier {
    response: Mutex<VerifierResponse>,
    calls: AtomicUsize,
}

impl StaticVerifier {
    pub fn new(response: VerifierResponse) -> Self {
        Self {
            response: Mutex::new(response),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn accepting() -> Self {
        Self::new(VerifierResponse::Accept)
    }

    pub fn set_response(&self, response: VerifierResponse) {
        *self.response.lock().unwrap_or_else(|e| e.into_inner()) = response;
    }

    /// Number of verify calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityVerifier for StaticVerifier {
    async fn verify(&self, _image: &[u8]) -> Result<bool, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = *self.response.lock().unwrap_or_else(|e| e.into_inner());
        match response {
            VerifierResponse::Accept => Ok(true),
            VerifierResponse::Reject => Ok(false),
            VerifierResponse::Fail => Err(CollaboratorError::Unavailable("verifier".into())),
            VerifierResponse::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(true)
            }
        }
    }
}

/// Backup sink that remembers which files it was asked to mirror
#[derive(Debug, Default)]
pub struct RecordingBackupSink {
    mirrored: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingBackupSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// File names mirrored so far, in call order
    pub fn mirrored(&self) -> Vec<String> {
        self.mirrored
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl BackupSink for RecordingBackupSink {
    async fn mirror(&self, file_name: &str, path: &Path) -> Result<(), CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Io(format!(
                "mirror of {} refused",
                path.display()
            )));
        }
        self.mirrored
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(file_name.to_string());
        Ok(())
    }
}

/// Announcer that keeps every posted text
#[derive(Debug, Default)]
pub struct RecordingAnnouncer {
    posted: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingAnnouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Texts posted so far, in call order
    pub fn posted(&self) -> Vec<String> {
        self.posted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ChannelAnnouncer for RecordingAnnouncer {
    async fn announce(&self, text: &str) -> Result<(), CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("channel unreachable".into()));
        }
        self.posted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());
        Ok(())
    }
}
