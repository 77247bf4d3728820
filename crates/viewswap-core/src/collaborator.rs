//! Collaborator contracts consumed by the exchange engine
//!
//! Everything the engine needs from the outside world goes through these
//! traits: rendering messages, membership checks, screenshot verification,
//! backup mirroring and channel announcements. None of them carry exchange
//! logic.

use std::fmt::{self, Display};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::Button;
use crate::error::{CollaboratorError, TransportError};
use crate::identity::ParticipantId;

/// Identifier of a rendered message, used to retract it later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg#{}", self.0)
    }
}

/// Payment invoice descriptor shown by "Buy Points"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    pub title: String,
    pub description: String,
    /// Opaque payload echoed back by the payment provider
    pub payload: String,
    /// ISO-ish currency code understood by the provider
    pub currency: String,
    /// Price of one point in provider units
    pub unit_price: u64,
}

/// A message rendered to a participant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub text: String,
    /// Buttons offered with the message, in display order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Button>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice: Option<Invoice>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_buttons(mut self, buttons: impl IntoIterator<Item = Button>) -> Self {
        self.buttons = buttons.into_iter().collect();
        self
    }

    pub fn with_invoice(mut self, invoice: Invoice) -> Self {
        self.invoice = Some(invoice);
        self
    }
}

/// Delivers messages to participants
///
/// Implementations must deliver messages for one participant in the order
/// they were sent.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Send a message, returning an id that can be retracted later
    async fn send(
        &self,
        participant: ParticipantId,
        message: OutboundMessage,
    ) -> Result<MessageId, TransportError>;

    /// Remove a previously sent message
    async fn retract(
        &self,
        participant: ParticipantId,
        message: MessageId,
    ) -> Result<(), TransportError>;
}

/// Confirms that a participant joined the community channel
#[async_trait]
pub trait MembershipOracle: Send + Sync {
    async fn is_member(&self, participant: ParticipantId) -> Result<bool, CollaboratorError>;
}

/// Classifies an uploaded screenshot as verified or not
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, image: &[u8]) -> Result<bool, CollaboratorError>;
}

/// Mirrors a persisted file to an external location
#[async_trait]
pub trait BackupSink: Send + Sync {
    /// Copy `path` to the sink under `file_name`, replacing any older copy
    async fn mirror(&self, file_name: &str, path: &Path) -> Result<(), CollaboratorError>;
}

/// Posts a message to the community channel
#[async_trait]
pub trait ChannelAnnouncer: Send + Sync {
    async fn announce(&self, text: &str) -> Result<(), CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_builder() {
        let msg = OutboundMessage::text("Pick one")
            .with_buttons([Button::PostLink, Button::GainPoints]);
        assert_eq!(msg.text, "Pick one");
        assert_eq!(msg.buttons, vec![Button::PostLink, Button::GainPoints]);
        assert!(msg.invoice.is_none());
    }

    #[test]
    fn test_outbound_json_omits_empty_fields() {
        let json = serde_json::to_string(&OutboundMessage::text("hi")).unwrap();
        assert_eq!(json, r#"{"text":"hi"}"#);
    }
}
