//! Typed participant actions delivered by the chat transport

use serde::{Deserialize, Serialize};

use crate::identity::ParticipantId;

/// Buttons rendered on participant keyboards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Button {
    /// Re-check channel membership ("I Joined")
    CheckMembership,
    AcceptRules,
    DeclineRules,
    PostLink,
    GainPoints,
    /// Interstitial "yes, continue" before the first link is shown
    ConfirmGainPoints,
    /// Interstitial "no, back to menu"
    DeclineGainPoints,
    DoneViewing,
    BackToMenu,
    ViewPoints,
    BuyPoints,
    Explore,
}

impl Button {
    /// Label shown to the participant
    pub fn label(&self) -> &'static str {
        match self {
            Button::CheckMembership => "✅ I Joined",
            Button::AcceptRules => "✅ Yes",
            Button::DeclineRules => "❌ No",
            Button::PostLink => "Post Link",
            Button::GainPoints => "Gain Points",
            Button::ConfirmGainPoints => "Yes, continue",
            Button::DeclineGainPoints => "No, back to menu",
            Button::DoneViewing => "I'm done",
            Button::BackToMenu => "Back to Menu",
            Button::ViewPoints => "View My Points",
            Button::BuyPoints => "Buy Points",
            Button::Explore => "Explore YT",
        }
    }

    /// Map reply-keyboard text back to the button it came from
    ///
    /// Reply keyboards deliver the label as plain text, so menu text and
    /// button presses arrive through the same channel. Matching ignores case
    /// and surrounding whitespace.
    pub fn from_label(text: &str) -> Option<Button> {
        let text = text.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|b| b.label().eq_ignore_ascii_case(text))
    }

    pub const ALL: [Button; 12] = [
        Button::CheckMembership,
        Button::AcceptRules,
        Button::DeclineRules,
        Button::PostLink,
        Button::GainPoints,
        Button::ConfirmGainPoints,
        Button::DeclineGainPoints,
        Button::DoneViewing,
        Button::BackToMenu,
        Button::ViewPoints,
        Button::BuyPoints,
        Button::Explore,
    ];
}

/// An action performed by a participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParticipantAction {
    /// First contact (or explicit restart)
    Start,
    /// Request a membership re-check
    MembershipCheck,
    /// Answer to the rules prompt
    RulesAnswer { accepted: bool },
    /// Uploaded verification screenshot
    ImageUpload { image: Vec<u8> },
    /// Free text (menu text or a submitted link)
    Text { text: String },
    /// Inline button press
    Button { button: Button },
    /// Successful external payment
    PaymentConfirmed { charge_id: String, amount: u64 },
}

impl ParticipantAction {
    /// Resolve menu text that matches a button label into the button itself
    pub fn normalized(self) -> ParticipantAction {
        match self {
            ParticipantAction::Text { text } => match Button::from_label(&text) {
                Some(button) => ParticipantAction::Button { button },
                None => ParticipantAction::Text { text },
            },
            other => other,
        }
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ParticipantAction::Start => "start",
            ParticipantAction::MembershipCheck => "membership_check",
            ParticipantAction::RulesAnswer { .. } => "rules_answer",
            ParticipantAction::ImageUpload { .. } => "image_upload",
            ParticipantAction::Text { .. } => "text",
            ParticipantAction::Button { .. } => "button",
            ParticipantAction::PaymentConfirmed { .. } => "payment_confirmed",
        }
    }
}

/// An action together with who performed it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEnvelope {
    pub participant: ParticipantId,
    /// Display handle reported by the transport
    #[serde(default)]
    pub handle: Option<String>,
    pub action: ParticipantAction,
}

impl ActionEnvelope {
    pub fn new(participant: ParticipantId, action: ParticipantAction) -> Self {
        Self {
            participant,
            handle: None,
            action,
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_label_roundtrip() {
        for button in Button::ALL {
            assert_eq!(Button::from_label(button.label()), Some(button));
        }
    }

    #[test]
    fn test_from_label_ignores_case() {
        assert_eq!(Button::from_label("i'm DONE "), Some(Button::DoneViewing));
        assert_eq!(Button::from_label("post a link"), None);
    }

    #[test]
    fn test_normalized_menu_text() {
        let action = ParticipantAction::Text {
            text: "Gain Points".into(),
        };
        assert_eq!(
            action.normalized(),
            ParticipantAction::Button {
                button: Button::GainPoints
            }
        );

        let link = ParticipantAction::Text {
            text: "https://opr.news/x?y".into(),
        };
        assert_eq!(link.clone().normalized(), link);
    }
}
