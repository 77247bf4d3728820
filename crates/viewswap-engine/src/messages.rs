//! Participant-facing prompts

use viewswap_core::{Button, Invoice, Link, OutboundMessage, Points};

use crate::config::EngineConfig;

/// Payload attached to point invoices
pub const BUY_POINTS_PAYLOAD: &str = "buy_points";

pub const MENU_BUTTONS: [Button; 5] = [
    Button::PostLink,
    Button::GainPoints,
    Button::BuyPoints,
    Button::Explore,
    Button::ViewPoints,
];

pub fn join_channel(config: &EngineConfig) -> OutboundMessage {
    let channel = config.channel_link.as_deref().unwrap_or("our channel");
    OutboundMessage::text(format!(
        "To use this exchange you must join our channel first: {channel}\n\n\
         After joining, press \"{}\" to continue.",
        Button::CheckMembership.label()
    ))
    .with_buttons([Button::CheckMembership])
}

pub fn welcome(handle: Option<&str>) -> OutboundMessage {
    OutboundMessage::text(format!(
        "Hey {}!\n\n\
         This is a peer-to-peer exchange: you share your news links so others \
         view them, and in exchange you view theirs.\n\n\
         Rules:\n\
         1. You must have the news app installed and be signed in.\n\
         2. Be honest and help each other.\n\
         3. All activity is tracked. Cheaters are removed.\n\n\
         Do you wish to continue?",
        handle.unwrap_or("there")
    ))
    .with_buttons([Button::AcceptRules, Button::DeclineRules])
}

pub fn rules_declined() -> OutboundMessage {
    OutboundMessage::text("No problem. Send /start whenever you change your mind.")
}

pub fn screenshot_prompt(config: &EngineConfig) -> OutboundMessage {
    let mut text = String::from(
        "Please send a screenshot of the app's settings page showing your \
         installation id, the app version and the sign out option.",
    );
    append_guides(&mut text, config);
    OutboundMessage::text(text)
}

pub fn screenshot_rejected() -> OutboundMessage {
    OutboundMessage::text("Could not verify your screenshot. Please try again.")
}

pub fn verified() -> OutboundMessage {
    OutboundMessage::text("You passed verification. You can now help others and get help!")
}

pub fn main_menu() -> OutboundMessage {
    OutboundMessage::text("Main Menu:").with_buttons(MENU_BUTTONS)
}

pub fn use_menu() -> OutboundMessage {
    OutboundMessage::text("Please use the menu.").with_buttons(MENU_BUTTONS)
}

pub fn restart_required() -> OutboundMessage {
    OutboundMessage::text("Your session has ended. Send /start to begin again.")
}

pub fn post_link_prompt(config: &EngineConfig) -> OutboundMessage {
    let mut text = String::from(
        "To post your news link, copy it from the app and send it here.",
    );
    append_guides(&mut text, config);
    OutboundMessage::text(text).with_buttons([Button::BackToMenu])
}

pub fn invalid_link() -> OutboundMessage {
    OutboundMessage::text("Please send a valid news link (short or long format).")
        .with_buttons([Button::BackToMenu])
}

pub fn insufficient_points(required: Points, available: Points) -> OutboundMessage {
    OutboundMessage::text(format!(
        "Not enough points to post a link. You need {required} points and have {available}."
    ))
    .with_buttons(MENU_BUTTONS)
}

pub fn link_posted(link: &Link) -> OutboundMessage {
    OutboundMessage::text(format!("Link posted! ({})", link.id)).with_buttons(MENU_BUTTONS)
}

pub fn gain_points_rules() -> OutboundMessage {
    OutboundMessage::text(
        "Gain Points Rules:\n\
         1. Visit the provided link.\n\
         2. Your view will be counted and verified.\n\
         3. If verified, you will receive points.\n\
         4. Do not try to cheat, we check your view count!\n\n\
         Do you want to continue?",
    )
    .with_buttons([Button::ConfirmGainPoints, Button::DeclineGainPoints])
}

pub fn link_to_view(link: &Link) -> OutboundMessage {
    OutboundMessage::text(format!(
        "Visit this link: {}\n\nWhen you are done, press \"{}\".",
        link.url,
        Button::DoneViewing.label()
    ))
    .with_buttons([Button::DoneViewing, Button::BackToMenu])
}

pub fn stay_longer(remaining_secs: u64) -> OutboundMessage {
    OutboundMessage::text(format!(
        "Please stay on the page a little longer so your view is counted \
         ({remaining_secs}s left)."
    ))
    .with_buttons([Button::DoneViewing, Button::BackToMenu])
}

pub fn view_credited(credit: Points, balance: Points) -> OutboundMessage {
    OutboundMessage::text(format!(
        "Your view has been verified and {credit} points were added! You now have {balance} points."
    ))
}

pub fn view_already_counted() -> OutboundMessage {
    OutboundMessage::text("This view was already counted.")
}

pub fn no_links_available() -> OutboundMessage {
    OutboundMessage::text("There are no links available at the moment. Please try again later!")
        .with_buttons([Button::BackToMenu])
}

pub fn no_more_links() -> OutboundMessage {
    OutboundMessage::text("No more links available right now. Returning to menu.")
        .with_buttons(MENU_BUTTONS)
}

pub fn no_link_in_progress() -> OutboundMessage {
    OutboundMessage::text("No link in progress.").with_buttons(MENU_BUTTONS)
}

pub fn returning_to_menu() -> OutboundMessage {
    OutboundMessage::text("Returning to menu.").with_buttons(MENU_BUTTONS)
}

pub fn balance(points: Points) -> OutboundMessage {
    OutboundMessage::text(format!("You have {points} points.")).with_buttons([Button::BackToMenu])
}

pub fn explore(config: &EngineConfig) -> OutboundMessage {
    let mut text = String::from(
        "Want to become a better news writer? Learn how to write and publish \
         your own news, and get tips for stress-free writing.",
    );
    if let Some(target) = config.explore_target() {
        text.push('\n');
        text.push_str(target);
    }
    OutboundMessage::text(text).with_buttons([Button::BackToMenu])
}

pub fn buy_points(config: &EngineConfig) -> OutboundMessage {
    OutboundMessage::text("Buy points to post more links.")
        .with_buttons([Button::BackToMenu])
        .with_invoice(Invoice {
            title: "Buy Points".to_string(),
            description: format!(
                "{} {} per point. Points are credited once the payment is confirmed.",
                config.price_per_point, config.invoice_currency
            ),
            payload: BUY_POINTS_PAYLOAD.to_string(),
            currency: config.invoice_currency.clone(),
            unit_price: config.price_per_point,
        })
}

pub fn payment_credited(credited: Points, balance: Points) -> OutboundMessage {
    OutboundMessage::text(format!(
        "Payment received: {credited} points added. You now have {balance} points."
    ))
}

pub fn payment_already_credited() -> OutboundMessage {
    OutboundMessage::text("This payment was already credited.")
}

pub fn try_again() -> OutboundMessage {
    OutboundMessage::text("Something went wrong on our side. Please try again.")
}

fn append_guides(text: &mut String, config: &EngineConfig) {
    if config.guide_links.is_empty() {
        return;
    }
    text.push_str("\n\nGuides:");
    for guide in &config.guide_links {
        text.push('\n');
        text.push_str(guide);
    }
}
