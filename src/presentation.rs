//! Turns orchestrator output into display text, filtered by chat context (§4.8).

use crate::signal::types::Contact;

/// An event pushed onto the presentation queue by the orchestrator or a
/// command handler.
#[derive(Debug, Clone)]
pub enum PresentationEvent {
    /// A message was decrypted from `sender_rdx`.
    MessageReceived { sender_rdx: String, sender_alias: Option<String>, content: String, timestamp: u64 },
    /// A new Signal session was established with `rdx`.
    SessionEstablished { rdx: String },
    /// The relay's verdict on an outbound message. `event_id` is empty when
    /// the message never reached the point of having an id (encrypt/sign
    /// failure before the bus event existed).
    MessageSent { peer: String, event_id: String, accepted: bool },
    /// The relay's verdict on a bundle publish/unpublish. `event_id` is
    /// empty on timeout, matching the bus event never having been
    /// acknowledged.
    BundlePublished { event_id: String, accepted: bool },
    /// The current contact list, for `/peers`.
    IdentitiesListed { contacts: Vec<Contact> },
    /// A subscription reached end-of-stored-events.
    SubscriptionEstablished { subscription_id: String },
    /// A peer published (or updated) a prekey bundle.
    BundleAnnouncementReceived { pubkey: String, bundle_content: String, event_id: String },
    /// A peer unpublished their bundle (empty content).
    BundleAnnouncementRemoved { pubkey: String, event_id: String },
    /// Direct acknowledgement of a parsed command, e.g. "entered chat with bob".
    CommandFeedback(String),
    /// Process-level notice: connects, disconnects, startup banner lines.
    System(String),
}

/// How a [`PresentationEvent`] is treated by [`filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationCategory {
    /// Always shown, regardless of chat context.
    System,
    /// Always shown, regardless of chat context.
    CommandFeedback,
    /// Shown only when no chat context is set, or it matches the active contact.
    Chat,
}

impl PresentationEvent {
    /// Which filtering bucket this event falls into.
    #[must_use]
    pub fn category(&self) -> PresentationCategory {
        match self {
            Self::System(_) => PresentationCategory::System,
            Self::CommandFeedback(_) => PresentationCategory::CommandFeedback,
            _ => PresentationCategory::Chat,
        }
    }

    /// The contact this event is "about", if any. `None` means the event
    /// has no contact association and is dropped while a chat context is set.
    #[must_use]
    pub fn contact(&self) -> Option<&str> {
        match self {
            Self::MessageReceived { sender_rdx, .. } => Some(sender_rdx),
            Self::SessionEstablished { rdx } => Some(rdx),
            Self::MessageSent { peer, .. } => Some(peer),
            _ => None,
        }
    }

    /// Render this event as a human-readable line. Some variants are
    /// log-only and render to `None` (never surfaced to the user).
    #[must_use]
    pub fn render(&self) -> Option<String> {
        match self {
            Self::MessageReceived { sender_rdx, sender_alias, content, .. } => {
                let who = sender_alias.as_deref().unwrap_or(sender_rdx);
                Some(format!("Message from {who}: {content}"))
            }
            Self::SessionEstablished { rdx } => Some(format!("Encrypted session established with {rdx}")),
            Self::MessageSent { peer, accepted: true, .. } => Some(format!("Message sent to {peer}")),
            Self::MessageSent { peer, accepted: false, .. } => Some(format!("Failed to send message to {peer}")),
            Self::BundlePublished { accepted: true, .. } => Some("Identity published".to_string()),
            Self::BundlePublished { accepted: false, .. } => Some("Failed to publish identity".to_string()),
            Self::IdentitiesListed { contacts } => Some(render_contacts(contacts)),
            Self::CommandFeedback(text) | Self::System(text) => Some(text.clone()),
            Self::SubscriptionEstablished { .. }
            | Self::BundleAnnouncementReceived { .. }
            | Self::BundleAnnouncementRemoved { .. } => None,
        }
    }
}

fn render_contacts(contacts: &[Contact]) -> String {
    if contacts.is_empty() {
        return "No identities".to_string();
    }
    contacts
        .iter()
        .map(|c| match &c.alias {
            Some(alias) => format!("{alias} ({})", c.rdx),
            None => c.rdx.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Consume a presentation event, against the current chat context, into
/// zero or one display line. `chat_context` is the active contact RDX, if
/// chat mode is entered.
#[must_use]
pub fn filter(event: &PresentationEvent, chat_context: Option<&str>) -> Option<String> {
    let passes = match event.category() {
        PresentationCategory::System | PresentationCategory::CommandFeedback => true,
        PresentationCategory::Chat => match chat_context {
            None => true,
            Some(active) => event.contact() == Some(active),
        },
    };
    if !passes {
        return None;
    }
    event.render()
}

/// UI-facing notice that chat mode was entered with `rdx`.
#[must_use]
pub fn enter_chat_mode_notice(rdx: &str) -> String {
    format!("Entered chat with {rdx}. Type /leave to exit.")
}

/// UI-facing notice that chat mode was exited.
#[must_use]
pub fn exit_chat_mode_notice() -> String {
    "Left chat mode.".to_string()
}
