//! Conversation history: the stored-message log (§3 "Stored Message (history)").

use serde::{Deserialize, Serialize};

use crate::signal::types::{Direction, StoredMessage};

/// All logged messages, append-only except for read-flag and delete operations.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MessageHistory {
    messages: Vec<StoredMessage>,
    next_id: u64,
}

impl MessageHistory {
    /// An empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return its assigned id.
    pub fn append(&mut self, contact_rdx: &str, direction: Direction, content: &str, timestamp: u64) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.messages.push(StoredMessage {
            id,
            contact_rdx: contact_rdx.to_string(),
            direction,
            content: content.to_string(),
            timestamp,
            read: direction == Direction::Outgoing,
        });
        id
    }

    /// RDX fingerprints with at least one stored message, most-recently-active first.
    #[must_use]
    pub fn get_conversations(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for message in self.messages.iter().rev() {
            if !seen.contains(&message.contact_rdx) {
                seen.push(message.contact_rdx.clone());
            }
        }
        seen
    }

    /// All messages for a contact, oldest first.
    #[must_use]
    pub fn get_conversation_messages(&self, contact_rdx: &str) -> Vec<&StoredMessage> {
        self.messages.iter().filter(|m| m.contact_rdx == contact_rdx).collect()
    }

    /// Mark every message up to and including `up_to_id` as read. Read flags
    /// only transition unread -> read (§3 invariant).
    pub fn mark_conversation_read_up_to(&mut self, contact_rdx: &str, up_to_id: u64) {
        for message in &mut self.messages {
            if message.contact_rdx == contact_rdx && message.id <= up_to_id {
                message.read = true;
            }
        }
    }

    /// Remove a single message by id. Returns `true` if it existed.
    pub fn delete_message(&mut self, id: u64) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        self.messages.len() != before
    }

    /// Remove every message for a contact.
    pub fn delete_conversation(&mut self, contact_rdx: &str) {
        self.messages.retain(|m| m.contact_rdx != contact_rdx);
    }

    /// Count of unread incoming messages for a contact.
    #[must_use]
    pub fn get_unread_count(&self, contact_rdx: &str) -> usize {
        self.messages
            .iter()
            .filter(|m| m.contact_rdx == contact_rdx && m.direction == Direction::Incoming && !m.read)
            .count()
    }
}
