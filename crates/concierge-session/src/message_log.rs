//! Append-only conversation record.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use concierge_core::types::MessageSender;

/// One conversation turn. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: Uuid,
    sender: MessageSender,
    content: String,
    timestamp: DateTime<Utc>,
}

impl Message {
    fn new(sender: MessageSender, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            content,
            timestamp: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn sender(&self) -> MessageSender {
        self.sender
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Ordered, append-only record of conversation turns.
///
/// Insertion order is display order. Entries are never edited or removed
/// individually; [`MessageLog::clear`] drops the whole transcript.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: Mutex<Vec<Message>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Message>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a turn and return the stored record.
    pub fn append(&self, sender: MessageSender, content: impl Into<String>) -> Message {
        let message = Message::new(sender, content.into());
        self.entries().push(message.clone());
        message
    }

    /// Snapshot of every turn in insertion order.
    pub fn all(&self) -> Vec<Message> {
        self.entries().clone()
    }

    pub fn last(&self) -> Option<Message> {
        self.entries().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Drop the whole transcript, when a new conversation replaces the old one.
    pub fn clear(&self) {
        self.entries().clear();
    }
}
