use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{MessageSender, SessionState, Timestamp, VoiceChatState};

/// Observable events published by the session manager.
///
/// Consumed by the presentation layer to re-render state, transcript and
/// speaking indicators without polling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ConciergeEvent {
    // =========================================================================
    // Lifecycle Events
    // =========================================================================
    SessionStateChanged {
        session_id: Option<Uuid>,
        from: SessionState,
        to: SessionState,
        timestamp: Timestamp,
    },

    VoiceChatStateChanged {
        from: VoiceChatState,
        to: VoiceChatState,
        timestamp: Timestamp,
    },

    /// The remote media stream is available for display.
    StreamReady {
        session_id: Option<Uuid>,
        stream_id: String,
        timestamp: Timestamp,
    },

    /// The remote side closed the stream.
    StreamDisconnected {
        session_id: Option<Uuid>,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Conversation Events
    // =========================================================================
    /// A turn was appended to the message log.
    MessageAppended {
        message_id: Uuid,
        sender: MessageSender,
        content: String,
        timestamp: Timestamp,
    },

    /// Partial transcript text for a turn still in progress.
    TranscriptPartial {
        sender: MessageSender,
        text: String,
        timestamp: Timestamp,
    },

    AvatarTalkingChanged {
        talking: bool,
        timestamp: Timestamp,
    },

    UserTalkingChanged {
        talking: bool,
        timestamp: Timestamp,
    },

    // =========================================================================
    // Errors
    // =========================================================================
    /// An operation failed; `message` is user-facing guidance.
    SessionError {
        kind: String,
        message: String,
        timestamp: Timestamp,
    },
}

impl ConciergeEvent {
    /// Returns the timestamp of this event.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            ConciergeEvent::SessionStateChanged { timestamp, .. }
            | ConciergeEvent::VoiceChatStateChanged { timestamp, .. }
            | ConciergeEvent::StreamReady { timestamp, .. }
            | ConciergeEvent::StreamDisconnected { timestamp, .. }
            | ConciergeEvent::MessageAppended { timestamp, .. }
            | ConciergeEvent::TranscriptPartial { timestamp, .. }
            | ConciergeEvent::AvatarTalkingChanged { timestamp, .. }
            | ConciergeEvent::UserTalkingChanged { timestamp, .. }
            | ConciergeEvent::SessionError { timestamp, .. } => *timestamp,
        }
    }

    /// Returns a human-readable name for this event type.
    pub fn event_name(&self) -> &'static str {
        match self {
            ConciergeEvent::SessionStateChanged { .. } => "session_state_changed",
            ConciergeEvent::VoiceChatStateChanged { .. } => "voice_chat_state_changed",
            ConciergeEvent::StreamReady { .. } => "stream_ready",
            ConciergeEvent::StreamDisconnected { .. } => "stream_disconnected",
            ConciergeEvent::MessageAppended { .. } => "message_appended",
            ConciergeEvent::TranscriptPartial { .. } => "transcript_partial",
            ConciergeEvent::AvatarTalkingChanged { .. } => "avatar_talking_changed",
            ConciergeEvent::UserTalkingChanged { .. } => "user_talking_changed",
            ConciergeEvent::SessionError { .. } => "session_error",
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
