//! Boundary to the remote avatar streaming service.
//!
//! The service is opaque: it creates sessions, accepts text and voice
//! toggles, and reports what happens through [`StreamingEvent`]s pushed into
//! the sink handed over at creation time.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use concierge_core::config::{AvatarConfig, VoiceConfig};
use concierge_core::types::{AvatarQuality, Language, SttProvider, VoiceChatTransport};
use concierge_permission::PermissionError;

use crate::token::AccessToken;

/// Channel the remote service pushes session events into.
pub type EventSink = mpsc::UnboundedSender<StreamingEvent>;

/// Settings for one remote session. Supplied at start time.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub quality: AvatarQuality,
    pub avatar_name: String,
    pub knowledge_base_id: String,
    pub voice: VoiceConfig,
    pub language: Language,
    pub transport: VoiceChatTransport,
    pub stt_provider: SttProvider,
    /// Start voice chat as soon as the stream is ready.
    pub voice_chat: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&AvatarConfig::default())
    }
}

impl From<&AvatarConfig> for SessionConfig {
    fn from(avatar: &AvatarConfig) -> Self {
        Self {
            quality: avatar.quality,
            avatar_name: avatar.avatar_name.clone(),
            knowledge_base_id: avatar.knowledge_base_id.clone(),
            voice: avatar.voice.clone(),
            language: avatar.language,
            transport: avatar.transport,
            stt_provider: avatar.stt_provider,
            voice_chat: false,
        }
    }
}

impl SessionConfig {
    pub fn with_voice_chat(mut self, voice_chat: bool) -> Self {
        self.voice_chat = voice_chat;
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }
}

/// Descriptor of the remote audio/video output surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaStream {
    pub stream_id: String,
}

/// Events reported by a remote session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamingEvent {
    AvatarStartTalking,
    AvatarStopTalking,
    StreamDisconnected,
    StreamReady(MediaStream),
    UserStart,
    UserStop,
    /// Partial transcript of what the user is saying.
    UserTalkingMessage { text: String },
    /// The user finished a turn. `text` may be empty when only partials
    /// carried the transcript.
    UserEndMessage { text: String },
    AvatarTalkingMessage { text: String },
    AvatarEndMessage { text: String },
}

impl StreamingEvent {
    /// Every event name the session manager listens for.
    pub const NAMES: [&'static str; 10] = [
        "avatar_start_talking",
        "avatar_stop_talking",
        "stream_disconnected",
        "stream_ready",
        "user_start",
        "user_stop",
        "user_talking_message",
        "user_end_message",
        "avatar_talking_message",
        "avatar_end_message",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StreamingEvent::AvatarStartTalking => "avatar_start_talking",
            StreamingEvent::AvatarStopTalking => "avatar_stop_talking",
            StreamingEvent::StreamDisconnected => "stream_disconnected",
            StreamingEvent::StreamReady(_) => "stream_ready",
            StreamingEvent::UserStart => "user_start",
            StreamingEvent::UserStop => "user_stop",
            StreamingEvent::UserTalkingMessage { .. } => "user_talking_message",
            StreamingEvent::UserEndMessage { .. } => "user_end_message",
            StreamingEvent::AvatarTalkingMessage { .. } => "avatar_talking_message",
            StreamingEvent::AvatarEndMessage { .. } => "avatar_end_message",
        }
    }
}

/// Failure reported by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("rejected by avatar service: {0}")]
    Rejected(String),
    #[error("transport error: {0}")]
    Transport(String),
    /// Local microphone capture failed while starting voice.
    #[error("microphone: {0}")]
    Microphone(PermissionError),
}

/// The remote avatar service.
#[async_trait]
pub trait AvatarService: Send + Sync {
    /// Create a streaming session. Events for the session are pushed into
    /// `events` for as long as the session lives.
    async fn create_session(
        &self,
        token: &AccessToken,
        config: &SessionConfig,
        events: EventSink,
    ) -> Result<Arc<dyn AvatarHandle>, RemoteError>;
}

/// One live remote session.
#[async_trait]
pub trait AvatarHandle: Send + Sync {
    async fn start_voice(&self) -> Result<(), RemoteError>;

    async fn stop_voice(&self) -> Result<(), RemoteError>;

    async fn send_text(&self, text: &str) -> Result<(), RemoteError>;

    /// Ask the avatar to stop speaking.
    async fn interrupt(&self) -> Result<(), RemoteError>;

    /// Close the transport and release the media stream.
    ///
    /// Synchronous so it can run from `Drop`.
    fn close(&self);
}
