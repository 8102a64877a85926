use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Lifecycle Enums
// =============================================================================

/// Lifecycle state of the remote avatar streaming session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No remote session exists. Ready to start.
    #[default]
    Inactive,
    /// A start was requested and the stream is not ready yet.
    Connecting,
    /// The remote stream is ready and messages can flow.
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Inactive => write!(f, "Inactive"),
            SessionState::Connecting => write!(f, "Connecting"),
            SessionState::Connected => write!(f, "Connected"),
        }
    }
}

impl SessionState {
    /// Whether a session is connecting or connected.
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Inactive)
    }
}

/// State of the voice-chat sub-session. Only meaningful while connected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceChatState {
    #[default]
    Idle,
    /// Voice start requested, waiting for the remote side to confirm.
    Loading,
    /// Microphone audio is streaming to the remote service.
    Active,
}

impl fmt::Display for VoiceChatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceChatState::Idle => write!(f, "Idle"),
            VoiceChatState::Loading => write!(f, "Loading"),
            VoiceChatState::Active => write!(f, "Active"),
        }
    }
}

/// Who authored a conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSender {
    /// The local user (typed or spoken).
    Local,
    /// The remote avatar.
    Remote,
}

impl fmt::Display for MessageSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageSender::Local => write!(f, "You"),
            MessageSender::Remote => write!(f, "Avatar"),
        }
    }
}

// =============================================================================
// Avatar Settings
// =============================================================================

/// Rendering quality requested from the avatar service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvatarQuality {
    #[default]
    Low,
    Medium,
    High,
}

/// Emotional register of the synthesized voice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceEmotion {
    Excited,
    Serious,
    #[default]
    Friendly,
    Soothing,
    Broadcaster,
}

/// Transport used for the voice-chat channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceChatTransport {
    #[default]
    Websocket,
    Livekit,
}

/// Speech recognition backend used by the remote service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SttProvider {
    #[default]
    Deepgram,
    Gladia,
}

/// Conversation language, stored as its short code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "en")]
    English,
    #[default]
    #[serde(rename = "es")]
    Spanish,
}

impl Language {
    /// Short language code sent to the avatar service.
    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Spanish => "es",
        }
    }

    /// Parse a language code. Region suffixes (`en-US`, `es_MX`) are accepted.
    pub fn from_code(code: &str) -> Option<Self> {
        let primary = code
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match primary.as_str() {
            "en" => Some(Language::English),
            "es" => Some(Language::Spanish),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// What happens to the message log when a new session starts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryPolicy {
    /// Keep the transcript across reconnects.
    #[default]
    Retain,
    /// Start every session with an empty transcript.
    ClearOnStart,
}

// =============================================================================
// Newtype Wrappers
// =============================================================================

/// Unix timestamp in milliseconds (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.0).unwrap_or_default()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_default_and_display() {
        assert_eq!(SessionState::default(), SessionState::Inactive);
        assert_eq!(SessionState::Connecting.to_string(), "Connecting");
        assert!(!SessionState::Inactive.is_active());
        assert!(SessionState::Connecting.is_active());
        assert!(SessionState::Connected.is_active());
    }

    #[test]
    fn test_voice_chat_state_default() {
        assert_eq!(VoiceChatState::default(), VoiceChatState::Idle);
        assert_eq!(VoiceChatState::Loading.to_string(), "Loading");
    }

    #[test]
    fn test_enum_serialization_is_snake_case() {
        assert_eq!(
            serde_json::to_string(&SessionState::Connected).unwrap(),
            "\"connected\""
        );
        assert_eq!(
            serde_json::to_string(&VoiceChatTransport::Websocket).unwrap(),
            "\"websocket\""
        );
        assert_eq!(
            serde_json::to_string(&HistoryPolicy::ClearOnStart).unwrap(),
            "\"clear_on_start\""
        );
    }

    #[test]
    fn test_language_codes() {
        assert_eq!(Language::English.code(), "en");
        assert_eq!(Language::Spanish.code(), "es");
        assert_eq!(Language::from_code("en"), Some(Language::English));
        assert_eq!(Language::from_code("ES"), Some(Language::Spanish));
        assert_eq!(Language::from_code("en-US"), Some(Language::English));
        assert_eq!(Language::from_code("es_MX"), Some(Language::Spanish));
        assert_eq!(Language::from_code("fr"), None);
        assert_eq!(Language::from_code(""), None);
    }

    #[test]
    fn test_language_serializes_as_code() {
        assert_eq!(serde_json::to_string(&Language::English).unwrap(), "\"en\"");
        let parsed: Language = serde_json::from_str("\"es\"").unwrap();
        assert_eq!(parsed, Language::Spanish);
    }

    #[test]
    fn test_avatar_setting_defaults() {
        assert_eq!(AvatarQuality::default(), AvatarQuality::Low);
        assert_eq!(VoiceEmotion::default(), VoiceEmotion::Friendly);
        assert_eq!(SttProvider::default(), SttProvider::Deepgram);
        assert_eq!(Language::default(), Language::Spanish);
    }

    #[test]
    fn test_timestamp_to_datetime_roundtrip() {
        let now = Utc::now();
        let ts = Timestamp::from_datetime(now);
        assert_eq!(ts.to_datetime().timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn test_timestamp_ordering() {
        let earlier = Timestamp(1_000);
        let later = Timestamp(2_000);
        assert!(earlier < later);
    }
}
