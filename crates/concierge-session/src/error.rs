//! Error types for the session lifecycle.

use std::time::Duration;

use concierge_core::error::ConciergeError;
use concierge_core::types::SessionState;
use concierge_permission::PermissionError;

/// Errors from the session manager and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("access token unavailable: {0}")]
    Auth(String),
    #[error("microphone unavailable: {0}")]
    Permission(#[from] PermissionError),
    #[error("remote session start failed: {0}")]
    RemoteStart(String),
    #[error("stream not ready after {0:?}")]
    Timeout(Duration),
    #[error("send failed: {0}")]
    Send(String),
    #[error("session is not connected")]
    NotConnected,
    #[error("a session is already {0}")]
    AlreadyActive(SessionState),
    #[error("session start cancelled")]
    Cancelled,
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),
    #[error("configuration cannot change while the session is {0}")]
    ConfigLocked(SessionState),
}

impl SessionError {
    /// Short machine-readable category.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Auth(_) => "auth",
            SessionError::Permission(_) => "permission",
            SessionError::RemoteStart(_) => "remote_start",
            SessionError::Timeout(_) => "timeout",
            SessionError::Send(_) => "send",
            SessionError::NotConnected => "not_connected",
            SessionError::AlreadyActive(_) => "already_active",
            SessionError::Cancelled => "cancelled",
            SessionError::EmptyMessage => "empty_message",
            SessionError::MessageTooLong(_) => "message_too_long",
            SessionError::InvalidTransition(_) => "invalid_transition",
            SessionError::ConfigLocked(_) => "config_locked",
        }
    }

    /// Transient failures that leave a connected session usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SessionError::Send(_)
                | SessionError::NotConnected
                | SessionError::EmptyMessage
                | SessionError::MessageTooLong(_)
        )
    }

    /// Text to show the user.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Auth(_) => {
                "Could not get access to the assistant. Please try again.".to_string()
            }
            SessionError::Permission(e) => e.guidance().to_string(),
            SessionError::RemoteStart(_) | SessionError::Timeout(_) => {
                "The assistant could not be started. Please try again in a moment.".to_string()
            }
            SessionError::Send(_) => {
                "Your message could not be delivered. Please try again.".to_string()
            }
            SessionError::NotConnected => "Start a session first.".to_string(),
            SessionError::AlreadyActive(_) => "A session is already running.".to_string(),
            SessionError::Cancelled => "The session was stopped.".to_string(),
            SessionError::EmptyMessage => "Please type a message.".to_string(),
            SessionError::MessageTooLong(max) => {
                format!("Messages are limited to {max} characters.")
            }
            SessionError::InvalidTransition(_) => {
                "That action is not available right now.".to_string()
            }
            SessionError::ConfigLocked(_) => {
                "Stop the session before changing settings.".to_string()
            }
        }
    }
}

impl From<SessionError> for ConciergeError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Permission(e) => e.into(),
            other => ConciergeError::Session(other.to_string()),
        }
    }
}
