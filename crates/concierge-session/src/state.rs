//! Session state machine over (SessionState, VoiceChatState).
//!
//! Remote events and user requests are input symbols. Transitions:
//! - (Inactive, *) --StartRequested--> (Connecting, Idle)
//! - (Connecting, *) --StreamReady--> (Connected, Idle)
//! - (Connecting, *) --StartFailed--> (Inactive, Idle)
//! - (Connecting | Connected, *) --StreamDisconnected--> (Inactive, Idle)
//! - (Connected, Idle) --VoiceStartRequested--> (Connected, Loading)
//! - (Connected, Loading) --VoiceConfirmed--> (Connected, Active)
//! - (Connected, Loading) --VoiceFailed--> (Connected, Idle)
//! - (Connected, Loading | Active) --VoiceStopped--> (Connected, Idle)
//! - (any) --Stop--> (Inactive, Idle)

use std::fmt;

use concierge_core::types::{SessionState, VoiceChatState};

use crate::error::SessionError;

/// Input symbols driving the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionInput {
    StartRequested,
    StreamReady,
    StartFailed,
    StreamDisconnected,
    Stop,
    VoiceStartRequested,
    VoiceConfirmed,
    VoiceFailed,
    VoiceStopped,
}

impl fmt::Display for SessionInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionInput::StartRequested => "StartRequested",
            SessionInput::StreamReady => "StreamReady",
            SessionInput::StartFailed => "StartFailed",
            SessionInput::StreamDisconnected => "StreamDisconnected",
            SessionInput::Stop => "Stop",
            SessionInput::VoiceStartRequested => "VoiceStartRequested",
            SessionInput::VoiceConfirmed => "VoiceConfirmed",
            SessionInput::VoiceFailed => "VoiceFailed",
            SessionInput::VoiceStopped => "VoiceStopped",
        };
        write!(f, "{name}")
    }
}

/// Combined session and voice-chat state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MachineState {
    pub session: SessionState,
    pub voice: VoiceChatState,
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.session, self.voice)
    }
}

impl MachineState {
    pub const fn new(session: SessionState, voice: VoiceChatState) -> Self {
        Self { session, voice }
    }

    /// The state reached by applying `input`, or `None` if it is not allowed.
    pub fn next(&self, input: SessionInput) -> Option<MachineState> {
        use SessionInput as I;
        use SessionState::{Connected, Connecting, Inactive};
        use VoiceChatState::{Active, Idle, Loading};

        let target = match (self.session, self.voice, input) {
            (_, _, I::Stop) => (Inactive, Idle),
            (Inactive, _, I::StartRequested) => (Connecting, Idle),
            (Connecting, _, I::StreamReady) => (Connected, Idle),
            (Connecting, _, I::StartFailed) => (Inactive, Idle),
            (Connecting | Connected, _, I::StreamDisconnected) => (Inactive, Idle),
            (Connected, Idle, I::VoiceStartRequested) => (Connected, Loading),
            (Connected, Loading, I::VoiceConfirmed) => (Connected, Active),
            (Connected, Loading, I::VoiceFailed) => (Connected, Idle),
            (Connected, Loading | Active, I::VoiceStopped) => (Connected, Idle),
            _ => return None,
        };
        Some(MachineState::new(target.0, target.1))
    }

    /// Whether `input` is accepted in the current state.
    pub fn accepts(&self, input: SessionInput) -> bool {
        self.next(input).is_some()
    }

    /// Apply `input` in place and return the previous state.
    pub fn apply(&mut self, input: SessionInput) -> Result<MachineState, SessionError> {
        match self.next(input) {
            Some(next) => {
                let previous = *self;
                tracing::debug!("Session state: {} -> {} on {}", previous, next, input);
                *self = next;
                Ok(previous)
            }
            None => Err(SessionError::InvalidTransition(format!(
                "{} on {}",
                self, input
            ))),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
