//! Concierge Session crate - avatar session lifecycle.
//!
//! Obtains access tokens, opens and closes remote avatar streaming sessions,
//! toggles voice chat behind the microphone permission gate, and assembles
//! the conversation transcript into an ordered message log.

pub mod error;
pub mod manager;
pub mod message_log;
pub mod mock;
pub mod remote;
pub mod state;
pub mod token;

pub use error::SessionError;
pub use manager::{
    ManagerSettings, SessionHandle, SessionManager, SessionSnapshot, MAX_MESSAGE_LENGTH,
};
pub use message_log::{Message, MessageLog};
pub use mock::{MockAvatarService, ReadyMode};
pub use remote::{
    AvatarHandle, AvatarService, EventSink, MediaStream, RemoteError, SessionConfig,
    StreamingEvent,
};
pub use state::{MachineState, SessionInput};
pub use token::{AccessToken, HttpTokenProvider, StaticTokenProvider, TokenProvider};
