//! In-process avatar service for tests and offline runs.
//!
//! Deterministic stand-in for the vendor streaming SDK. Every remote call is
//! counted so callers can assert exactly what reached the "network".

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::remote::{
    AvatarHandle, AvatarService, EventSink, MediaStream, RemoteError, SessionConfig,
    StreamingEvent,
};
use crate::token::AccessToken;

/// Produces the avatar's answer to a text message. `None` means silence.
pub type ReplyFn = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// When a created session reports "stream ready".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyMode {
    Immediate,
    After(Duration),
    Never,
}

#[derive(Debug, Default)]
struct Counters {
    create: AtomicUsize,
    close: AtomicUsize,
    start_voice: AtomicUsize,
    stop_voice: AtomicUsize,
    send: AtomicUsize,
    interrupt: AtomicUsize,
}

struct MockState {
    ready: ReadyMode,
    create_delay: Option<Duration>,
    voice_delay: Option<Duration>,
    send_delay: Option<Duration>,
    voice_on: bool,
    fail_create: Option<RemoteError>,
    fail_send: Option<RemoteError>,
    fail_voice: Option<RemoteError>,
    reply: Option<ReplyFn>,
    sent: Vec<String>,
    last_config: Option<SessionConfig>,
    last_token: Option<AccessToken>,
    current: Option<Arc<MockSession>>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            ready: ReadyMode::Immediate,
            create_delay: None,
            voice_delay: None,
            send_delay: None,
            voice_on: false,
            fail_create: None,
            fail_send: None,
            fail_voice: None,
            reply: None,
            sent: Vec::new(),
            last_config: None,
            last_token: None,
            current: None,
        }
    }
}

#[derive(Default)]
struct MockInner {
    counters: Counters,
    state: Mutex<MockState>,
}

impl MockInner {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Mock avatar service. Clones share counters and configuration.
#[derive(Clone, Default)]
pub struct MockAvatarService {
    inner: Arc<MockInner>,
}

impl fmt::Debug for MockAvatarService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockAvatarService")
            .field("counters", &self.inner.counters)
            .finish_non_exhaustive()
    }
}

impl MockAvatarService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ready(self, ready: ReadyMode) -> Self {
        self.inner.state().ready = ready;
        self
    }

    /// Delay every create call, simulating a slow network.
    pub fn with_create_delay(self, delay: Duration) -> Self {
        self.inner.state().create_delay = Some(delay);
        self
    }

    /// Delay every voice start before it takes effect.
    pub fn with_voice_delay(self, delay: Duration) -> Self {
        self.inner.state().voice_delay = Some(delay);
        self
    }

    /// Delay every text send before it is delivered.
    pub fn with_send_delay(self, delay: Duration) -> Self {
        self.inner.state().send_delay = Some(delay);
        self
    }

    pub fn with_reply<F>(self, reply: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.inner.state().reply = Some(Arc::new(reply));
        self
    }

    pub fn fail_create(&self, error: Option<RemoteError>) {
        self.inner.state().fail_create = error;
    }

    pub fn fail_send(&self, error: Option<RemoteError>) {
        self.inner.state().fail_send = error;
    }

    pub fn fail_voice(&self, error: Option<RemoteError>) {
        self.inner.state().fail_voice = error;
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    pub fn create_calls(&self) -> usize {
        self.inner.counters.create.load(Ordering::SeqCst)
    }

    /// Every `close()` invocation, including repeated ones.
    pub fn close_calls(&self) -> usize {
        self.inner.counters.close.load(Ordering::SeqCst)
    }

    pub fn start_voice_calls(&self) -> usize {
        self.inner.counters.start_voice.load(Ordering::SeqCst)
    }

    pub fn stop_voice_calls(&self) -> usize {
        self.inner.counters.stop_voice.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> usize {
        self.inner.counters.send.load(Ordering::SeqCst)
    }

    pub fn interrupt_calls(&self) -> usize {
        self.inner.counters.interrupt.load(Ordering::SeqCst)
    }

    /// Total number of calls that reached the service.
    pub fn remote_calls(&self) -> usize {
        self.create_calls()
            + self.close_calls()
            + self.start_voice_calls()
            + self.stop_voice_calls()
            + self.send_calls()
            + self.interrupt_calls()
    }

    /// Whether the remote side is currently capturing voice.
    pub fn voice_on(&self) -> bool {
        self.inner.state().voice_on
    }

    /// Whether a created session has not been closed yet.
    pub fn has_open_session(&self) -> bool {
        self.inner.state().current.is_some()
    }

    pub fn sent_messages(&self) -> Vec<String> {
        self.inner.state().sent.clone()
    }

    pub fn last_config(&self) -> Option<SessionConfig> {
        self.inner.state().last_config.clone()
    }

    pub fn last_token(&self) -> Option<AccessToken> {
        self.inner.state().last_token.clone()
    }

    // -------------------------------------------------------------------------
    // Remote-initiated behaviour
    // -------------------------------------------------------------------------

    /// Push an event into the open session. Returns false if none is open.
    pub fn emit(&self, event: StreamingEvent) -> bool {
        let current = self.inner.state().current.clone();
        current.is_some_and(|session| session.emit(event))
    }

    /// Drop the stream from the remote side.
    pub fn disconnect(&self) -> bool {
        self.emit(StreamingEvent::StreamDisconnected)
    }
}

#[async_trait]
impl AvatarService for MockAvatarService {
    async fn create_session(
        &self,
        token: &AccessToken,
        config: &SessionConfig,
        events: EventSink,
    ) -> Result<Arc<dyn AvatarHandle>, RemoteError> {
        self.inner.counters.create.fetch_add(1, Ordering::SeqCst);
        let (delay, ready, failure) = {
            let mut state = self.inner.state();
            state.last_config = Some(config.clone());
            state.last_token = Some(token.clone());
            (state.create_delay, state.ready, state.fail_create.clone())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = failure {
            return Err(error);
        }

        let session = Arc::new(MockSession {
            id: Uuid::new_v4(),
            inner: Arc::clone(&self.inner),
            sink: Mutex::new(Some(events)),
            closed: AtomicBool::new(false),
        });
        self.inner.state().current = Some(Arc::clone(&session));
        tracing::debug!(mock_session = %session.id, "Mock avatar session created");

        match ready {
            ReadyMode::Immediate => {
                session.emit(session.ready_event());
            }
            ReadyMode::After(delay) => {
                let pending = Arc::clone(&session);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    pending.emit(pending.ready_event());
                });
            }
            ReadyMode::Never => {}
        }

        Ok(session)
    }
}

// =============================================================================
// Session handle
// =============================================================================

struct MockSession {
    id: Uuid,
    inner: Arc<MockInner>,
    sink: Mutex<Option<EventSink>>,
    closed: AtomicBool,
}

impl MockSession {
    fn sink(&self) -> MutexGuard<'_, Option<EventSink>> {
        self.sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: StreamingEvent) -> bool {
        match self.sink().as_ref() {
            Some(sink) => sink.send(event).is_ok(),
            None => false,
        }
    }

    fn ready_event(&self) -> StreamingEvent {
        StreamingEvent::StreamReady(MediaStream {
            stream_id: format!("mock-{}", self.id),
        })
    }

    fn ensure_open(&self) -> Result<(), RemoteError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("session closed".into()));
        }
        Ok(())
    }

    fn speak(&self, reply: &str) {
        self.emit(StreamingEvent::AvatarStartTalking);
        for chunk in reply.split_inclusive(' ') {
            self.emit(StreamingEvent::AvatarTalkingMessage {
                text: chunk.to_string(),
            });
        }
        self.emit(StreamingEvent::AvatarEndMessage {
            text: String::new(),
        });
        self.emit(StreamingEvent::AvatarStopTalking);
    }
}

#[async_trait]
impl AvatarHandle for MockSession {
    async fn start_voice(&self) -> Result<(), RemoteError> {
        self.inner.counters.start_voice.fetch_add(1, Ordering::SeqCst);
        let delay = self.inner.state().voice_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.ensure_open()?;
        let mut state = self.inner.state();
        match state.fail_voice.clone() {
            Some(error) => Err(error),
            None => {
                state.voice_on = true;
                Ok(())
            }
        }
    }

    async fn stop_voice(&self) -> Result<(), RemoteError> {
        self.inner.counters.stop_voice.fetch_add(1, Ordering::SeqCst);
        self.ensure_open()?;
        self.inner.state().voice_on = false;
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<(), RemoteError> {
        self.inner.counters.send.fetch_add(1, Ordering::SeqCst);
        let delay = self.inner.state().send_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.ensure_open()?;
        let (failure, reply) = {
            let mut state = self.inner.state();
            state.sent.push(text.to_string());
            (state.fail_send.clone(), state.reply.clone())
        };
        if let Some(error) = failure {
            return Err(error);
        }
        if let Some(answer) = reply.and_then(|reply| reply(text)) {
            self.speak(&answer);
        }
        Ok(())
    }

    async fn interrupt(&self) -> Result<(), RemoteError> {
        self.inner.counters.interrupt.fetch_add(1, Ordering::SeqCst);
        self.ensure_open()?;
        self.emit(StreamingEvent::AvatarStopTalking);
        Ok(())
    }

    fn close(&self) {
        self.inner.counters.close.fetch_add(1, Ordering::SeqCst);
        if self.closed.swap(true, Ordering::SeqCst) {
            tracing::warn!(mock_session = %self.id, "Mock avatar session closed twice");
            return;
        }
        self.sink().take();
        let mut state = self.inner.state();
        if state
            .current
            .as_ref()
            .is_some_and(|current| current.id == self.id)
        {
            state.current = None;
            state.voice_on = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn token() -> AccessToken {
        AccessToken::new("tok").unwrap()
    }

    #[tokio::test]
    async fn test_create_emits_ready_immediately() {
        let service = MockAvatarService::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = service
            .create_session(&token(), &SessionConfig::default(), tx)
            .await
            .unwrap();
        assert!(matches!(rx.recv().await, Some(StreamingEvent::StreamReady(_))));
        assert_eq!(service.create_calls(), 1);
        assert!(service.has_open_session());
        assert_eq!(service.last_token().unwrap().as_str(), "tok");
    }

    #[tokio::test]
    async fn test_never_ready() {
        let service = MockAvatarService::new().with_ready(ReadyMode::Never);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = service
            .create_session(&token(), &SessionConfig::default(), tx)
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_create_failure() {
        let service = MockAvatarService::new();
        service.fail_create(Some(RemoteError::Rejected("quota".into())));
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = service
            .create_session(&token(), &SessionConfig::default(), tx)
            .await;
        assert!(matches!(result, Err(RemoteError::Rejected(_))));
        assert!(!service.has_open_session());
    }

    #[tokio::test]
    async fn test_reply_is_streamed_as_chunks() {
        let service =
            MockAvatarService::new().with_reply(|text| Some(format!("You said {text}")));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = service
            .create_session(&token(), &SessionConfig::default(), tx)
            .await
            .unwrap();
        rx.recv().await.unwrap(); // stream ready

        handle.send_text("hi").await.unwrap();
        assert_eq!(rx.recv().await, Some(StreamingEvent::AvatarStartTalking));
        let mut spoken = String::new();
        while let Some(StreamingEvent::AvatarTalkingMessage { text }) = rx.recv().await {
            spoken.push_str(&text);
        }
        assert_eq!(spoken, "You said hi");
        assert_eq!(service.sent_messages(), vec!["hi".to_string()]);
    }

    #[tokio::test]
    async fn test_close_counts_every_call_and_drops_sink() {
        let service = MockAvatarService::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = service
            .create_session(&token(), &SessionConfig::default(), tx)
            .await
            .unwrap();
        rx.recv().await.unwrap();

        handle.close();
        assert!(!service.has_open_session());
        assert!(rx.recv().await.is_none());
        assert!(handle.send_text("late").await.is_err());

        handle.close();
        assert_eq!(service.close_calls(), 2);
    }
}
