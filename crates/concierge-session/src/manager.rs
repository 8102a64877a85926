//! Session manager owning one logical avatar conversation.
//!
//! The manager drives the remote session through the state machine in
//! [`crate::state`], feeds remote events into the [`MessageLog`], and
//! publishes [`ConciergeEvent`]s for the presentation layer.
//!
//! Concurrency model:
//! - All mutable state sits behind one `std::sync::Mutex` that is never held
//!   across an `.await`.
//! - Every teardown bumps a generation counter. An in-flight start notices
//!   the bump at its next step and closes whatever it created. A start torn
//!   down by a remote disconnect fails as a remote start error.
//! - Voice requests carry an epoch. A voice start only settles the state if
//!   no later start or stop came in while it was pending.
//! - Remote events are pumped by one task per session. Handler failures are
//!   logged and never reach the caller.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use concierge_core::config::SessionSettings;
use concierge_core::events::ConciergeEvent;
use concierge_core::types::{HistoryPolicy, Language, MessageSender, SessionState, Timestamp, VoiceChatState};
use concierge_permission::PermissionGate;

use crate::error::SessionError;
use crate::message_log::{Message, MessageLog};
use crate::remote::{
    AvatarHandle, AvatarService, EventSink, MediaStream, RemoteError, SessionConfig,
    StreamingEvent,
};
use crate::state::{MachineState, SessionInput};
use crate::token::{AccessToken, TokenProvider};

/// Maximum length of an outbound text message, in characters.
pub const MAX_MESSAGE_LENGTH: usize = 2000;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Timeouts and history policy for a [`SessionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerSettings {
    pub connect_timeout: Duration,
    pub stream_ready_timeout: Duration,
    pub history: HistoryPolicy,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from(&SessionSettings::default())
    }
}

impl From<&SessionSettings> for ManagerSettings {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            stream_ready_timeout: Duration::from_secs(settings.stream_ready_timeout_secs),
            history: settings.history,
        }
    }
}

/// A session bound to a freshly obtained token, with its event channel
/// already in place so no remote event can be missed.
#[derive(Debug)]
pub struct SessionHandle {
    session_id: Uuid,
    token: AccessToken,
    sink: EventSink,
    events: mpsc::UnboundedReceiver<StreamingEvent>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn token(&self) -> &AccessToken {
        &self.token
    }

    /// Remote event names routed into the manager.
    pub fn listened_events(&self) -> &'static [&'static str] {
        &StreamingEvent::NAMES
    }
}

/// Point-in-time view of the manager for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: Option<Uuid>,
    pub session: SessionState,
    pub voice: VoiceChatState,
    pub avatar_talking: bool,
    pub user_talking: bool,
    pub media: Option<MediaStream>,
    pub message_count: usize,
}

// =============================================================================
// Shared state
// =============================================================================

struct Core {
    machine: MachineState,
    generation: u64,
    /// Generation and input of the most recent teardown.
    last_teardown: Option<(u64, SessionInput)>,
    /// Bumped on every voice start or stop request.
    voice_epoch: u64,
    session_id: Option<Uuid>,
    handle: Option<Arc<dyn AvatarHandle>>,
    pump: Option<JoinHandle<()>>,
    media: Option<MediaStream>,
    pending_local: String,
    pending_remote: String,
    avatar_talking: bool,
    user_talking: bool,
    draft: SessionConfig,
}

struct Shared {
    core: Mutex<Core>,
    log: MessageLog,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<ConciergeEvent>,
}

impl Shared {
    fn new(draft: SessionConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Inactive);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            core: Mutex::new(Core {
                machine: MachineState::default(),
                generation: 0,
                last_teardown: None,
                voice_epoch: 0,
                session_id: None,
                handle: None,
                pump: None,
                media: None,
                pending_local: String::new(),
                pending_remote: String::new(),
                avatar_talking: false,
                user_talking: false,
                draft,
            }),
            log: MessageLog::new(),
            state,
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(|poisoned| {
            warn!("Session mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn publish(&self, event: ConciergeEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish_message(&self, message: &Message) {
        self.publish(ConciergeEvent::MessageAppended {
            message_id: message.id(),
            sender: message.sender(),
            content: message.content().to_string(),
            timestamp: Timestamp::from_datetime(message.timestamp()),
        });
    }

    fn publish_error(&self, error: &SessionError) {
        self.publish(ConciergeEvent::SessionError {
            kind: error.kind().to_string(),
            message: error.user_message(),
            timestamp: Timestamp::now(),
        });
    }

    /// Apply `input` and publish the resulting changes. Caller holds the lock.
    fn transition(&self, core: &mut Core, input: SessionInput) -> Result<(), SessionError> {
        let previous = core.machine.apply(input)?;
        let current = core.machine;
        let now = Timestamp::now();

        if previous.session != current.session {
            self.state.send_replace(current.session);
            self.publish(ConciergeEvent::SessionStateChanged {
                session_id: core.session_id,
                from: previous.session,
                to: current.session,
                timestamp: now,
            });
        }
        if previous.voice != current.voice {
            self.publish(ConciergeEvent::VoiceChatStateChanged {
                from: previous.voice,
                to: current.voice,
                timestamp: now,
            });
        }
        Ok(())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().generation == generation
    }

    fn ensure_current(&self, generation: u64) -> Result<(), SessionError> {
        if self.is_current(generation) {
            Ok(())
        } else {
            Err(self.interrupted(generation))
        }
    }

    /// Error for a start whose attempt was torn down before it finished.
    fn interrupted(&self, generation: u64) -> SessionError {
        match self.lock().last_teardown {
            Some((torn, SessionInput::StreamDisconnected)) if torn == generation => {
                SessionError::RemoteStart("stream disconnected before ready".into())
            }
            _ => SessionError::Cancelled,
        }
    }

    /// Inactive -> Connecting. Returns the generation of the new attempt.
    fn begin_connecting(&self, session_id: Uuid) -> Result<u64, SessionError> {
        let mut core = self.lock();
        if core.machine.session.is_active() {
            return Err(SessionError::AlreadyActive(core.machine.session));
        }
        core.generation += 1;
        core.session_id = Some(session_id);
        self.transition(&mut core, SessionInput::StartRequested)?;
        Ok(core.generation)
    }

    /// Adopt a freshly created remote session and start pumping its events.
    ///
    /// If the attempt was superseded meanwhile the session is closed at once.
    fn install(
        self: &Arc<Self>,
        generation: u64,
        handle: Arc<dyn AvatarHandle>,
        events: mpsc::UnboundedReceiver<StreamingEvent>,
    ) -> Result<(), SessionError> {
        let mut core = self.lock();
        if core.generation != generation || core.machine.session != SessionState::Connecting {
            drop(core);
            debug!("Start superseded, closing late remote session");
            handle.close();
            return Err(SessionError::Cancelled);
        }
        core.handle = Some(handle);
        core.pump = Some(tokio::spawn(pump_events(
            Arc::clone(self),
            generation,
            events,
        )));
        Ok(())
    }

    /// Release the remote session and reset to (Inactive, Idle).
    ///
    /// With `expected` set, only tears down that generation. Returns whether
    /// anything was torn down.
    fn teardown(&self, expected: Option<u64>, input: SessionInput, reason: &str) -> bool {
        let (handle, pump, session_id) = {
            let mut core = self.lock();
            if expected.is_some_and(|generation| generation != core.generation) {
                return false;
            }
            if core.machine == MachineState::default() && core.handle.is_none() {
                return false;
            }

            let input = if core.machine.accepts(input) {
                input
            } else {
                SessionInput::Stop
            };
            core.last_teardown = Some((core.generation, input));
            core.generation += 1;
            core.voice_epoch += 1;
            if let Err(e) = self.transition(&mut core, input) {
                warn!(error = %e, "Teardown transition rejected");
            }
            core.media = None;
            core.pending_local.clear();
            core.pending_remote.clear();
            core.avatar_talking = false;
            core.user_talking = false;
            (core.handle.take(), core.pump.take(), core.session_id.take())
        };

        if let Some(pump) = pump {
            pump.abort();
        }
        if let Some(handle) = handle {
            handle.close();
        }
        info!(session_id = ?session_id, reason, "Avatar session stopped");
        true
    }

    /// Settle a voice start if no later voice request superseded it.
    fn finish_voice(&self, generation: u64, epoch: u64, input: SessionInput) -> VoiceFinish {
        let mut core = self.lock();
        if core.generation != generation {
            return VoiceFinish::Superseded { release: false };
        }
        if core.voice_epoch != epoch || !core.machine.accepts(input) {
            // A newer start owns the remote voice unless voice is back to idle
            let release = core.machine.session == SessionState::Connected
                && core.machine.voice == VoiceChatState::Idle;
            return VoiceFinish::Superseded { release };
        }
        match self.transition(&mut core, input) {
            Ok(()) => VoiceFinish::Applied,
            Err(e) => {
                warn!(error = %e, "Voice transition rejected");
                VoiceFinish::Superseded { release: false }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Remote events
    // -------------------------------------------------------------------------

    /// Handle one remote event. Returns false when the pump should stop.
    fn handle_event(&self, generation: u64, event: StreamingEvent) -> bool {
        debug!(event = event.name(), "Remote event");

        if event == StreamingEvent::StreamDisconnected {
            let session_id = self.lock().session_id;
            if self.teardown(
                Some(generation),
                SessionInput::StreamDisconnected,
                "stream disconnected",
            ) {
                self.publish(ConciergeEvent::StreamDisconnected {
                    session_id,
                    timestamp: Timestamp::now(),
                });
            }
            return false;
        }

        let mut core = self.lock();
        if core.generation != generation {
            debug!("Dropping event from a previous session");
            return false;
        }
        if let Err(e) = self.apply_event(&mut core, event) {
            warn!(error = %e, "Failed to handle remote event");
        }
        true
    }

    fn apply_event(&self, core: &mut Core, event: StreamingEvent) -> Result<(), SessionError> {
        match event {
            StreamingEvent::StreamReady(media) => {
                self.transition(core, SessionInput::StreamReady)?;
                info!(
                    session_id = ?core.session_id,
                    stream_id = %media.stream_id,
                    "Avatar stream ready"
                );
                self.publish(ConciergeEvent::StreamReady {
                    session_id: core.session_id,
                    stream_id: media.stream_id.clone(),
                    timestamp: Timestamp::now(),
                });
                core.media = Some(media);
            }
            StreamingEvent::AvatarStartTalking => self.set_avatar_talking(core, true),
            StreamingEvent::AvatarStopTalking => self.set_avatar_talking(core, false),
            StreamingEvent::UserStart => self.set_user_talking(core, true),
            StreamingEvent::UserStop => self.set_user_talking(core, false),
            StreamingEvent::UserTalkingMessage { text } => {
                self.buffer_transcript(core, MessageSender::Local, &text)
            }
            StreamingEvent::AvatarTalkingMessage { text } => {
                self.buffer_transcript(core, MessageSender::Remote, &text)
            }
            StreamingEvent::UserEndMessage { text } => {
                self.flush_transcript(core, MessageSender::Local, text)
            }
            StreamingEvent::AvatarEndMessage { text } => {
                self.flush_transcript(core, MessageSender::Remote, text)
            }
            // Handled before the lock is taken
            StreamingEvent::StreamDisconnected => {}
        }
        Ok(())
    }

    fn set_avatar_talking(&self, core: &mut Core, talking: bool) {
        if core.avatar_talking != talking {
            core.avatar_talking = talking;
            self.publish(ConciergeEvent::AvatarTalkingChanged {
                talking,
                timestamp: Timestamp::now(),
            });
        }
    }

    fn set_user_talking(&self, core: &mut Core, talking: bool) {
        if core.user_talking != talking {
            core.user_talking = talking;
            self.publish(ConciergeEvent::UserTalkingChanged {
                talking,
                timestamp: Timestamp::now(),
            });
        }
    }

    fn buffer_transcript(&self, core: &mut Core, sender: MessageSender, text: &str) {
        let pending = pending_mut(core, sender);
        pending.push_str(text);
        let snapshot = pending.clone();
        self.publish(ConciergeEvent::TranscriptPartial {
            sender,
            text: snapshot,
            timestamp: Timestamp::now(),
        });
    }

    /// Close a turn. A non-empty final text wins over the buffered partials.
    fn flush_transcript(&self, core: &mut Core, sender: MessageSender, text: String) {
        let buffered = std::mem::take(pending_mut(core, sender));
        let content = if text.trim().is_empty() { buffered } else { text };
        let content = content.trim();
        if content.is_empty() {
            debug!(%sender, "Empty transcript, nothing appended");
            return;
        }
        let message = self.log.append(sender, content);
        self.publish_message(&message);
    }
}

/// Outcome of settling a voice start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VoiceFinish {
    Applied,
    /// A later request or teardown won. `release` asks the caller to switch
    /// off the remote voice it just turned on.
    Superseded { release: bool },
}

fn pending_mut(core: &mut Core, sender: MessageSender) -> &mut String {
    match sender {
        MessageSender::Local => &mut core.pending_local,
        MessageSender::Remote => &mut core.pending_remote,
    }
}

async fn pump_events(
    shared: Arc<Shared>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<StreamingEvent>,
) {
    while let Some(event) = events.recv().await {
        if !shared.handle_event(generation, event) {
            break;
        }
    }
    debug!(generation, "Remote event pump finished");
}

/// Tears the attempt down unless disarmed, covering early returns and a
/// start future dropped mid-flight.
struct StartGuard {
    shared: Arc<Shared>,
    generation: u64,
    armed: bool,
}

impl StartGuard {
    fn new(shared: &Arc<Shared>, generation: u64) -> Self {
        Self {
            shared: Arc::clone(shared),
            generation,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard {
    fn drop(&mut self) {
        if self.armed {
            self.shared.teardown(
                Some(self.generation),
                SessionInput::StartFailed,
                "start did not complete",
            );
        }
    }
}

// =============================================================================
// Manager
// =============================================================================

/// Owns the lifecycle of one logical streaming session.
///
/// Construct one per conversation and pass it by reference. Dropping the
/// manager stops any running session.
pub struct SessionManager {
    shared: Arc<Shared>,
    tokens: Arc<dyn TokenProvider>,
    service: Arc<dyn AvatarService>,
    permissions: Arc<PermissionGate>,
    settings: ManagerSettings,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("snapshot", &self.snapshot())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    pub fn new(
        tokens: Arc<dyn TokenProvider>,
        service: Arc<dyn AvatarService>,
        permissions: Arc<PermissionGate>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new(SessionConfig::default())),
            tokens,
            service,
            permissions,
            settings,
        }
    }

    /// Replace the draft configuration used by [`SessionManager::config`].
    pub fn with_config(self, config: SessionConfig) -> Self {
        self.shared.lock().draft = config;
        self
    }

    pub fn settings(&self) -> ManagerSettings {
        self.settings
    }

    pub fn permissions(&self) -> &Arc<PermissionGate> {
        &self.permissions
    }

    // -------------------------------------------------------------------------
    // Observation
    // -------------------------------------------------------------------------

    pub fn session_state(&self) -> SessionState {
        self.shared.lock().machine.session
    }

    pub fn voice_chat_state(&self) -> VoiceChatState {
        self.shared.lock().machine.voice
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let core = self.shared.lock();
        SessionSnapshot {
            session_id: core.session_id,
            session: core.machine.session,
            voice: core.machine.voice,
            avatar_talking: core.avatar_talking,
            user_talking: core.user_talking,
            media: core.media.clone(),
            message_count: self.shared.log.len(),
        }
    }

    /// The media stream of the connected session.
    pub fn media_stream(&self) -> Option<MediaStream> {
        self.shared.lock().media.clone()
    }

    /// Every logged turn in display order.
    pub fn messages(&self) -> Vec<Message> {
        self.shared.log.all()
    }

    pub fn message_log(&self) -> &MessageLog {
        &self.shared.log
    }

    /// Live caption text of a turn still in progress.
    pub fn pending_transcript(&self, sender: MessageSender) -> String {
        pending_mut(&mut self.shared.lock(), sender).clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConciergeEvent> {
        self.shared.events.subscribe()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------

    /// Draft configuration for the next start.
    pub fn config(&self) -> SessionConfig {
        self.shared.lock().draft.clone()
    }

    /// Replace the draft configuration. Only allowed while inactive.
    pub fn set_config(&self, config: SessionConfig) -> Result<(), SessionError> {
        let mut core = self.shared.lock();
        if core.machine.session != SessionState::Inactive {
            return Err(SessionError::ConfigLocked(core.machine.session));
        }
        core.draft = config;
        Ok(())
    }

    /// Track the UI language. Only allowed while inactive.
    pub fn set_language(&self, language: Language) -> Result<(), SessionError> {
        let mut core = self.shared.lock();
        if core.machine.session != SessionState::Inactive {
            return Err(SessionError::ConfigLocked(core.machine.session));
        }
        debug!(%language, "Session language updated");
        core.draft.language = language;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Obtain a token and prepare the event channel for a new session.
    pub async fn init_session(&self) -> Result<SessionHandle, SessionError> {
        self.open_handle(Uuid::new_v4()).await
    }

    async fn open_handle(&self, session_id: Uuid) -> Result<SessionHandle, SessionError> {
        let token = self.tokens.fetch_token().await?;
        let (sink, events) = mpsc::unbounded_channel();
        debug!(
            %session_id,
            listeners = StreamingEvent::NAMES.len(),
            "Session handle initialised"
        );
        Ok(SessionHandle {
            session_id,
            token,
            sink,
            events,
        })
    }

    /// Start a remote session and wait until its stream is ready.
    ///
    /// Rejected with [`SessionError::AlreadyActive`] while another session is
    /// connecting or connected. A voice-chat start is refused before any
    /// remote call unless microphone permission is already granted.
    pub async fn start_session(&self, config: SessionConfig) -> Result<(), SessionError> {
        let result = self.run_start(config).await;
        match &result {
            Ok(()) => {}
            // The stop or the newer start already reported itself
            Err(SessionError::Cancelled) => debug!("Avatar session start cancelled"),
            Err(e @ SessionError::AlreadyActive(_)) => {
                debug!(error = %e, "Avatar session start not performed");
                self.shared.publish_error(e);
            }
            Err(e) => {
                warn!(error = %e, "Avatar session start failed");
                self.shared.publish_error(e);
            }
        }
        result
    }

    async fn run_start(&self, config: SessionConfig) -> Result<(), SessionError> {
        let current = self.session_state();
        if current.is_active() {
            return Err(SessionError::AlreadyActive(current));
        }
        if config.voice_chat {
            self.permissions.require_granted()?;
        }

        let session_id = Uuid::new_v4();
        let generation = self.shared.begin_connecting(session_id)?;
        let guard = StartGuard::new(&self.shared, generation);
        if self.settings.history == HistoryPolicy::ClearOnStart {
            self.shared.log.clear();
        }
        info!(%session_id, voice_chat = config.voice_chat, "Starting avatar session");

        let SessionHandle {
            token,
            sink,
            events,
            ..
        } = self.open_handle(session_id).await?;
        self.shared.ensure_current(generation)?;

        let created = timeout(
            self.settings.connect_timeout,
            self.service.create_session(&token, &config, sink),
        )
        .await;
        let remote = match created {
            Ok(Ok(remote)) => remote,
            Ok(Err(e)) => return Err(SessionError::RemoteStart(e.to_string())),
            Err(_) => {
                return Err(SessionError::RemoteStart(format!(
                    "create session timed out after {:?}",
                    self.settings.connect_timeout
                )))
            }
        };
        self.shared.install(generation, remote, events)?;

        let reached = {
            let mut state = self.shared.state.subscribe();
            let waited = timeout(
                self.settings.stream_ready_timeout,
                state.wait_for(|s| *s != SessionState::Connecting),
            )
            .await;
            match waited {
                Ok(Ok(reached)) => *reached,
                Ok(Err(_)) => SessionState::Inactive,
                Err(_) if !self.shared.is_current(generation) => {
                    return Err(self.shared.interrupted(generation))
                }
                Err(_) => return Err(SessionError::Timeout(self.settings.stream_ready_timeout)),
            }
        };
        if reached != SessionState::Connected || !self.shared.is_current(generation) {
            return Err(self.shared.interrupted(generation));
        }
        guard.disarm();
        info!(%session_id, "Avatar session connected");

        if config.voice_chat {
            self.start_voice_chat().await?;
        }
        Ok(())
    }

    /// Stop the session and release every remote resource.
    ///
    /// Idempotent and synchronous. A start still in flight returns
    /// [`SessionError::Cancelled`].
    pub fn stop_session(&self) {
        if !self.shared.teardown(None, SessionInput::Stop, "stop requested") {
            debug!("Stop requested with no active session");
        }
    }

    // -------------------------------------------------------------------------
    // Voice chat
    // -------------------------------------------------------------------------

    /// Start streaming microphone audio. No-op unless connected and idle.
    ///
    /// Fails with [`SessionError::Permission`] before any remote call when
    /// microphone permission has not been granted.
    pub async fn start_voice_chat(&self) -> Result<(), SessionError> {
        self.permissions.require_granted()?;

        let (generation, epoch, handle) = {
            let mut core = self.shared.lock();
            if core.machine.session != SessionState::Connected {
                debug!("Voice chat requested while not connected");
                return Ok(());
            }
            if core.machine.voice != VoiceChatState::Idle {
                debug!(voice = %core.machine.voice, "Voice chat already started");
                return Ok(());
            }
            let Some(handle) = core.handle.clone() else {
                return Ok(());
            };
            self.shared
                .transition(&mut core, SessionInput::VoiceStartRequested)?;
            core.voice_epoch += 1;
            (core.generation, core.voice_epoch, handle)
        };

        match handle.start_voice().await {
            Ok(()) => match self
                .shared
                .finish_voice(generation, epoch, SessionInput::VoiceConfirmed)
            {
                VoiceFinish::Applied => {
                    info!("Voice chat active");
                    Ok(())
                }
                VoiceFinish::Superseded { release } => {
                    debug!(release, "Voice chat start superseded");
                    if release {
                        if let Err(e) = handle.stop_voice().await {
                            warn!(error = %e, "Failed to stop superseded voice chat");
                        }
                    }
                    Err(SessionError::Cancelled)
                }
            },
            Err(e) => {
                let finish =
                    self.shared
                        .finish_voice(generation, epoch, SessionInput::VoiceFailed);
                if finish != VoiceFinish::Applied {
                    debug!(error = %e, "Superseded voice chat start failed");
                    return Err(SessionError::Cancelled);
                }
                let error = match e {
                    RemoteError::Microphone(denied) => {
                        self.permissions.record_denied(denied.clone());
                        SessionError::Permission(denied)
                    }
                    other => SessionError::Send(other.to_string()),
                };
                warn!(error = %error, "Voice chat start failed");
                self.shared.publish_error(&error);
                Err(error)
            }
        }
    }

    /// Stop streaming microphone audio. No-op unless voice chat is running.
    pub async fn stop_voice_chat(&self) -> Result<(), SessionError> {
        let handle = {
            let mut core = self.shared.lock();
            if core.machine.session != SessionState::Connected
                || core.machine.voice == VoiceChatState::Idle
            {
                return Ok(());
            }
            let handle = core.handle.clone();
            self.shared.transition(&mut core, SessionInput::VoiceStopped)?;
            core.voice_epoch += 1;
            handle
        };

        if let Some(handle) = handle {
            handle.stop_voice().await.map_err(|e| {
                warn!(error = %e, "Voice chat stop failed");
                SessionError::Send(e.to_string())
            })?;
        }
        info!("Voice chat stopped");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Conversation
    // -------------------------------------------------------------------------

    /// Log the message as a local turn, then deliver it.
    ///
    /// The turn stays in the log when delivery fails.
    pub async fn send_text_message(&self, text: &str) -> Result<(), SessionError> {
        let handle = {
            let core = self.shared.lock();
            if core.machine.session != SessionState::Connected {
                return Err(SessionError::NotConnected);
            }
            core.handle.clone().ok_or(SessionError::NotConnected)?
        };

        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if text.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(SessionError::MessageTooLong(MAX_MESSAGE_LENGTH));
        }

        let message = self.shared.log.append(MessageSender::Local, text);
        self.shared.publish_message(&message);
        debug!(message_id = %message.id(), "Sending text message");

        handle.send_text(text).await.map_err(|e| {
            warn!(message_id = %message.id(), error = %e, "Text message delivery failed");
            let error = SessionError::Send(e.to_string());
            self.shared.publish_error(&error);
            error
        })
    }

    /// Ask the avatar to stop speaking. Best-effort; never fails.
    pub async fn interrupt(&self) {
        let handle = {
            let core = self.shared.lock();
            if core.machine.session != SessionState::Connected {
                return;
            }
            core.handle.clone()
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.interrupt().await {
                warn!(error = %e, "Interrupt failed");
            }
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.shared
            .teardown(None, SessionInput::Stop, "session manager dropped");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockAvatarService, ReadyMode};
    use crate::token::StaticTokenProvider;
    use concierge_permission::StaticMicrophone;

    fn make_manager(service: &MockAvatarService, mic: StaticMicrophone) -> SessionManager {
        SessionManager::new(
            Arc::new(StaticTokenProvider::new("test-token")),
            Arc::new(service.clone()),
            Arc::new(PermissionGate::new(Arc::new(mic))),
            ManagerSettings::default(),
        )
    }

    async fn connected(service: &MockAvatarService) -> SessionManager {
        let manager = make_manager(service, StaticMicrophone::granted());
        manager.permissions().check_permission().await;
        manager
            .start_session(SessionConfig::default())
            .await
            .unwrap();
        manager
    }

    /// Let the pump task drain events emitted by the mock.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_settings_from_config() {
        let settings = ManagerSettings::default();
        assert_eq!(settings.connect_timeout, Duration::from_secs(30));
        assert_eq!(settings.stream_ready_timeout, Duration::from_secs(20));
        assert_eq!(settings.history, HistoryPolicy::Retain);
    }

    #[tokio::test]
    async fn test_initial_snapshot() {
        let service = MockAvatarService::new();
        let manager = make_manager(&service, StaticMicrophone::prompt());
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.session, SessionState::Inactive);
        assert_eq!(snapshot.voice, VoiceChatState::Idle);
        assert!(snapshot.media.is_none());
        assert_eq!(snapshot.message_count, 0);
    }

    #[tokio::test]
    async fn test_init_session_binds_token() {
        let service = MockAvatarService::new();
        let manager = make_manager(&service, StaticMicrophone::prompt());
        let handle = manager.init_session().await.unwrap();
        assert_eq!(handle.token().as_str(), "test-token");
        assert_eq!(handle.listened_events().len(), 10);
        assert_eq!(service.remote_calls(), 0);
    }

    #[tokio::test]
    async fn test_init_session_auth_failure() {
        let manager = SessionManager::new(
            Arc::new(StaticTokenProvider::failing()),
            Arc::new(MockAvatarService::new()),
            Arc::new(PermissionGate::new(Arc::new(StaticMicrophone::prompt()))),
            ManagerSettings::default(),
        );
        assert!(matches!(
            manager.init_session().await,
            Err(SessionError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn test_start_connects_and_exposes_media() {
        let service = MockAvatarService::new();
        let manager = connected(&service).await;
        let snapshot = manager.snapshot();
        assert_eq!(snapshot.session, SessionState::Connected);
        assert!(snapshot.session_id.is_some());
        assert!(manager
            .media_stream()
            .unwrap()
            .stream_id
            .starts_with("mock-"));
        assert_eq!(service.create_calls(), 1);
        assert_eq!(service.last_token().unwrap().as_str(), "test-token");
    }

    #[tokio::test]
    async fn test_start_passes_config_to_service() {
        let service = MockAvatarService::new();
        let manager = make_manager(&service, StaticMicrophone::prompt());
        let config = SessionConfig::default().with_language(Language::English);
        manager.start_session(config.clone()).await.unwrap();
        assert_eq!(service.last_config(), Some(config));
    }

    #[tokio::test]
    async fn test_stop_releases_media() {
        let service = MockAvatarService::new();
        let manager = connected(&service).await;
        manager.stop_session();
        assert!(manager.media_stream().is_none());
        assert_eq!(manager.session_state(), SessionState::Inactive);
        assert_eq!(service.close_calls(), 1);
        assert!(!service.has_open_session());
    }

    #[tokio::test]
    async fn test_remote_create_failure_returns_to_inactive() {
        let service = MockAvatarService::new();
        service.fail_create(Some(RemoteError::Rejected("quota exceeded".into())));
        let manager = make_manager(&service, StaticMicrophone::prompt());

        let err = manager
            .start_session(SessionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::RemoteStart(_)));
        assert_eq!(manager.session_state(), SessionState::Inactive);
        assert_eq!(service.close_calls(), 0);
    }

    #[tokio::test]
    async fn test_auth_failure_never_contacts_service() {
        let service = MockAvatarService::new();
        let manager = SessionManager::new(
            Arc::new(StaticTokenProvider::failing()),
            Arc::new(service.clone()),
            Arc::new(PermissionGate::new(Arc::new(StaticMicrophone::prompt()))),
            ManagerSettings::default(),
        );
        let err = manager
            .start_session(SessionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Auth(_)));
        assert_eq!(manager.session_state(), SessionState::Inactive);
        assert_eq!(service.remote_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_ready_timeout() {
        let service = MockAvatarService::new().with_ready(ReadyMode::Never);
        let manager = make_manager(&service, StaticMicrophone::prompt());

        let err = manager
            .start_session(SessionConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::Timeout(Duration::from_secs(20)));
        assert_eq!(manager.session_state(), SessionState::Inactive);
        assert_eq!(service.create_calls(), 1);
        assert_eq!(service.close_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_timeout_is_remote_start_error() {
        let service = MockAvatarService::new().with_create_delay(Duration::from_secs(60));
        let manager = make_manager(&service, StaticMicrophone::prompt());

        let err = manager
            .start_session(SessionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::RemoteStart(_)));
        assert_eq!(manager.session_state(), SessionState::Inactive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_delay_connects() {
        let service = MockAvatarService::new().with_ready(ReadyMode::After(Duration::from_secs(3)));
        let manager = make_manager(&service, StaticMicrophone::prompt());
        manager
            .start_session(SessionConfig::default())
            .await
            .unwrap();
        assert_eq!(manager.session_state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_voice_chat_lifecycle() {
        let service = MockAvatarService::new();
        let manager = connected(&service).await;
        let mut events = manager.subscribe();

        manager.start_voice_chat().await.unwrap();
        assert_eq!(manager.voice_chat_state(), VoiceChatState::Active);
        assert_eq!(service.start_voice_calls(), 1);

        // Second start is a no-op
        manager.start_voice_chat().await.unwrap();
        assert_eq!(service.start_voice_calls(), 1);

        manager.stop_voice_chat().await.unwrap();
        assert_eq!(manager.voice_chat_state(), VoiceChatState::Idle);
        assert_eq!(service.stop_voice_calls(), 1);

        let mut voice_events = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ConciergeEvent::VoiceChatStateChanged { to, .. } = event {
                voice_events.push(to);
            }
        }
        assert_eq!(
            voice_events,
            vec![
                VoiceChatState::Loading,
                VoiceChatState::Active,
                VoiceChatState::Idle
            ]
        );
    }

    #[tokio::test]
    async fn test_voice_chat_noop_when_not_connected() {
        let service = MockAvatarService::new();
        let manager = make_manager(&service, StaticMicrophone::granted());
        manager.permissions().check_permission().await;

        manager.start_voice_chat().await.unwrap();
        manager.stop_voice_chat().await.unwrap();
        assert_eq!(manager.voice_chat_state(), VoiceChatState::Idle);
        assert_eq!(service.remote_calls(), 0);
    }

    #[tokio::test]
    async fn test_voice_start_failure_keeps_session() {
        let service = MockAvatarService::new();
        let manager = connected(&service).await;
        service.fail_voice(Some(RemoteError::Transport("socket closed".into())));

        let err = manager.start_voice_chat().await.unwrap_err();
        assert!(matches!(err, SessionError::Send(_)));
        assert!(err.is_recoverable());
        assert_eq!(manager.session_state(), SessionState::Connected);
        assert_eq!(manager.voice_chat_state(), VoiceChatState::Idle);
    }

    #[tokio::test]
    async fn test_voice_start_microphone_denied_records_denial() {
        let service = MockAvatarService::new();
        let manager = connected(&service).await;
        service.fail_voice(Some(RemoteError::Microphone(
            concierge_permission::PermissionError::NotAllowed,
        )));

        let err = manager.start_voice_chat().await.unwrap_err();
        assert!(matches!(err, SessionError::Permission(_)));
        assert!(!manager.permissions().is_granted());
        assert_eq!(manager.voice_chat_state(), VoiceChatState::Idle);
    }

    #[tokio::test]
    async fn test_start_with_voice_chat() {
        let service = MockAvatarService::new();
        let manager = make_manager(&service, StaticMicrophone::granted());
        manager.permissions().check_permission().await;

        manager
            .start_session(SessionConfig::default().with_voice_chat(true))
            .await
            .unwrap();
        assert_eq!(manager.voice_chat_state(), VoiceChatState::Active);
    }

    #[tokio::test]
    async fn test_send_text_validation() {
        let service = MockAvatarService::new();
        let manager = connected(&service).await;

        assert_eq!(
            manager.send_text_message("   ").await,
            Err(SessionError::EmptyMessage)
        );
        let long = "a".repeat(MAX_MESSAGE_LENGTH + 1);
        assert_eq!(
            manager.send_text_message(&long).await,
            Err(SessionError::MessageTooLong(MAX_MESSAGE_LENGTH))
        );
        assert!(manager.messages().is_empty());
        assert_eq!(service.send_calls(), 0);
    }

    #[tokio::test]
    async fn test_send_text_not_connected() {
        let service = MockAvatarService::new();
        let manager = make_manager(&service, StaticMicrophone::prompt());
        assert_eq!(
            manager.send_text_message("hello").await,
            Err(SessionError::NotConnected)
        );
        assert!(manager.messages().is_empty());
    }

    #[tokio::test]
    async fn test_avatar_reply_is_assembled_into_one_message() {
        let service = MockAvatarService::new()
            .with_reply(|_| Some("Our office opens at nine".to_string()));
        let manager = connected(&service).await;

        manager.send_text_message("When do you open?").await.unwrap();
        settle().await;

        let messages = manager.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender(), MessageSender::Local);
        assert_eq!(messages[1].sender(), MessageSender::Remote);
        assert_eq!(messages[1].content(), "Our office opens at nine");
        assert!(manager.pending_transcript(MessageSender::Remote).is_empty());
        assert!(!manager.snapshot().avatar_talking);
    }

    #[tokio::test]
    async fn test_user_transcript_partials_and_final() {
        let service = MockAvatarService::new();
        let manager = connected(&service).await;

        service.emit(StreamingEvent::UserStart);
        service.emit(StreamingEvent::UserTalkingMessage {
            text: "Where can ".into(),
        });
        service.emit(StreamingEvent::UserTalkingMessage {
            text: "I park?".into(),
        });
        settle().await;
        assert!(manager.snapshot().user_talking);
        assert_eq!(
            manager.pending_transcript(MessageSender::Local),
            "Where can I park?"
        );

        service.emit(StreamingEvent::UserStop);
        service.emit(StreamingEvent::UserEndMessage {
            text: String::new(),
        });
        settle().await;

        let messages = manager.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content(), "Where can I park?");
        assert!(!manager.snapshot().user_talking);
    }

    #[tokio::test]
    async fn test_final_text_wins_over_partials() {
        let service = MockAvatarService::new();
        let manager = connected(&service).await;

        service.emit(StreamingEvent::AvatarTalkingMessage {
            text: "Hel".into(),
        });
        service.emit(StreamingEvent::AvatarEndMessage {
            text: "Hello there".into(),
        });
        settle().await;

        let messages = manager.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content(), "Hello there");
    }

    #[tokio::test]
    async fn test_empty_final_appends_nothing() {
        let service = MockAvatarService::new();
        let manager = connected(&service).await;
        service.emit(StreamingEvent::UserEndMessage {
            text: "  ".into(),
        });
        settle().await;
        assert!(manager.messages().is_empty());
    }

    #[tokio::test]
    async fn test_unexpected_event_is_swallowed() {
        let service = MockAvatarService::new();
        let manager = connected(&service).await;

        // Already connected, so a second ready is an invalid transition
        service.emit(StreamingEvent::StreamReady(MediaStream {
            stream_id: "dup".into(),
        }));
        service.emit(StreamingEvent::AvatarStartTalking);
        settle().await;

        assert_eq!(manager.session_state(), SessionState::Connected);
        assert!(manager.snapshot().avatar_talking);
    }

    #[tokio::test]
    async fn test_remote_disconnect_tears_down() {
        let service = MockAvatarService::new();
        let manager = connected(&service).await;
        let mut events = manager.subscribe();

        assert!(service.disconnect());
        settle().await;

        assert_eq!(manager.session_state(), SessionState::Inactive);
        assert_eq!(manager.voice_chat_state(), VoiceChatState::Idle);
        assert_eq!(service.close_calls(), 1);

        let mut saw_disconnect = false;
        while let Ok(event) = events.try_recv() {
            saw_disconnect |= event.event_name() == "stream_disconnected";
        }
        assert!(saw_disconnect);

        // Stop after a remote disconnect does not close again
        manager.stop_session();
        assert_eq!(service.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_interrupt() {
        let service = MockAvatarService::new();
        let manager = make_manager(&service, StaticMicrophone::prompt());

        manager.interrupt().await;
        assert_eq!(service.interrupt_calls(), 0);

        manager
            .start_session(SessionConfig::default())
            .await
            .unwrap();
        manager.interrupt().await;
        assert_eq!(service.interrupt_calls(), 1);
    }

    #[tokio::test]
    async fn test_set_language_only_while_inactive() {
        let service = MockAvatarService::new();
        let manager = make_manager(&service, StaticMicrophone::prompt());

        manager.set_language(Language::English).unwrap();
        assert_eq!(manager.config().language, Language::English);

        manager.start_session(manager.config()).await.unwrap();
        assert_eq!(
            manager.set_language(Language::Spanish),
            Err(SessionError::ConfigLocked(SessionState::Connected))
        );
        assert_eq!(
            manager.set_config(SessionConfig::default()),
            Err(SessionError::ConfigLocked(SessionState::Connected))
        );

        manager.stop_session();
        manager.set_language(Language::Spanish).unwrap();
        assert_eq!(manager.config().language, Language::Spanish);
    }

    #[tokio::test]
    async fn test_history_policy_clear_on_start() {
        let service = MockAvatarService::new();
        let manager = SessionManager::new(
            Arc::new(StaticTokenProvider::new("t")),
            Arc::new(service.clone()),
            Arc::new(PermissionGate::new(Arc::new(StaticMicrophone::prompt()))),
            ManagerSettings {
                history: HistoryPolicy::ClearOnStart,
                ..ManagerSettings::default()
            },
        );

        manager.start_session(SessionConfig::default()).await.unwrap();
        manager.send_text_message("first").await.unwrap();
        manager.stop_session();
        assert_eq!(manager.messages().len(), 1);

        manager.start_session(SessionConfig::default()).await.unwrap();
        assert!(manager.messages().is_empty());
    }

    #[tokio::test]
    async fn test_history_retained_by_default() {
        let service = MockAvatarService::new();
        let manager = connected(&service).await;
        manager.send_text_message("first").await.unwrap();
        manager.stop_session();

        manager.start_session(SessionConfig::default()).await.unwrap();
        manager.send_text_message("second").await.unwrap();
        let contents: Vec<String> = manager
            .messages()
            .iter()
            .map(|m| m.content().to_string())
            .collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_state_events_published_in_order() {
        let service = MockAvatarService::new();
        let manager = make_manager(&service, StaticMicrophone::prompt());
        let mut events = manager.subscribe();

        manager.start_session(SessionConfig::default()).await.unwrap();
        manager.stop_session();

        let mut transitions = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ConciergeEvent::SessionStateChanged { from, to, .. } = event {
                transitions.push((from, to));
            }
        }
        assert_eq!(
            transitions,
            vec![
                (SessionState::Inactive, SessionState::Connecting),
                (SessionState::Connecting, SessionState::Connected),
                (SessionState::Connected, SessionState::Inactive),
            ]
        );
    }

    #[tokio::test]
    async fn test_start_failure_publishes_error_event() {
        let service = MockAvatarService::new();
        service.fail_create(Some(RemoteError::Rejected("nope".into())));
        let manager = make_manager(&service, StaticMicrophone::prompt());
        let mut events = manager.subscribe();

        let _ = manager.start_session(SessionConfig::default()).await;

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ConciergeEvent::SessionError { kind, .. } = event {
                kinds.push(kind);
            }
        }
        assert_eq!(kinds, vec!["remote_start".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_start_is_cancelled_not_timed_out() {
        let service = MockAvatarService::new().with_ready(ReadyMode::Never);
        let manager = Arc::new(make_manager(&service, StaticMicrophone::prompt()));
        let mut events = manager.subscribe();

        let first = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.start_session(SessionConfig::default()).await })
        };
        while !service.has_open_session() {
            tokio::task::yield_now().await;
        }

        // Restart before the first start observes the stop
        manager.stop_session();
        let mut second = Box::pin(manager.start_session(SessionConfig::default()));
        tokio::select! {
            biased;
            _ = &mut second => panic!("second start finished early"),
            _ = std::future::ready(()) => {}
        }
        assert_eq!(manager.session_state(), SessionState::Connecting);

        assert_eq!(first.await.unwrap(), Err(SessionError::Cancelled));
        let second = second.await;
        assert!(matches!(second, Err(SessionError::Timeout(_))));

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ConciergeEvent::SessionError { kind, .. } = event {
                kinds.push(kind);
            }
        }
        assert_eq!(kinds, vec!["timeout".to_string()]);
        assert_eq!(service.create_calls(), 2);
        assert!(!service.has_open_session());
    }
}
