//! Interactive console: parses slash commands and drives the session.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use concierge_core::events::ConciergeEvent;
use concierge_core::types::{Language, MessageSender, SessionState};
use concierge_intent::{presets, DirectivePanel, MediaHint, PresentationDirective};
use concierge_session::{SessionError, SessionManager};

const HELP: &str = "\
Commands:
  /start [voice]     start a session, optionally with voice chat
  /stop              end the session
  /voice on|off      toggle voice chat
  /interrupt         make the avatar stop talking
  /presets           list preset questions
  /preset <n|id>     ask a preset question
  /history           show the transcript
  /lang <en|es>      switch language (session must be stopped)
  /permission        request microphone access
  /status            show session state
  /dismiss           close the current panel
  /quit              exit
Anything else is sent to the avatar.";

/// One line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start { voice: bool },
    Stop,
    Voice(bool),
    Interrupt,
    Presets,
    Preset(String),
    History,
    Language(String),
    Permission,
    Status,
    Dismiss,
    Help,
    Quit,
    Say(String),
    Empty,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Command {
        let line = line.trim();
        if line.is_empty() {
            return Command::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Command::Say(line.to_string());
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        match (name.to_ascii_lowercase().as_str(), arg) {
            ("start", "") => Command::Start { voice: false },
            ("start", "voice") => Command::Start { voice: true },
            ("stop", _) => Command::Stop,
            ("voice", "on") => Command::Voice(true),
            ("voice", "off") => Command::Voice(false),
            ("interrupt", _) => Command::Interrupt,
            ("presets", _) => Command::Presets,
            ("preset", arg) if !arg.is_empty() => Command::Preset(arg.to_string()),
            ("history", _) => Command::History,
            ("lang", arg) if !arg.is_empty() => Command::Language(arg.to_string()),
            ("permission", _) => Command::Permission,
            ("status", _) => Command::Status,
            ("dismiss", _) => Command::Dismiss,
            ("help", _) => Command::Help,
            ("quit" | "exit", _) => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        }
    }
}

/// Whether the read loop keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Console state around a shared [`SessionManager`].
pub struct Console {
    manager: Arc<SessionManager>,
    panel: DirectivePanel,
    language: Language,
}

impl Console {
    pub fn new(manager: Arc<SessionManager>, language: Language) -> Self {
        Self {
            manager,
            panel: DirectivePanel::new(),
            language,
        }
    }

    pub fn directive(&self) -> &PresentationDirective {
        self.panel.current()
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Send `message` if connected, then always route it to a directive.
    pub async fn ask(&mut self, message: &str, hint: Option<&MediaHint>) -> &PresentationDirective {
        if self.manager.session_state() == SessionState::Connected {
            if let Err(e) = self.manager.send_text_message(message).await {
                println!("! {}", e.user_message());
            }
        } else {
            debug!("Not connected, routing message without sending");
        }
        let directive = self.panel.show(message, hint);
        if !directive.is_none() {
            println!("[panel] {directive}");
        }
        directive
    }

    pub async fn execute(&mut self, command: Command) -> Flow {
        match command {
            Command::Empty => {}
            Command::Quit => return Flow::Quit,
            Command::Help => println!("{HELP}"),
            Command::Unknown(line) => println!("Unknown command: {line} (try /help)"),
            Command::Say(text) => {
                self.ask(&text, None).await;
            }
            Command::Start { voice } => {
                let config = self.manager.config().with_voice_chat(voice);
                // Failures are reported through the event stream
                if let Err(e) = self.manager.start_session(config).await {
                    debug!(error = %e, "Start command failed");
                }
            }
            Command::Stop => self.manager.stop_session(),
            Command::Voice(true) => report(self.manager.start_voice_chat().await),
            Command::Voice(false) => report(self.manager.stop_voice_chat().await),
            Command::Interrupt => self.manager.interrupt().await,
            Command::Presets => {
                for (index, question) in presets().iter().enumerate() {
                    println!("  {}. {}", index + 1, question.label(self.language));
                }
            }
            Command::Preset(selector) => match find_preset(&selector) {
                Some(question) => {
                    let hint = question.media_hint();
                    self.ask(question.message, hint.as_ref()).await;
                }
                None => println!("No preset {selector} (see /presets)"),
            },
            Command::History => {
                for message in self.manager.messages() {
                    println!(
                        "  {} [{}] {}",
                        message.timestamp().format("%H:%M:%S"),
                        message.sender(),
                        message.content()
                    );
                }
            }
            Command::Language(code) => match Language::from_code(&code) {
                Some(language) => match self.manager.set_language(language) {
                    Ok(()) => {
                        self.language = language;
                        println!("Language set to {language}");
                    }
                    Err(e) => println!("! {}", e.user_message()),
                },
                None => println!("Unsupported language: {code}"),
            },
            Command::Permission => {
                match self.manager.permissions().request_permission().await {
                    Ok(capture) => {
                        capture.release();
                        println!("Microphone access granted");
                    }
                    Err(e) => println!("! {}", e.guidance()),
                }
            }
            Command::Status => {
                let snapshot = self.manager.snapshot();
                let permission = self.manager.permissions().state();
                println!(
                    "session={} voice={} avatar_talking={} messages={} microphone={}",
                    snapshot.session,
                    snapshot.voice,
                    snapshot.avatar_talking,
                    snapshot.message_count,
                    if permission.granted { "granted" } else { "not granted" }
                );
            }
            Command::Dismiss => self.panel.dismiss(),
        }
        Flow::Continue
    }
}

fn report(result: Result<(), SessionError>) {
    if let Err(e) = result {
        println!("! {}", e.user_message());
    }
}

/// Find a preset by 1-based position or id.
fn find_preset(selector: &str) -> Option<&'static concierge_intent::PresetQuestion> {
    match selector.parse::<usize>() {
        Ok(position) => position
            .checked_sub(1)
            .and_then(|index| presets().get(index)),
        Err(_) => concierge_intent::preset(selector),
    }
}

/// Canned answers for the offline avatar, keyed on the routed intent.
pub fn offline_reply(text: &str) -> Option<String> {
    let reply = match concierge_intent::route(text, None) {
        PresentationDirective::BookingGuide => {
            "You can book an appointment by picking a date, a time and a treatment."
        }
        PresentationDirective::LocationGuide => "We are on the second floor, room 204.",
        PresentationDirective::Directions => "Take the main entrance and follow the signs.",
        PresentationDirective::HoursGuide => {
            "We are open 9:00 AM to 6:00 PM. Call (555) 123-4567 for emergencies."
        }
        PresentationDirective::ParkingGuide => "Parking is in the basement garage.",
        PresentationDirective::ServicesGuide => {
            "We offer cleanings, fillings and orthodontics."
        }
        PresentationDirective::InsuranceGuide => "We accept most major insurance plans.",
        _ => "I'm happy to help. Could you tell me more?",
    };
    Some(reply.to_string())
}

/// Print session events until the manager goes away.
pub async fn print_events(mut events: broadcast::Receiver<ConciergeEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => print_event(&event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &ConciergeEvent) {
    match event {
        ConciergeEvent::SessionStateChanged { to, .. } => println!("* session {to}"),
        ConciergeEvent::VoiceChatStateChanged { to, .. } => println!("* voice chat {to}"),
        ConciergeEvent::StreamReady { stream_id, .. } => println!("* stream ready ({stream_id})"),
        ConciergeEvent::StreamDisconnected { .. } => println!("* stream disconnected"),
        ConciergeEvent::MessageAppended {
            sender: MessageSender::Remote,
            content,
            ..
        } => println!("[{}] {content}", MessageSender::Remote),
        ConciergeEvent::SessionError { message, .. } => println!("! {message}"),
        other => debug!(event = other.event_name(), "Event"),
    }
}
