//! CLI argument definitions for the concierge console.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use concierge_core::types::Language;
use concierge_permission::StaticMicrophone;

/// Concierge - console front-end for an interactive avatar receptionist.
#[derive(Parser, Debug)]
#[command(name = "concierge", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Conversation language code (en, es).
    #[arg(short = 'L', long = "language")]
    pub language: Option<String>,

    /// Start a session with voice chat right away.
    #[arg(long = "voice")]
    pub voice: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Use a fixed access token instead of calling the token endpoint.
    #[arg(long = "token")]
    pub token: Option<String>,

    /// Simulated microphone consent.
    #[arg(long = "microphone", value_enum, default_value_t = MicrophoneMode::Prompt)]
    pub microphone: MicrophoneMode,
}

/// Simulated answer of the platform microphone permission API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MicrophoneMode {
    /// Consent already given.
    Granted,
    /// Not decided yet; a request succeeds.
    Prompt,
    /// Every request is refused.
    Denied,
}

impl MicrophoneMode {
    pub fn backend(self) -> StaticMicrophone {
        match self {
            MicrophoneMode::Granted => StaticMicrophone::granted(),
            MicrophoneMode::Prompt => StaticMicrophone::prompt(),
            MicrophoneMode::Denied => StaticMicrophone::denied(),
        }
    }
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > CONCIERGE_CONFIG env var > ~/.concierge/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("CONCIERGE_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the conversation language.
    ///
    /// Priority: --language flag > config file value. An unknown code is an
    /// error rather than a silent fallback.
    pub fn resolve_language(&self, config_language: Language) -> Result<Language, String> {
        match self.language.as_deref() {
            Some(code) => {
                Language::from_code(code).ok_or_else(|| format!("unsupported language: {code}"))
            }
            None => Ok(config_language),
        }
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".concierge").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".concierge").join("config.toml");
    }
    PathBuf::from("config.toml")
}
