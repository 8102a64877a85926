use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ConciergeError, Result};
use crate::types::{
    AvatarQuality, HistoryPolicy, Language, SttProvider, VoiceChatTransport, VoiceEmotion,
};

/// Environment variable overriding the avatar service base URL.
pub const ENV_BASE_API_URL: &str = "CONCIERGE_BASE_API_URL";
/// Environment variable overriding the knowledge base identifier.
pub const ENV_KNOWLEDGE_BASE_ID: &str = "CONCIERGE_KNOWLEDGE_BASE_ID";
/// Environment variable overriding the token endpoint.
pub const ENV_TOKEN_ENDPOINT: &str = "CONCIERGE_TOKEN_ENDPOINT";

/// Top-level configuration for the concierge.
///
/// Loaded from `~/.concierge/config.toml` by default. Each section
/// corresponds to one collaborator of the session manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConciergeConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub avatar: AvatarConfig,
    #[serde(default)]
    pub session: SessionSettings,
}

impl ConciergeConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ConciergeConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply `CONCIERGE_*` environment overrides on top of the loaded file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_BASE_API_URL) {
            self.avatar.base_url = url;
        }
        if let Some(id) = get(ENV_KNOWLEDGE_BASE_ID) {
            self.avatar.knowledge_base_id = id;
        }
        if let Some(endpoint) = get(ENV_TOKEN_ENDPOINT) {
            self.token.endpoint = endpoint;
        }
    }

    /// Check values that would otherwise fail late, at session start.
    pub fn validate(&self) -> Result<()> {
        if !is_http_url(&self.token.endpoint) {
            return Err(ConciergeError::Config(format!(
                "token.endpoint must be an http(s) URL, got '{}'",
                self.token.endpoint
            )));
        }
        if !self.avatar.base_url.is_empty() && !is_http_url(&self.avatar.base_url) {
            return Err(ConciergeError::Config(format!(
                "avatar.base_url must be an http(s) URL, got '{}'",
                self.avatar.base_url
            )));
        }
        if self.token.timeout_secs == 0 {
            return Err(ConciergeError::Config(
                "token.timeout_secs must be greater than zero".into(),
            ));
        }
        if self.session.connect_timeout_secs == 0 || self.session.stream_ready_timeout_secs == 0 {
            return Err(ConciergeError::Config(
                "session timeouts must be greater than zero".into(),
            ));
        }
        let rate = self.avatar.voice.rate;
        if !(0.5..=2.0).contains(&rate) {
            return Err(ConciergeError::Config(format!(
                "avatar.voice.rate must be between 0.5 and 2.0, got {rate}"
            )));
        }
        Ok(())
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Where short-lived access tokens come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Endpoint answering `POST` with a raw bearer token body.
    pub endpoint: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3000/api/get-access-token".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Settings passed to the avatar service when a session is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarConfig {
    /// Base URL of the avatar service. Empty means the service default.
    pub base_url: String,
    /// Knowledge base the avatar answers from.
    pub knowledge_base_id: String,
    /// Avatar identity.
    pub avatar_name: String,
    pub quality: AvatarQuality,
    pub language: Language,
    pub transport: VoiceChatTransport,
    pub stt_provider: SttProvider,
    #[serde(default)]
    pub voice: VoiceConfig,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            knowledge_base_id: "040ec533171d4cc191041914213cc97d".to_string(),
            avatar_name: "default".to_string(),
            quality: AvatarQuality::Low,
            language: Language::Spanish,
            transport: VoiceChatTransport::Websocket,
            stt_provider: SttProvider::Deepgram,
            voice: VoiceConfig::default(),
        }
    }
}

/// Synthesized voice sub-configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Speaking rate multiplier.
    pub rate: f32,
    pub emotion: VoiceEmotion,
    /// Text-to-speech model identifier.
    pub model: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            rate: 1.5,
            emotion: VoiceEmotion::Friendly,
            model: "eleven_multilingual_v2".to_string(),
        }
    }
}

/// Session lifecycle bounds and history policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Upper bound on the remote create-session call.
    pub connect_timeout_secs: u64,
    /// Upper bound on waiting for "stream ready" after creation succeeded.
    pub stream_ready_timeout_secs: u64,
    pub history: HistoryPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            stream_ready_timeout_secs: 20,
            history: HistoryPolicy::Retain,
        }
    }
}
