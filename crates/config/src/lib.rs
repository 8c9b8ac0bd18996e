//! Configuration loading, validation, and management for Parley.
//!
//! Loads configuration from `~/.parley/config.toml` and the access list from
//! `~/.parley/acl.toml`, with environment variable overrides for secrets.
//! Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.parley/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// The name the bot introduces itself with
    #[serde(default = "default_bot_name")]
    pub bot_name: String,

    /// OpenAI chat, vision and speech settings
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Google Gemini settings
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Telegram Bot API settings
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Provider selection and allowlist switch
    #[serde(default)]
    pub system: SystemConfig,

    /// Context window budget
    #[serde(default)]
    pub context: ContextConfig,

    /// Worker pool, admission capacity and retry settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Speech-to-text, text-to-speech and transcoding
    #[serde(default)]
    pub speech: SpeechConfig,
}

fn default_bot_name() -> String {
    "Parley".into()
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("bot_name", &self.bot_name)
            .field("openai", &self.openai)
            .field("gemini", &self.gemini)
            .field("telegram", &self.telegram)
            .field("system", &self.system)
            .field("context", &self.context)
            .field("dispatch", &self.dispatch)
            .field("speech", &self.speech)
            .finish()
    }
}

// ── OpenAI ──

#[derive(Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_openai_url")]
    pub api_url: String,

    #[serde(default = "default_openai_model")]
    pub model: String,

    /// Seconds of inactivity after which a text conversation is forgotten
    #[serde(default = "default_openai_context_timeout")]
    pub context_timeout_secs: u64,

    /// Model used for image-bearing turns. Empty disables vision.
    #[serde(default = "default_openai_vision_model")]
    pub vision_model: String,

    #[serde(default = "default_vision_max_tokens")]
    pub vision_max_tokens: u32,

    /// Seconds of inactivity after which a conversation holding images is forgotten
    #[serde(default = "default_openai_vision_timeout")]
    pub vision_context_timeout_secs: u64,

    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_openai_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_openai_model() -> String {
    "gpt-3.5-turbo".into()
}
fn default_openai_context_timeout() -> u64 {
    120
}
fn default_openai_vision_model() -> String {
    "gpt-4-vision-preview".into()
}
fn default_vision_max_tokens() -> u32 {
    300
}
fn default_openai_vision_timeout() -> u64 {
    60
}
fn default_request_timeout() -> u64 {
    60
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_openai_url(),
            model: default_openai_model(),
            context_timeout_secs: default_openai_context_timeout(),
            vision_model: default_openai_vision_model(),
            vision_max_tokens: default_vision_max_tokens(),
            vision_context_timeout_secs: default_openai_vision_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("context_timeout_secs", &self.context_timeout_secs)
            .field("vision_model", &self.vision_model)
            .field("vision_max_tokens", &self.vision_max_tokens)
            .field(
                "vision_context_timeout_secs",
                &self.vision_context_timeout_secs,
            )
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

// ── Gemini ──

#[derive(Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_gemini_url")]
    pub api_url: String,

    #[serde(default = "default_gemini_model")]
    pub model: String,

    #[serde(default = "default_gemini_context_timeout")]
    pub context_timeout_secs: u64,

    /// Model used for image-bearing turns. Empty disables vision.
    #[serde(default = "default_gemini_vision_model")]
    pub vision_model: String,

    #[serde(default = "default_gemini_context_timeout")]
    pub vision_context_timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_gemini_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}
fn default_gemini_model() -> String {
    "gemini-pro".into()
}
fn default_gemini_context_timeout() -> u64 {
    600
}
fn default_gemini_vision_model() -> String {
    "gemini-pro-vision".into()
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_gemini_url(),
            model: default_gemini_model(),
            context_timeout_secs: default_gemini_context_timeout(),
            vision_model: default_gemini_vision_model(),
            vision_context_timeout_secs: default_gemini_context_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("context_timeout_secs", &self.context_timeout_secs)
            .field("vision_model", &self.vision_model)
            .field(
                "vision_context_timeout_secs",
                &self.vision_context_timeout_secs,
            )
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

// ── Telegram ──

#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    #[serde(default = "default_telegram_url")]
    pub api_url: String,

    /// Send replies as MarkdownV2 with protected code spans
    #[serde(default = "default_true")]
    pub escape_text: bool,

    /// Long-poll timeout passed to getUpdates
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
}

fn default_telegram_url() -> String {
    "https://api.telegram.org".into()
}
fn default_poll_timeout() -> u64 {
    30
}
fn default_true() -> bool {
    true
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_url: default_telegram_url(),
            escape_text: true,
            poll_timeout_secs: default_poll_timeout(),
        }
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &redact(&self.bot_token))
            .field("api_url", &self.api_url)
            .field("escape_text", &self.escape_text)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

// ── System ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Consult the access list; when false everyone is allowed
    #[serde(default = "default_true")]
    pub whitelist_enabled: bool,

    /// Use Gemini for chat instead of OpenAI
    #[serde(default)]
    pub use_gemini: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            whitelist_enabled: true,
            use_gemini: false,
        }
    }
}

// ── Context ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token budget for one assembled context window
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Flat token cost charged per attached image
    #[serde(default = "default_image_token_cost")]
    pub image_token_cost: usize,

    /// Count tokens with the model's BPE instead of the 4-chars heuristic
    #[serde(default = "default_true")]
    pub use_tiktoken: bool,
}

fn default_token_budget() -> usize {
    1000
}
fn default_image_token_cost() -> usize {
    85
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            image_token_cost: default_image_token_cost(),
            use_tiktoken: true,
        }
    }
}

// ── Dispatch ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Number of worker tasks pulling inbound messages
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum concurrent admitted requests across all users
    #[serde(default = "default_admission_capacity")]
    pub admission_capacity: usize,

    /// Total provider attempts per turn
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Text sent when every attempt failed
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
}

fn default_workers() -> usize {
    4
}
fn default_admission_capacity() -> usize {
    8
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_fallback_message() -> String {
    "I apologize, but the AI service is currently experiencing high traffic. Kindly try again at a later time.".into()
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            admission_capacity: default_admission_capacity(),
            retry_attempts: default_retry_attempts(),
            fallback_message: default_fallback_message(),
        }
    }
}

// ── Speech ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    #[serde(default = "default_stt_model")]
    pub stt_model: String,

    #[serde(default = "default_tts_model")]
    pub tts_model: String,

    #[serde(default = "default_tts_voice")]
    pub tts_voice: String,

    /// ffmpeg binary used to normalize voice notes
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: String,
}

fn default_stt_model() -> String {
    "whisper-1".into()
}
fn default_tts_model() -> String {
    "tts-1".into()
}
fn default_tts_voice() -> String {
    "nova".into()
}
fn default_ffmpeg() -> String {
    "ffmpeg".into()
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            stt_model: default_stt_model(),
            tts_model: default_tts_model(),
            tts_voice: default_tts_voice(),
            ffmpeg_path: default_ffmpeg(),
        }
    }
}

// ── Loading ──

impl AppConfig {
    /// Load configuration from the default path (~/.parley/config.toml).
    ///
    /// Environment variables override secrets from the file:
    /// - `PARLEY_OPENAI_API_KEY`, then `OPENAI_API_KEY`
    /// - `PARLEY_GEMINI_API_KEY`, then `GEMINI_API_KEY`
    /// - `PARLEY_TELEGRAM_TOKEN`, then `TELEGRAM_BOT_TOKEN`
    /// - `PARLEY_BOT_NAME`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let first = |keys: &[&str]| keys.iter().find_map(|k| lookup(k).filter(|v| !v.is_empty()));

        if let Some(key) = first(&["PARLEY_OPENAI_API_KEY", "OPENAI_API_KEY"]) {
            self.openai.api_key = Some(key);
        }
        if let Some(key) = first(&["PARLEY_GEMINI_API_KEY", "GEMINI_API_KEY"]) {
            self.gemini.api_key = Some(key);
        }
        if let Some(token) = first(&["PARLEY_TELEGRAM_TOKEN", "TELEGRAM_BOT_TOKEN"]) {
            self.telegram.bot_token = Some(token);
        }
        if let Some(name) = first(&["PARLEY_BOT_NAME"]) {
            self.bot_name = name;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".parley")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.openai.vision_context_timeout_secs > self.openai.context_timeout_secs {
            return Err(ConfigError::ValidationError(
                "openai.vision_context_timeout_secs must not exceed openai.context_timeout_secs"
                    .into(),
            ));
        }

        if self.gemini.vision_context_timeout_secs > self.gemini.context_timeout_secs {
            return Err(ConfigError::ValidationError(
                "gemini.vision_context_timeout_secs must not exceed gemini.context_timeout_secs"
                    .into(),
            ));
        }

        if self.context.token_budget == 0 {
            return Err(ConfigError::ValidationError(
                "context.token_budget must be > 0".into(),
            ));
        }

        if self.dispatch.workers == 0 || self.dispatch.admission_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.workers and dispatch.admission_capacity must be >= 1".into(),
            ));
        }

        if self.dispatch.retry_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.retry_attempts must be >= 1".into(),
            ));
        }

        Ok(())
    }

    /// Whether the selected chat provider has credentials.
    pub fn has_provider_key(&self) -> bool {
        if self.system.use_gemini {
            self.gemini.api_key.is_some()
        } else {
            self.openai.api_key.is_some()
        }
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bot_name: default_bot_name(),
            openai: OpenAiConfig::default(),
            gemini: GeminiConfig::default(),
            telegram: TelegramConfig::default(),
            system: SystemConfig::default(),
            context: ContextConfig::default(),
            dispatch: DispatchConfig::default(),
            speech: SpeechConfig::default(),
        }
    }
}

// ── Access list ──

/// Key that sets the decision for ids not listed explicitly.
pub const ALLOW_ALL_KEY: &str = "allow_all";

/// Access list, loaded from `~/.parley/acl.toml`.
///
/// ```toml
/// [allowed_user_id]
/// "tg-12345" = true
/// allow_all = false
///
/// [allowed_chat_id]
/// "tg--100200300" = true
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AclConfig {
    #[serde(default)]
    pub allowed_user_id: HashMap<String, bool>,

    #[serde(default)]
    pub allowed_chat_id: HashMap<String, bool>,
}

impl AclConfig {
    /// Load the access list from the default path (~/.parley/acl.toml).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&AppConfig::config_dir().join("acl.toml"))
    }

    /// Load the access list from a specific path. A missing file denies everyone.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No access list found at {}, nobody is listed", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
