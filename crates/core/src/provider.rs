//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider takes an ordered context window of [`ConversationEntry`] values
//! (greeting first, new turn last) and returns the model's answer text.
//! Request shaping, response parsing and failure classification are the
//! provider's business; retries live one level up in the adapter.
//!
//! Implementations: OpenAI chat completions, Google Gemini.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::ConversationEntry;

/// What kinds of turns a provider can serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Whether image-bearing turns can be sent.
    pub vision: bool,
}

impl Capabilities {
    pub const TEXT_ONLY: Self = Self { vision: false };
    pub const VISION: Self = Self { vision: true };
}

/// The core Provider trait.
///
/// The dispatch core calls `send()` through the retrying adapter without
/// knowing which backend is configured.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "gemini").
    fn name(&self) -> &str;

    /// Which turn kinds this provider accepts.
    fn capabilities(&self) -> Capabilities {
        Capabilities::TEXT_ONLY
    }

    /// Send one context window and get the answer text back.
    async fn send(&self, entries: &[ConversationEntry]) -> Result<String, ProviderError>;

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}

/// The newest entry of a window, which is the turn being asked.
pub fn latest_turn(entries: &[ConversationEntry]) -> Option<&ConversationEntry> {
    entries.last()
}
