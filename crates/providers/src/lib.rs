//! LLM provider implementations for Parley.
//!
//! All chat providers implement the `parley_core::Provider` trait and are
//! called through [`ProviderAdapter`], which adds bounded retry and a
//! fallback reply. The router selects the provider based on configuration.

pub mod adapter;
pub mod gemini;
mod http;
pub mod openai;
pub mod retry;
pub mod router;
pub mod speech;

pub use adapter::{ProviderAdapter, Reply};
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use retry::{RetryOutcome, RetryPolicy};
pub use router::{ProviderSetup, build_adapter, build_from_config, build_speech};
pub use speech::SpeechServices;
