//! # Parley Core
//!
//! Domain types, traits, and error definitions for the Parley chat relay.
//! This crate has **zero framework dependencies**; it defines the domain model
//! that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod access;
pub mod channel;
pub mod error;
pub mod ids;
pub mod message;
pub mod provider;
pub mod scope;
pub mod speech;

// Re-export key types at crate root for ergonomics
pub use access::{AccessControl, AllowAll};
pub use channel::{Channel, InboundMessage};
pub use error::{ChannelError, ContextError, Error, ProviderError, Result, SpeechError};
pub use ids::{ChatId, MessageId, UserId};
pub use message::{ConversationEntry, ImageRef};
pub use provider::{Capabilities, Provider};
pub use scope::{CleanupHandle, CleanupScope, MediaFile};
pub use speech::{AudioTranscoder, SpeechToText, TextToSpeech};
