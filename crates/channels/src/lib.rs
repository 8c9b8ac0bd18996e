//! Messaging surfaces for Parley.
//!
//! Each channel normalizes platform updates into
//! [`InboundMessage`](parley_core::channel::InboundMessage)s and delivers
//! replies back.
//!
//! Available channels:
//! - **Telegram**: Bot API over long polling
//! - **Console**: stdin/stdout for local testing
//!
//! The registry merges every started channel into one inbound stream.

pub mod console;
pub mod markdown;
pub mod registry;
pub mod telegram;

pub use console::ConsoleChannel;
pub use markdown::{MarkdownEscaper, plain_quote};
pub use registry::ChannelRegistry;
pub use telegram::{TelegramChannel, TelegramSettings};
