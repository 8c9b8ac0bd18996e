//! Channel trait: the abstraction over chat platforms.
//!
//! A Channel connects Parley to a messaging platform (Telegram, console).
//! It yields normalized [`InboundMessage`]s and accepts the three outbound
//! operations the dispatch core needs: plain reply, quoted reply and voice
//! reply.

use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc;

use crate::error::ChannelError;
use crate::ids::{ChatId, MessageId, UserId};
use crate::scope::MediaFile;

/// A message received from a channel, normalized across platforms.
///
/// Media fields own their temp-file cleanup handles; whoever consumes the
/// message is responsible for releasing them (see [`crate::scope`]).
#[derive(Debug)]
pub struct InboundMessage {
    /// Name of the channel that produced this message.
    pub channel: String,

    /// Platform message id, used for threaded replies.
    pub id: MessageId,

    /// Sender, if the platform could resolve one.
    pub user: Option<UserId>,

    /// Sender's username (for logs).
    pub user_name: Option<String>,

    /// The chat this message was posted in.
    pub chat: Option<ChatId>,

    /// Text content or image caption.
    pub text: Option<String>,

    /// Downloaded voice or audio note.
    pub voice: Option<MediaFile>,

    /// Downloaded images.
    pub images: Vec<MediaFile>,

    /// Number of members in the chat (2 for a private chat with the bot).
    pub member_count: u32,

    /// The bot's own username in that chat, used for mention detection.
    pub bot_username: Option<String>,
}

impl InboundMessage {
    /// A minimal text message; the remaining fields can be set directly.
    pub fn text(
        channel: impl Into<String>,
        id: MessageId,
        user: UserId,
        chat: ChatId,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            id,
            user: Some(user),
            user_name: None,
            chat: Some(chat),
            text: Some(text.into()),
            voice: None,
            images: Vec::new(),
            member_count: 2,
            bot_username: None,
        }
    }

    /// Whether the chat is a group (more than the user and the bot).
    pub fn is_group(&self) -> bool {
        self.member_count > 2
    }
}

/// The core Channel trait.
///
/// Implementations handle platform-specific connection logic, message
/// formatting and media download. Outbound failures are returned, never
/// panicked; callers decide whether to log and move on.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name (e.g., "telegram", "console").
    fn name(&self) -> &str;

    /// Start listening for incoming messages.
    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<InboundMessage, ChannelError>>, ChannelError>;

    /// Reply to a message with text.
    async fn reply_message(
        &self,
        chat: &ChatId,
        text: &str,
        reply_to: &MessageId,
    ) -> Result<(), ChannelError>;

    /// Reply with text preceded by a quoted annotation (e.g. a transcript).
    async fn quote_message(
        &self,
        chat: &ChatId,
        text: &str,
        reply_to: &MessageId,
        quote: &str,
    ) -> Result<(), ChannelError>;

    /// Reply with an audio file.
    async fn reply_voice(
        &self,
        chat: &ChatId,
        audio: &Path,
        reply_to: &MessageId,
    ) -> Result<(), ChannelError>;

    /// Stop the channel gracefully.
    async fn stop(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Health check: is the channel connected and operational?
    async fn health_check(&self) -> Result<bool, ChannelError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_message_defaults_to_private_chat() {
        let msg = InboundMessage::text(
            "telegram",
            MessageId::from("tg-1"),
            UserId::from("tg-10"),
            ChatId::from("tg-10"),
            "Hello bot!",
        );
        assert_eq!(msg.channel, "telegram");
        assert_eq!(msg.text.as_deref(), Some("Hello bot!"));
        assert!(!msg.is_group());
        assert!(msg.voice.is_none());
    }

    #[test]
    fn member_count_decides_group() {
        let mut msg = InboundMessage::text(
            "telegram",
            MessageId::from("tg-1"),
            UserId::from("tg-10"),
            ChatId::from("tg--100"),
            "hi all",
        );
        msg.member_count = 5;
        assert!(msg.is_group());
    }
}
