//! Console channel: stdin lines in, stdout out.
//!
//! Used by `parley run --console` to talk to the relay without Telegram.
//! `/image <path> [caption]` sends a local image; `/voice <path>` sends a
//! local audio file. Local files are borrowed, never deleted.

use crate::markdown::plain_quote;
use async_trait::async_trait;
use parley_core::channel::{Channel, InboundMessage};
use parley_core::error::ChannelError;
use parley_core::ids::{ChatId, MessageId, UserId, namespaced};
use parley_core::scope::MediaFile;
use std::path::Path;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Prefix for every console id.
pub const ID_PREFIX: &str = "cli";

const CHANNEL_NAME: &str = "console";

pub struct ConsoleChannel {
    bot_username: String,
}

impl ConsoleChannel {
    pub fn new(bot_username: impl Into<String>) -> Self {
        Self {
            bot_username: bot_username.into(),
        }
    }

    pub fn user() -> UserId {
        UserId::new(namespaced(ID_PREFIX, "local"))
    }

    pub fn chat() -> ChatId {
        ChatId::new(namespaced(ID_PREFIX, "session"))
    }

    /// Turn one input line into a message. Returns `None` for blank lines.
    fn parse_line(&self, seq: u64, line: &str) -> Option<InboundMessage> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let mut msg = InboundMessage::text(
            CHANNEL_NAME,
            MessageId::new(namespaced(ID_PREFIX, seq)),
            Self::user(),
            Self::chat(),
            line,
        );
        msg.user_name = Some("local".into());
        msg.bot_username = Some(self.bot_username.clone());

        if let Some(rest) = line.strip_prefix("/image ") {
            let (path, caption) = split_path(rest);
            msg.images.push(MediaFile::borrowed(path));
            msg.text = caption.map(str::to_string);
        } else if let Some(rest) = line.strip_prefix("/voice ") {
            let (path, _) = split_path(rest);
            msg.voice = Some(MediaFile::borrowed(path));
            msg.text = None;
        }
        Some(msg)
    }
}

fn split_path(rest: &str) -> (&str, Option<&str>) {
    match rest.trim().split_once(char::is_whitespace) {
        Some((path, caption)) if !caption.trim().is_empty() => (path, Some(caption.trim())),
        Some((path, _)) => (path, None),
        None => (rest.trim(), None),
    }
}

#[async_trait]
impl Channel for ConsoleChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<InboundMessage, ChannelError>>, ChannelError> {
        let (tx, rx) = mpsc::channel(32);
        let parser = ConsoleChannel::new(self.bot_username.clone());

        tokio::spawn(async move {
            let mut lines = BufReader::new(io::stdin()).lines();
            let mut seq = 0u64;

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if matches!(line.trim(), "exit" | "quit" | "/exit" | "/quit" | ":q") {
                            break;
                        }
                        seq += 1;
                        let Some(msg) = parser.parse_line(seq, &line) else {
                            continue;
                        };
                        if tx.send(Ok(msg)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF (Ctrl+D)
                    Err(e) => {
                        let _ = tx.send(Err(ChannelError::ConnectionLost(e.to_string()))).await;
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn reply_message(
        &self,
        _chat: &ChatId,
        text: &str,
        _reply_to: &MessageId,
    ) -> Result<(), ChannelError> {
        println!("{}: {text}", self.bot_username);
        Ok(())
    }

    async fn quote_message(
        &self,
        _chat: &ChatId,
        text: &str,
        _reply_to: &MessageId,
        quote: &str,
    ) -> Result<(), ChannelError> {
        println!("{}: {}", self.bot_username, plain_quote(quote, text));
        Ok(())
    }

    async fn reply_voice(
        &self,
        _chat: &ChatId,
        audio: &Path,
        _reply_to: &MessageId,
    ) -> Result<(), ChannelError> {
        println!("{}: [voice reply, {}]", self.bot_username, audio.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_ids_are_namespaced() {
        assert_eq!(ConsoleChannel::user().as_str(), "cli-local");
        assert_eq!(ConsoleChannel::chat().as_str(), "cli-session");
    }

    #[test]
    fn text_line_becomes_private_message() {
        let ch = ConsoleChannel::new("Parley");
        let msg = ch.parse_line(3, "  hello there ").unwrap();
        assert_eq!(msg.id.as_str(), "cli-3");
        assert_eq!(msg.text.as_deref(), Some("hello there"));
        assert!(!msg.is_group());
        assert_eq!(msg.bot_username.as_deref(), Some("Parley"));
    }

    #[test]
    fn blank_lines_are_skipped() {
        let ch = ConsoleChannel::new("Parley");
        assert!(ch.parse_line(1, "   ").is_none());
    }

    #[test]
    fn image_command_borrows_file() {
        let ch = ConsoleChannel::new("Parley");
        let msg = ch.parse_line(1, "/image /tmp/cat.png what is this?").unwrap();
        assert_eq!(msg.images.len(), 1);
        assert_eq!(msg.images[0].path(), Path::new("/tmp/cat.png"));
        assert_eq!(msg.text.as_deref(), Some("what is this?"));

        let (_, cleanup) = msg.images.into_iter().next().unwrap().into_parts();
        assert!(cleanup.is_none());
    }

    #[test]
    fn voice_command_has_no_text() {
        let ch = ConsoleChannel::new("Parley");
        let msg = ch.parse_line(1, "/voice /tmp/note.ogg").unwrap();
        assert!(msg.voice.is_some());
        assert!(msg.text.is_none());
    }

    #[tokio::test]
    async fn replies_do_not_fail() {
        let ch = ConsoleChannel::new("Parley");
        let chat = ConsoleChannel::chat();
        let id = MessageId::from("cli-1");
        ch.reply_message(&chat, "hi", &id).await.unwrap();
        ch.quote_message(&chat, "hi", &id, "Transcription:\nhey").await.unwrap();
        ch.reply_voice(&chat, Path::new("/tmp/x.aac"), &id).await.unwrap();
    }
}
