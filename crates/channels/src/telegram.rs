//! Telegram channel adapter.
//!
//! Talks to the Bot API directly over HTTPS: long-polling `getUpdates` for
//! inbound messages, `getFile` for voice notes and photos, `sendMessage` and
//! `sendVoice` for replies.
//!
//! Ids are namespaced with `tg-` so they never collide with other channels.

use crate::markdown::{MarkdownEscaper, plain_quote};
use async_trait::async_trait;
use parley_core::channel::{Channel, InboundMessage};
use parley_core::error::ChannelError;
use parley_core::ids::{ChatId, MessageId, UserId, namespaced, strip_namespace};
use parley_core::scope::{CleanupHandle, MediaFile};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Prefix for every Telegram id.
pub const ID_PREFIX: &str = "tg";

const CHANNEL_NAME: &str = "telegram";

/// Telegram channel configuration.
#[derive(Clone)]
pub struct TelegramSettings {
    /// Bot token from @BotFather.
    pub bot_token: String,
    /// Bot API base URL.
    pub api_url: String,
    /// Send replies as MarkdownV2.
    pub escape_text: bool,
    /// Long-poll timeout for getUpdates.
    pub poll_timeout_secs: u64,
}

impl TelegramSettings {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            api_url: "https://api.telegram.org".into(),
            escape_text: true,
            poll_timeout_secs: 30,
        }
    }

    /// Build from config. Fails when no bot token is set.
    pub fn from_config(config: &parley_config::TelegramConfig) -> Result<Self, ChannelError> {
        let bot_token = config
            .bot_token
            .clone()
            .ok_or_else(|| ChannelError::NotConfigured("telegram.bot_token is not set".into()))?;
        Ok(Self {
            bot_token,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            escape_text: config.escape_text,
            poll_timeout_secs: config.poll_timeout_secs,
        })
    }
}

impl std::fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("bot_token", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .field("escape_text", &self.escape_text)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

/// Bot API client plus the caches shared with the polling task.
struct TelegramApi {
    client: reqwest::Client,
    method_base: String,
    file_base: String,
    poll_timeout_secs: u64,
    escaper: Option<MarkdownEscaper>,
    member_counts: Mutex<HashMap<i64, u32>>,
    bot_username: Mutex<Option<String>>,
}

/// Telegram channel adapter.
pub struct TelegramChannel {
    api: Arc<TelegramApi>,
    polling: bool,
    /// Sender for injecting test messages.
    inject_tx: Mutex<Option<mpsc::Sender<Result<InboundMessage, ChannelError>>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl TelegramChannel {
    pub fn new(settings: TelegramSettings) -> Self {
        let api_url = settings.api_url.trim_end_matches('/');
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.poll_timeout_secs + 15))
            .build()
            .unwrap_or_default();

        Self {
            api: Arc::new(TelegramApi {
                client,
                method_base: format!("{api_url}/bot{}", settings.bot_token),
                file_base: format!("{api_url}/file/bot{}", settings.bot_token),
                poll_timeout_secs: settings.poll_timeout_secs,
                escaper: settings.escape_text.then(MarkdownEscaper::new),
                member_counts: Mutex::new(HashMap::new()),
                bot_username: Mutex::new(None),
            }),
            polling: true,
            inject_tx: Mutex::new(None),
            poller: Mutex::new(None),
        }
    }

    /// Disable the getUpdates loop; only injected messages are delivered.
    pub fn without_polling(mut self) -> Self {
        self.polling = false;
        self
    }

    /// Inject a message as if it came from Telegram (for testing).
    pub async fn inject_message(&self, msg: InboundMessage) -> Result<(), ChannelError> {
        let guard = self.inject_tx.lock().await;
        if let Some(tx) = guard.as_ref() {
            tx.send(Ok(msg))
                .await
                .map_err(|_| ChannelError::ConnectionLost("Message channel closed".into()))
        } else {
            Err(ChannelError::ConnectionLost("Channel not started".into()))
        }
    }
}

/// Parse a namespaced id back into Telegram's numeric form.
fn raw_id(id: &str) -> Result<i64, ChannelError> {
    strip_namespace(ID_PREFIX, id)
        .unwrap_or(id)
        .parse()
        .map_err(|_| ChannelError::InvalidPayload(format!("not a Telegram id: {id}")))
}

// ── Bot API calls ─────────────────────────────────────────────────────────

impl TelegramApi {
    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T, ChannelError> {
        let response = self
            .client
            .post(format!("{}/{method}", self.method_base))
            .json(body)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionLost(e.to_string()))?;
        Self::unwrap_response(method, response).await
    }

    async fn unwrap_response<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> Result<T, ChannelError> {
        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| ChannelError::InvalidPayload(format!("{method}: {e}")))?;

        match (parsed.ok, parsed.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(ChannelError::DeliveryFailed {
                channel: CHANNEL_NAME.into(),
                reason: format!(
                    "{method}: {}",
                    parsed.description.unwrap_or_else(|| "unknown error".into())
                ),
            }),
        }
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, ChannelError> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": self.poll_timeout_secs,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }

    async fn send_message(
        &self,
        chat: i64,
        text: &str,
        reply_to: i64,
        parse_mode: Option<&str>,
    ) -> Result<(), ChannelError> {
        let mut body = json!({
            "chat_id": chat,
            "text": text,
            "reply_to_message_id": reply_to,
        });
        if let Some(mode) = parse_mode {
            body["parse_mode"] = json!(mode);
        }
        let _: Value = self.call("sendMessage", &body).await?;
        Ok(())
    }

    /// Send as MarkdownV2, falling back to plain text if Telegram rejects it.
    async fn send_formatted(
        &self,
        chat: i64,
        markdown: Option<String>,
        plain: &str,
        reply_to: i64,
    ) -> Result<(), ChannelError> {
        if let Some(markdown) = markdown {
            match self
                .send_message(chat, &markdown, reply_to, Some("MarkdownV2"))
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => warn!(chat, error = %e, "MarkdownV2 rejected, resending as plain text"),
            }
        }
        self.send_message(chat, plain, reply_to, None).await
    }

    async fn member_count(&self, chat: &TgChat) -> u32 {
        if chat.kind == "private" {
            return 2;
        }
        if let Some(count) = self.member_counts.lock().await.get(&chat.id) {
            return *count;
        }
        match self
            .call::<u32>("getChatMemberCount", &json!({ "chat_id": chat.id }))
            .await
        {
            Ok(count) => {
                self.member_counts.lock().await.insert(chat.id, count);
                count
            }
            Err(e) => {
                warn!(chat = chat.id, error = %e, "Member count lookup failed, assuming group");
                3
            }
        }
    }

    async fn bot_username(&self) -> Result<String, ChannelError> {
        let mut cached = self.bot_username.lock().await;
        if let Some(name) = cached.as_ref() {
            return Ok(name.clone());
        }
        let me: TgUser = self.call("getMe", &json!({})).await?;
        let name = me.username.unwrap_or(me.first_name);
        *cached = Some(name.clone());
        Ok(name)
    }

    /// Download a file into a temp file that keeps Telegram's extension.
    async fn download(&self, file_id: &str) -> Result<MediaFile, ChannelError> {
        let file: TgFile = self
            .call("getFile", &json!({ "file_id": file_id }))
            .await
            .map_err(|e| ChannelError::Download(e.to_string()))?;
        let remote = file
            .file_path
            .ok_or_else(|| ChannelError::Download(format!("no file_path for {file_id}")))?;

        let bytes = self
            .client
            .get(format!("{}/{remote}", self.file_base))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ChannelError::Download(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| ChannelError::Download(e.to_string()))?;

        let suffix = Path::new(&remote)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let path = tempfile::Builder::new()
            .prefix("parley-")
            .suffix(&suffix)
            .tempfile()
            .and_then(|f| f.into_temp_path().keep().map_err(|e| e.error))
            .map_err(|e| ChannelError::Download(e.to_string()))?;

        if let Err(e) = tokio::fs::write(&path, &bytes).await {
            CleanupHandle::remove_file(&path).run();
            return Err(ChannelError::Download(e.to_string()));
        }
        debug!(file = %path.display(), size = bytes.len(), "Downloaded Telegram file");
        Ok(MediaFile::temporary(path))
    }

    /// Normalize a Telegram message. Media that fails to download is dropped
    /// with a warning; the rest of the message is still delivered.
    async fn convert(&self, msg: TgMessage) -> InboundMessage {
        let mut voice = None;
        if let Some(file) = msg.voice.as_ref().or(msg.audio.as_ref()) {
            match self.download(&file.file_id).await {
                Ok(media) => voice = Some(media),
                Err(e) => warn!(message = msg.message_id, error = %e, "Voice download failed"),
            }
        }

        let mut images = Vec::new();
        // Telegram lists photo sizes smallest first
        if let Some(largest) = msg.photo.as_ref().and_then(|p| p.last()) {
            match self.download(&largest.file_id).await {
                Ok(media) => images.push(media),
                Err(e) => warn!(message = msg.message_id, error = %e, "Photo download failed"),
            }
        }

        let bot_username = match self.bot_username().await {
            Ok(name) => Some(name),
            Err(e) => {
                warn!(error = %e, "getMe failed");
                None
            }
        };

        InboundMessage {
            channel: CHANNEL_NAME.into(),
            id: MessageId::new(namespaced(ID_PREFIX, msg.message_id)),
            user: msg
                .from
                .as_ref()
                .map(|u| UserId::new(namespaced(ID_PREFIX, u.id))),
            user_name: msg
                .from
                .as_ref()
                .map(|u| u.username.clone().unwrap_or_else(|| u.first_name.clone())),
            chat: Some(ChatId::new(namespaced(ID_PREFIX, msg.chat.id))),
            text: msg.text.or(msg.caption),
            voice,
            images,
            member_count: self.member_count(&msg.chat).await,
            bot_username,
        }
    }

    /// Long-poll until the receiver goes away.
    async fn poll(self: Arc<Self>, tx: mpsc::Sender<Result<InboundMessage, ChannelError>>) {
        let mut offset = 0;
        loop {
            let updates = match self.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "getUpdates failed, retrying");
                    if tx.is_closed() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = update.message else {
                    continue;
                };
                let inbound = self.convert(message).await;
                if tx.send(Ok(inbound)).await.is_err() {
                    info!("Telegram receiver dropped, stopping poller");
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<InboundMessage, ChannelError>>, ChannelError> {
        let (tx, rx) = mpsc::channel(64);
        *self.inject_tx.lock().await = Some(tx.clone());

        if self.polling {
            info!("Telegram channel starting (long polling)");
            let handle = tokio::spawn(self.api.clone().poll(tx));
            if let Some(old) = self.poller.lock().await.replace(handle) {
                old.abort();
            }
        } else {
            info!("Telegram channel starting (injection only)");
        }
        Ok(rx)
    }

    async fn reply_message(
        &self,
        chat: &ChatId,
        text: &str,
        reply_to: &MessageId,
    ) -> Result<(), ChannelError> {
        let chat = raw_id(chat.as_str())?;
        let reply_to = raw_id(reply_to.as_str())?;
        let markdown = self.api.escaper.as_ref().map(|e| e.escape(text));
        self.api.send_formatted(chat, markdown, text, reply_to).await
    }

    async fn quote_message(
        &self,
        chat: &ChatId,
        text: &str,
        reply_to: &MessageId,
        quote: &str,
    ) -> Result<(), ChannelError> {
        let chat = raw_id(chat.as_str())?;
        let reply_to = raw_id(reply_to.as_str())?;
        let markdown = self.api.escaper.as_ref().map(|e| e.quote(quote, text));
        self.api
            .send_formatted(chat, markdown, &plain_quote(quote, text), reply_to)
            .await
    }

    async fn reply_voice(
        &self,
        chat: &ChatId,
        audio: &Path,
        reply_to: &MessageId,
    ) -> Result<(), ChannelError> {
        let chat = raw_id(chat.as_str())?;
        let reply_to = raw_id(reply_to.as_str())?;
        let bytes = tokio::fs::read(audio)
            .await
            .map_err(|e| ChannelError::InvalidPayload(format!("{}: {e}", audio.display())))?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "voice.aac".into());

        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat.to_string())
            .text("reply_to_message_id", reply_to.to_string())
            .part(
                "voice",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            );

        let response = self
            .api
            .client
            .post(format!("{}/sendVoice", self.api.method_base))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionLost(e.to_string()))?;
        let _: Value = TelegramApi::unwrap_response("sendVoice", response).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        info!("Telegram channel stopping");
        *self.inject_tx.lock().await = None;
        if let Some(handle) = self.poller.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, ChannelError> {
        Ok(self.api.call::<TgUser>("getMe", &json!({})).await.is_ok())
    }
}

// ── Wire types ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    from: Option<TgUser>,
    chat: TgChat,
    text: Option<String>,
    caption: Option<String>,
    voice: Option<TgFileRef>,
    audio: Option<TgFileRef>,
    photo: Option<Vec<TgFileRef>>,
}

#[derive(Debug, Deserialize)]
struct TgUser {
    id: i64,
    #[serde(default)]
    first_name: String,
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct TgFileRef {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct TgFile {
    file_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> TelegramSettings {
        let mut settings = TelegramSettings::new("test-token-123");
        settings.api_url = "http://127.0.0.1:9".into();
        settings
    }

    #[test]
    fn channel_name() {
        let ch = TelegramChannel::new(test_settings());
        assert_eq!(ch.name(), "telegram");
    }

    #[test]
    fn settings_debug_redacts_token() {
        let dbg = format!("{:?}", test_settings());
        assert!(!dbg.contains("test-token-123"));
    }

    #[test]
    fn from_config_requires_token() {
        let config = parley_config::TelegramConfig::default();
        assert!(matches!(
            TelegramSettings::from_config(&config),
            Err(ChannelError::NotConfigured(_))
        ));
    }

    #[test]
    fn raw_ids_strip_prefix() {
        assert_eq!(raw_id("tg-42").unwrap(), 42);
        assert_eq!(raw_id("tg--100123").unwrap(), -100123);
        assert_eq!(raw_id("77").unwrap(), 77);
        assert!(raw_id("cli-local").is_err());
    }

    #[tokio::test]
    async fn start_and_inject() {
        let ch = TelegramChannel::new(test_settings()).without_polling();
        let mut rx = ch.start().await.unwrap();

        let msg = InboundMessage::text(
            "telegram",
            MessageId::from("tg-1"),
            UserId::from("tg-123"),
            ChatId::from("tg-456"),
            "Hello bot!",
        );
        ch.inject_message(msg).await.unwrap();

        let received = rx.recv().await.unwrap().unwrap();
        assert_eq!(received.text.as_deref(), Some("Hello bot!"));
        assert_eq!(received.user, Some(UserId::from("tg-123")));
    }

    #[tokio::test]
    async fn inject_before_start_fails() {
        let ch = TelegramChannel::new(test_settings()).without_polling();
        let msg = InboundMessage::text(
            "telegram",
            MessageId::from("tg-1"),
            UserId::from("tg-1"),
            ChatId::from("tg-1"),
            "early",
        );
        assert!(ch.inject_message(msg).await.is_err());
    }

    #[tokio::test]
    async fn stop_closes_injection() {
        let ch = TelegramChannel::new(test_settings()).without_polling();
        let _rx = ch.start().await.unwrap();
        ch.stop().await.unwrap();
        let msg = InboundMessage::text(
            "telegram",
            MessageId::from("tg-1"),
            UserId::from("tg-1"),
            ChatId::from("tg-1"),
            "late",
        );
        assert!(ch.inject_message(msg).await.is_err());
    }

    #[test]
    fn update_with_photo_and_caption_parses() {
        let body = r#"{
            "ok": true,
            "result": [{
                "update_id": 10,
                "message": {
                    "message_id": 5,
                    "from": {"id": 42, "is_bot": false, "first_name": "Ann", "username": "ann"},
                    "chat": {"id": -100200, "type": "supergroup"},
                    "caption": "@parley_bot what is this?",
                    "photo": [{"file_id": "small", "width": 90}, {"file_id": "large", "width": 1280}]
                }
            }]
        }"#;
        let parsed: ApiResponse<Vec<Update>> = serde_json::from_str(body).unwrap();
        let update = &parsed.result.unwrap()[0];
        let message = update.message.as_ref().unwrap();
        assert_eq!(message.chat.kind, "supergroup");
        assert_eq!(message.photo.as_ref().unwrap().last().unwrap().file_id, "large");
        assert!(message.text.is_none());
    }

    #[tokio::test]
    async fn private_chat_member_count_needs_no_call() {
        let ch = TelegramChannel::new(test_settings());
        let chat = TgChat {
            id: 5,
            kind: "private".into(),
        };
        assert_eq!(ch.api.member_count(&chat).await, 2);
    }

    #[tokio::test]
    async fn unreachable_api_is_connection_lost() {
        let ch = TelegramChannel::new(test_settings());
        let err = ch
            .reply_message(&ChatId::from("tg-1"), "hi", &MessageId::from("tg-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::ConnectionLost(_)));
        assert!(!ch.health_check().await.unwrap());
    }
}
