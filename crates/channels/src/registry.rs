//! Channel registry: every active surface behind one lookup.
//!
//! The dispatcher reads one merged inbound stream and resolves the channel
//! of each message by name when it needs to reply.

use std::collections::HashMap;
use std::sync::Arc;

use parley_core::channel::{Channel, InboundMessage};
use parley_core::error::ChannelError;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Central registry holding all enabled channel instances.
pub struct ChannelRegistry {
    channels: HashMap<String, Arc<dyn Channel>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Register a channel adapter.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        info!(channel = %name, "Registered channel");
        self.channels.insert(name, channel);
    }

    /// Get a channel by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Channel>> {
        self.channels.get(name)
    }

    /// List all registered channel names.
    pub fn list(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Start all channels and merge their message streams into one receiver.
    pub async fn start_all(
        &self,
    ) -> Result<mpsc::Receiver<(String, Result<InboundMessage, ChannelError>)>, ChannelError> {
        let (merged_tx, merged_rx) = mpsc::channel(256);

        for (name, channel) in &self.channels {
            let rx = channel.start().await?;
            let tx = merged_tx.clone();
            let channel_name = name.clone();

            tokio::spawn(async move {
                let mut rx = rx;
                while let Some(msg) = rx.recv().await {
                    if tx.send((channel_name.clone(), msg)).await.is_err() {
                        break; // Merged receiver dropped
                    }
                }
            });

            info!(channel = %name, "Started channel");
        }

        Ok(merged_rx)
    }

    /// Stop all channels gracefully.
    pub async fn stop_all(&self) {
        for (name, channel) in &self.channels {
            if let Err(e) = channel.stop().await {
                warn!(channel = %name, error = %e, "Failed to stop channel");
            }
        }
    }

    /// Run health checks on all channels.
    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        for (name, channel) in &self.channels {
            let healthy = channel.health_check().await.unwrap_or(false);
            results.insert(name.clone(), healthy);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parley_core::ids::{ChatId, MessageId, UserId};
    use parley_core::scope::MediaFile;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct MockChannel {
        name: String,
        started: AtomicBool,
        stopped: AtomicBool,
        inject_tx: tokio::sync::Mutex<Option<mpsc::Sender<Result<InboundMessage, ChannelError>>>>,
    }

    impl MockChannel {
        fn new(name: &str) -> Self {
            Self {
                name: name.into(),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                inject_tx: tokio::sync::Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl Channel for MockChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(
            &self,
        ) -> Result<mpsc::Receiver<Result<InboundMessage, ChannelError>>, ChannelError> {
            self.started.store(true, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(4);
            *self.inject_tx.lock().await = Some(tx);
            Ok(rx)
        }

        async fn reply_message(
            &self,
            _chat: &ChatId,
            _text: &str,
            _reply_to: &MessageId,
        ) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn quote_message(
            &self,
            _chat: &ChatId,
            _text: &str,
            _reply_to: &MessageId,
            _quote: &str,
        ) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn reply_voice(
            &self,
            _chat: &ChatId,
            _audio: &Path,
            _reply_to: &MessageId,
        ) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn stop(&self) -> Result<(), ChannelError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn health_check(&self) -> Result<bool, ChannelError> {
            Ok(self.started.load(Ordering::SeqCst))
        }
    }

    #[test]
    fn empty_registry() {
        let reg = ChannelRegistry::new();
        assert!(reg.is_empty());
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn register_and_get() {
        let mut reg = ChannelRegistry::new();
        reg.register(Arc::new(MockChannel::new("telegram")));
        reg.register(Arc::new(MockChannel::new("console")));

        assert_eq!(reg.len(), 2);
        assert!(reg.list().contains(&"console".to_string()));
        assert!(reg.get("telegram").is_some());
        assert!(reg.get("slack").is_none());
    }

    #[tokio::test]
    async fn merged_stream_tags_channel_name() {
        let mut reg = ChannelRegistry::new();
        let ch = Arc::new(MockChannel::new("telegram"));
        reg.register(ch.clone());

        let mut rx = reg.start_all().await.unwrap();
        assert!(ch.started.load(Ordering::SeqCst));

        let tx = ch.inject_tx.lock().await.clone().unwrap();
        tx.send(Ok(InboundMessage::text(
            "telegram",
            MessageId::from("tg-1"),
            UserId::from("tg-2"),
            ChatId::from("tg-2"),
            "hi",
        )))
        .await
        .unwrap();

        let (name, msg) = rx.recv().await.unwrap();
        assert_eq!(name, "telegram");
        assert_eq!(msg.unwrap().text.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn stop_all_channels() {
        let mut reg = ChannelRegistry::new();
        let ch = Arc::new(MockChannel::new("test"));
        reg.register(ch.clone());

        reg.stop_all().await;
        assert!(ch.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn health_check_all() {
        let mut reg = ChannelRegistry::new();
        let ch = Arc::new(MockChannel::new("test"));
        reg.register(ch.clone());

        let health = reg.health_check_all().await;
        assert_eq!(health.get("test"), Some(&false));

        let _rx = reg.start_all().await.unwrap();
        let health = reg.health_check_all().await;
        assert_eq!(health.get("test"), Some(&true));
    }

    #[tokio::test]
    async fn media_is_released_when_nobody_reads_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice.oga");
        std::fs::write(&path, b"ogg").unwrap();

        let mut reg = ChannelRegistry::new();
        let ch = Arc::new(MockChannel::new("telegram"));
        reg.register(ch.clone());
        drop(reg.start_all().await.unwrap());

        let mut msg = InboundMessage::text(
            "telegram",
            MessageId::from("tg-1"),
            UserId::from("tg-2"),
            ChatId::from("tg-2"),
            "",
        );
        msg.voice = Some(MediaFile::temporary(&path));
        let tx = ch.inject_tx.lock().await.clone().unwrap();
        tx.send(Ok(msg)).await.unwrap();

        for _ in 0..100 {
            if !path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!path.exists());
    }
}
