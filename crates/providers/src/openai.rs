//! OpenAI chat completions provider.
//!
//! Entries map onto chat messages: system text → `system`, question →
//! `user`, answer → `assistant`. When the window carries images and a vision
//! model is configured the request goes to that model instead, with images
//! inlined as base64 data URLs and `max_tokens` capped.

use crate::http;
use async_trait::async_trait;
use parley_config::OpenAiConfig;
use parley_core::error::ProviderError;
use parley_core::message::ConversationEntry;
use parley_core::provider::{Capabilities, Provider};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

pub struct OpenAiProvider {
    base_url: String,
    api_key: String,
    model: String,
    vision: Option<VisionModel>,
    client: reqwest::Client,
}

#[derive(Debug, Clone)]
struct VisionModel {
    model: String,
    max_tokens: u32,
}

impl OpenAiProvider {
    /// Create a text-only provider.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            vision: None,
            client: http::client(Duration::from_secs(60)),
        }
    }

    /// Route image-bearing windows to `model`.
    pub fn with_vision(mut self, model: impl Into<String>, max_tokens: u32) -> Self {
        self.vision = Some(VisionModel {
            model: model.into(),
            max_tokens,
        });
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http::client(timeout);
        self
    }

    /// Build from config. Fails when no API key is set.
    pub fn from_config(config: &OpenAiConfig) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("openai.api_key is not set".into()))?;

        let mut provider = Self::new(&config.api_url, api_key, &config.model)
            .with_timeout(Duration::from_secs(config.request_timeout_secs));
        if !config.vision_model.is_empty() {
            provider = provider.with_vision(&config.vision_model, config.vision_max_tokens);
        }
        Ok(provider)
    }

    /// Build the `messages` array for one window.
    async fn to_api_messages(
        entries: &[ConversationEntry],
        vision: bool,
    ) -> Result<Vec<Value>, ProviderError> {
        let mut messages = Vec::with_capacity(entries.len() * 2);

        for entry in entries {
            if let Some(system) = entry.system_text() {
                messages.push(json!({ "role": "system", "content": system }));
            }

            if vision && entry.has_images() {
                let mut parts = Vec::with_capacity(entry.images.len() + 1);
                if let Some(caption) = entry.question_text() {
                    parts.push(json!({ "type": "text", "text": caption }));
                }
                for image in &entry.images {
                    let data = http::image_base64(image).await?;
                    parts.push(json!({
                        "type": "image_url",
                        "image_url": { "url": format!("data:{};base64,{data}", image.mime()) }
                    }));
                }
                messages.push(json!({ "role": "user", "content": parts }));
            } else if let Some(question) = entry.question_text() {
                messages.push(json!({ "role": "user", "content": question }));
            }

            if let Some(answer) = entry.answer_text() {
                messages.push(json!({ "role": "assistant", "content": answer }));
            }
        }

        Ok(messages)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            vision: self.vision.is_some(),
        }
    }

    async fn send(&self, entries: &[ConversationEntry]) -> Result<String, ProviderError> {
        let wants_vision = entries.iter().any(|e| e.has_images());
        let vision = self.vision.as_ref().filter(|_| wants_vision);

        if vision.is_none()
            && entries
                .last()
                .is_some_and(|e| e.has_images() && e.question_text().is_none())
        {
            return Err(ProviderError::Unsupported(
                "image turn without a vision model".into(),
            ));
        }

        let messages = Self::to_api_messages(entries, vision.is_some()).await?;
        let model = vision.map(|v| v.model.as_str()).unwrap_or(&self.model);

        let mut body = json!({
            "model": model,
            "messages": messages,
        });
        if let Some(v) = vision {
            body["max_tokens"] = json!(v.max_tokens);
        }

        debug!(provider = "openai", model, messages = entries.len(), "Sending completion request");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(http::send_error)?;
        let response = http::check_status("openai", response).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ProviderError::EmptyResponse)
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(http::send_error)?;

        Ok(response.status().is_success())
    }
}

// ── Wire types ──

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::message::ImageRef;

    #[tokio::test]
    async fn roles_follow_entry_parts() {
        let entries = vec![
            ConversationEntry::system("You are a helpful assistant. Your name is Chloe."),
            ConversationEntry::question("hi").answered("hello!"),
            ConversationEntry::question("how are you?"),
        ];
        let messages = OpenAiProvider::to_api_messages(&entries, false).await.unwrap();
        let roles: Vec<&str> = messages.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages[3]["content"], "how are you?");
    }

    #[tokio::test]
    async fn text_mode_drops_images_keeps_caption() {
        let entries = vec![
            ConversationEntry::image(vec![ImageRef::new("/nonexistent.jpg")], Some("a cat".into()))
                .answered("cute"),
            ConversationEntry::question("thanks"),
        ];
        let messages = OpenAiProvider::to_api_messages(&entries, false).await.unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["content"], "a cat");
    }

    #[tokio::test]
    async fn vision_mode_inlines_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pic.png");
        std::fs::write(&path, [0u8, 1, 2, 3]).unwrap();

        let entries = vec![ConversationEntry::image(
            vec![ImageRef::new(&path)],
            Some("what is it?".into()),
        )];
        let messages = OpenAiProvider::to_api_messages(&entries, true).await.unwrap();
        let parts = messages[0]["content"].as_array().unwrap();
        assert_eq!(parts[0]["text"], "what is it?");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AAECAw==");
    }

    #[tokio::test]
    async fn follow_up_uses_loaded_bytes_after_file_is_gone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, [0u8, 1, 2, 3]).unwrap();
        let image = ImageRef::new(&path).with_data(std::fs::read(&path).unwrap());
        std::fs::remove_file(&path).unwrap();

        let entries = vec![
            ConversationEntry::system("You are Chloe."),
            ConversationEntry::image(vec![image], Some("what is this?".into())).answered("a ball"),
            ConversationEntry::question("what colour is it?"),
        ];
        let messages = OpenAiProvider::to_api_messages(&entries, true).await.unwrap();
        let parts = messages[1]["content"].as_array().unwrap();
        assert_eq!(parts[1]["image_url"]["url"], "data:image/jpeg;base64,AAECAw==");
        assert_eq!(messages[2]["content"], "a ball");
        assert_eq!(messages[3]["content"], "what colour is it?");
    }

    #[tokio::test]
    async fn missing_image_is_unsupported() {
        let entries = vec![ConversationEntry::image(
            vec![ImageRef::new("/nonexistent/pic.jpg")],
            None,
        )];
        let err = OpenAiProvider::to_api_messages(&entries, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported(_)));
    }

    #[tokio::test]
    async fn image_only_turn_without_vision_fails_fast() {
        let provider = OpenAiProvider::new("http://127.0.0.1:9", "sk", "gpt-3.5-turbo");
        assert!(!provider.capabilities().vision);
        let entries = vec![ConversationEntry::image(
            vec![ImageRef::new("/tmp/x.jpg")],
            None,
        )];
        let err = provider.send(&entries).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn from_config_requires_key() {
        let config = OpenAiConfig::default();
        assert!(matches!(
            OpenAiProvider::from_config(&config),
            Err(ProviderError::NotConfigured(_))
        ));

        let mut config = OpenAiConfig::default();
        config.api_key = Some("sk-test".into());
        let provider = OpenAiProvider::from_config(&config).unwrap();
        assert!(provider.capabilities().vision);
    }
}
