//! Google Gemini provider (`generateContent`).
//!
//! Gemini has no system role, so the greeting becomes a short user/model
//! exchange that primes the bot's name. Consecutive entries with the same
//! role are merged because the API requires alternating turns.
//!
//! A window whose newest entry carries images goes to the vision model as a
//! single turn; that model does not accept conversation history.

use crate::http;
use async_trait::async_trait;
use parley_config::GeminiConfig;
use parley_core::error::ProviderError;
use parley_core::message::ConversationEntry;
use parley_core::provider::{Capabilities, Provider};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

pub struct GeminiProvider {
    base_url: String,
    api_key: String,
    model: String,
    vision_model: Option<String>,
    bot_name: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        bot_name: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            vision_model: None,
            bot_name: bot_name.into(),
            client: http::client(Duration::from_secs(60)),
        }
    }

    pub fn with_vision(mut self, model: impl Into<String>) -> Self {
        self.vision_model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http::client(timeout);
        self
    }

    /// Build from config. Fails when no API key is set.
    pub fn from_config(config: &GeminiConfig, bot_name: &str) -> Result<Self, ProviderError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured("gemini.api_key is not set".into()))?;

        let mut provider = Self::new(&config.api_url, api_key, &config.model, bot_name)
            .with_timeout(Duration::from_secs(config.request_timeout_secs));
        if !config.vision_model.is_empty() {
            provider = provider.with_vision(&config.vision_model);
        }
        Ok(provider)
    }

    fn greeting(&self) -> [Content; 2] {
        [
            Content::text("user", format!("I will call you as {}.", self.bot_name)),
            Content::text("model", format!("You can call me {}.", self.bot_name)),
        ]
    }

    /// Build `contents` for a text conversation. Image parts are dropped.
    fn text_contents(&self, entries: &[ConversationEntry]) -> Vec<Content> {
        let mut contents: Vec<Content> = Vec::with_capacity(entries.len() * 2 + 2);
        for entry in entries {
            if entry.system_text().is_some() {
                contents.extend(self.greeting());
            }
            if let Some(question) = entry.question_text() {
                push_merged(&mut contents, Content::text("user", question));
            }
            if let Some(answer) = entry.answer_text() {
                push_merged(&mut contents, Content::text("model", answer));
            }
        }
        contents
    }

    /// Build the single-turn `contents` for the vision model.
    async fn vision_contents(entry: &ConversationEntry) -> Result<Vec<Content>, ProviderError> {
        let mut parts = Vec::with_capacity(entry.images.len() + 1);
        if let Some(caption) = entry.question_text() {
            parts.push(Part::Text {
                text: caption.to_string(),
            });
        }
        for image in &entry.images {
            parts.push(Part::InlineData {
                inline_data: InlineData {
                    mime_type: image.mime().to_string(),
                    data: http::image_base64(image).await?,
                },
            });
        }
        Ok(vec![Content {
            role: "user".into(),
            parts,
        }])
    }

    async fn generate(&self, model: &str, contents: Vec<Content>) -> Result<String, ProviderError> {
        let body = GenerateRequest {
            contents,
            safety_settings: SAFETY_CATEGORIES
                .iter()
                .map(|c| SafetySetting {
                    category: c.to_string(),
                    threshold: "BLOCK_NONE".into(),
                })
                .collect(),
        };

        debug!(provider = "gemini", model, turns = body.contents.len(), "Sending generateContent request");

        let response = self
            .client
            .post(format!("{}/models/{model}:generateContent", self.base_url))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(http::send_error)?;
        let response = http::check_status("gemini", response).await?;

        let api_response: GenerateResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let text: String = api_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| match p {
                        Part::Text { text } => Some(text),
                        Part::InlineData { .. } => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(text)
    }
}

fn push_merged(contents: &mut Vec<Content>, next: Content) {
    match contents.last_mut() {
        Some(last) if last.role == next.role => last.parts.extend(next.parts),
        _ => contents.push(next),
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            vision: self.vision_model.is_some(),
        }
    }

    async fn send(&self, entries: &[ConversationEntry]) -> Result<String, ProviderError> {
        let latest = entries
            .last()
            .ok_or_else(|| ProviderError::Unsupported("empty context window".into()))?;

        if latest.has_images() {
            match &self.vision_model {
                Some(model) => {
                    let contents = Self::vision_contents(latest).await?;
                    return self.generate(model, contents).await;
                }
                None if latest.question_text().is_none() => {
                    return Err(ProviderError::Unsupported(
                        "image turn without a vision model".into(),
                    ));
                }
                None => {}
            }
        }

        let contents = self.text_contents(entries);
        self.generate(&self.model, contents).await
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(http::send_error)?;

        Ok(response.status().is_success())
    }
}

// ── Wire types ──

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

impl Content {
    fn text(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            parts: vec![Part::Text { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: String,
    threshold: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}
