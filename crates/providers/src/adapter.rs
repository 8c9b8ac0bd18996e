//! The provider adapter: one call site for "ask the model", with bounded
//! retry and a fallback reply that is never mistaken for an answer.

use crate::retry::{RetryOutcome, RetryPolicy};
use parley_core::error::ProviderError;
use parley_core::message::ConversationEntry;
use parley_core::provider::Provider;
use std::sync::Arc;
use tracing::{info, warn};

/// Text sent to the user when the provider could not answer.
pub const DEFAULT_FALLBACK_MESSAGE: &str = "I apologize, but the AI service is currently experiencing high traffic. Kindly try again at a later time.";

/// Result of asking the provider.
#[derive(Debug, Clone)]
pub enum Reply {
    /// A real answer. Safe to record into history.
    Answered(String),
    /// A canned apology. Must not be recorded.
    Fallback { message: String, cause: ProviderError },
}

impl Reply {
    /// The text to deliver to the user, whichever kind of reply this is.
    pub fn text(&self) -> &str {
        match self {
            Self::Answered(text) => text,
            Self::Fallback { message, .. } => message,
        }
    }

    pub fn is_answer(&self) -> bool {
        matches!(self, Self::Answered(_))
    }
}

pub struct ProviderAdapter {
    provider: Arc<dyn Provider>,
    policy: RetryPolicy,
    fallback_message: String,
}

impl ProviderAdapter {
    pub fn new(provider: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self {
            provider,
            policy,
            fallback_message: DEFAULT_FALLBACK_MESSAGE.into(),
        }
    }

    pub fn with_fallback_message(mut self, message: impl Into<String>) -> Self {
        self.fallback_message = message.into();
        self
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Send the window, retrying transient failures.
    pub async fn send(&self, entries: &[ConversationEntry]) -> Reply {
        let provider = self.provider.as_ref();
        let outcome = self
            .policy
            .run(
                |attempt| async move {
                    tracing::debug!(provider = provider.name(), attempt, "Calling provider");
                    let answer = provider.send(entries).await?;
                    if answer.trim().is_empty() {
                        return Err(ProviderError::EmptyResponse);
                    }
                    Ok(answer)
                },
                ProviderError::is_transient,
            )
            .await;

        match outcome {
            RetryOutcome::Success(answer) => {
                info!(provider = provider.name(), "Provider answered");
                Reply::Answered(answer)
            }
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                warn!(provider = provider.name(), attempts, error = %last_error, "Provider unavailable, sending fallback");
                self.fallback(last_error)
            }
            RetryOutcome::NonRetryable(e) => {
                warn!(provider = provider.name(), error = %e, "Provider rejected request, sending fallback");
                self.fallback(e)
            }
        }
    }

    fn fallback(&self, cause: ProviderError) -> Reply {
        Reply::Fallback {
            message: self.fallback_message.clone(),
            cause,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Plays back a fixed list of results, one per call.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<String, ProviderError>>>,
        call_count: Mutex<usize>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<String, ProviderError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                call_count: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(&self, _entries: &[ConversationEntry]) -> Result<String, ProviderError> {
            *self.call_count.lock().unwrap() += 1;
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ProviderError::EmptyResponse))
        }
    }

    fn window() -> Vec<ConversationEntry> {
        vec![
            ConversationEntry::system("You are a helpful assistant."),
            ConversationEntry::question("hi"),
        ]
    }

    #[tokio::test]
    async fn two_timeouts_then_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Timeout("slow".into())),
            Err(ProviderError::Timeout("slow".into())),
            Ok("hello".into()),
        ]));
        let adapter = ProviderAdapter::new(provider.clone(), RetryPolicy::new(3));

        let reply = adapter.send(&window()).await;
        assert!(matches!(&reply, Reply::Answered(a) if a == "hello"));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_give_fallback() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::Network("reset".into())),
            Err(ProviderError::Network("reset".into())),
            Err(ProviderError::Network("reset".into())),
            Ok("too late".into()),
        ]));
        let adapter = ProviderAdapter::new(provider.clone(), RetryPolicy::new(3))
            .with_fallback_message("busy");

        let reply = adapter.send(&window()).await;
        assert!(!reply.is_answer());
        assert_eq!(reply.text(), "busy");
        assert!(matches!(
            reply,
            Reply::Fallback {
                cause: ProviderError::Network(_),
                ..
            }
        ));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::AuthenticationFailed("bad key".into())),
            Ok("never".into()),
        ]));
        let adapter = ProviderAdapter::new(provider.clone(), RetryPolicy::new(3));

        let reply = adapter.send(&window()).await;
        assert_eq!(reply.text(), DEFAULT_FALLBACK_MESSAGE);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn blank_answer_counts_as_transient() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok("   ".into()),
            Ok("real".into()),
        ]));
        let adapter = ProviderAdapter::new(provider.clone(), RetryPolicy::new(3));

        let reply = adapter.send(&window()).await;
        assert_eq!(reply.text(), "real");
        assert!(reply.is_answer());
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn server_errors_retry_client_errors_do_not() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(ProviderError::ApiError {
                status_code: 503,
                message: "unavailable".into(),
            }),
            Err(ProviderError::ApiError {
                status_code: 400,
                message: "bad request".into(),
            }),
            Ok("unreached".into()),
        ]));
        let adapter = ProviderAdapter::new(provider.clone(), RetryPolicy::new(5));

        let reply = adapter.send(&window()).await;
        assert!(matches!(
            reply,
            Reply::Fallback {
                cause: ProviderError::ApiError {
                    status_code: 400,
                    ..
                },
                ..
            }
        ));
        assert_eq!(provider.calls(), 2);
    }
}
