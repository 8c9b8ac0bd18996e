//! Provider selection: builds the configured chat provider together with
//! the token estimator and context settings that match it.

use crate::adapter::ProviderAdapter;
use crate::gemini::GeminiProvider;
use crate::openai::OpenAiProvider;
use crate::retry::RetryPolicy;
use crate::speech::{FfmpegTranscoder, OpenAiSpeechToText, OpenAiTextToSpeech, SpeechServices};
use parley_config::AppConfig;
use parley_context::{ContextSettings, HeuristicEstimator, TiktokenEstimator, TokenEstimator};
use parley_core::error::ProviderError;
use parley_core::provider::Provider;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Everything the engine and the adapter need from the provider choice.
pub struct ProviderSetup {
    pub provider: Arc<dyn Provider>,
    pub estimator: Arc<dyn TokenEstimator>,
    pub context: ContextSettings,
}

/// Build the chat provider selected by `system.use_gemini`.
pub fn build_from_config(config: &AppConfig) -> Result<ProviderSetup, ProviderError> {
    let image_cost = config.context.image_token_cost;
    let settings = ContextSettings::new(&config.bot_name).with_budget(config.context.token_budget);

    if config.system.use_gemini {
        let gemini = &config.gemini;
        let provider = GeminiProvider::from_config(gemini, &config.bot_name)?;
        info!(model = %gemini.model, vision = %gemini.vision_model, "Using Gemini provider");
        return Ok(ProviderSetup {
            provider: Arc::new(provider),
            estimator: Arc::new(HeuristicEstimator::new().with_image_cost(image_cost)),
            context: settings.with_timeouts(
                Duration::from_secs(gemini.context_timeout_secs),
                Duration::from_secs(gemini.vision_context_timeout_secs),
            ),
        });
    }

    let openai = &config.openai;
    let provider = OpenAiProvider::from_config(openai)?;
    info!(model = %openai.model, vision = %openai.vision_model, "Using OpenAI provider");

    let estimator: Arc<dyn TokenEstimator> = if config.context.use_tiktoken {
        match TiktokenEstimator::for_model(&openai.model) {
            Some(est) => Arc::new(est.with_image_cost(image_cost)),
            None => {
                warn!("tiktoken unavailable, counting tokens heuristically");
                Arc::new(HeuristicEstimator::new().with_image_cost(image_cost))
            }
        }
    } else {
        Arc::new(HeuristicEstimator::new().with_image_cost(image_cost))
    };

    Ok(ProviderSetup {
        provider: Arc::new(provider),
        estimator,
        context: settings.with_timeouts(
            Duration::from_secs(openai.context_timeout_secs),
            Duration::from_secs(openai.vision_context_timeout_secs),
        ),
    })
}

/// Wrap a provider in the retrying adapter configured under `[dispatch]`.
pub fn build_adapter(config: &AppConfig, provider: Arc<dyn Provider>) -> ProviderAdapter {
    ProviderAdapter::new(provider, RetryPolicy::new(config.dispatch.retry_attempts))
        .with_fallback_message(&config.dispatch.fallback_message)
}

/// Build the speech stack. Speech always runs on OpenAI, whichever chat
/// provider is selected, so it needs `openai.api_key`.
pub fn build_speech(config: &AppConfig) -> Result<SpeechServices, ProviderError> {
    let api_key = config.openai.api_key.clone().ok_or_else(|| {
        ProviderError::NotConfigured("openai.api_key is required for speech".into())
    })?;
    let base_url = &config.openai.api_url;
    let speech = &config.speech;

    Ok(SpeechServices {
        stt: Arc::new(
            OpenAiSpeechToText::new(api_key.clone(), &speech.stt_model).with_base_url(base_url),
        ),
        tts: Arc::new(
            OpenAiTextToSpeech::new(api_key, &speech.tts_model, &speech.tts_voice)
                .with_base_url(base_url),
        ),
        transcoder: Arc::new(FfmpegTranscoder::new(&speech.ffmpeg_path)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_is_default_and_needs_key() {
        let mut config = AppConfig::default();
        assert!(matches!(
            build_from_config(&config),
            Err(ProviderError::NotConfigured(_))
        ));

        config.openai.api_key = Some("sk-test".into());
        config.context.use_tiktoken = false;
        let setup = build_from_config(&config).unwrap();
        assert_eq!(setup.provider.name(), "openai");
        assert_eq!(setup.context.budget, 1000);
        assert_eq!(setup.context.text_timeout, Duration::from_secs(120));
        assert_eq!(setup.context.vision_timeout, Duration::from_secs(60));
        assert_eq!(setup.estimator.count("abcdefgh"), 2);
    }

    #[test]
    fn gemini_selected_by_flag() {
        let mut config = AppConfig::default();
        config.system.use_gemini = true;
        config.gemini.api_key = Some("gm".into());
        let setup = build_from_config(&config).unwrap();
        assert_eq!(setup.provider.name(), "gemini");
        assert!(setup.provider.capabilities().vision);
        assert_eq!(setup.context.text_timeout, Duration::from_secs(600));
    }

    #[test]
    fn speech_needs_openai_key() {
        let mut config = AppConfig::default();
        assert!(build_speech(&config).is_err());
        config.openai.api_key = Some("sk".into());
        assert!(build_speech(&config).is_ok());
    }
}
