//! Token estimation.
//!
//! Two estimators are available: a character heuristic (~4 characters per
//! token, rounded up) and a BPE count via `tiktoken-rs` for OpenAI models.
//! The engine only needs a consistent estimate, not an exact one.

use parley_core::message::ConversationEntry;
use tiktoken_rs::CoreBPE;

/// Flat cost charged for every attached image.
pub const DEFAULT_IMAGE_COST: usize = 85;

/// Counts tokens for budgeting the context window.
pub trait TokenEstimator: Send + Sync {
    /// Estimated tokens in `text`. Blank text costs nothing.
    fn count(&self, text: &str) -> usize;

    /// Tokens charged per image.
    fn image_cost(&self) -> usize {
        DEFAULT_IMAGE_COST
    }

    /// Cost of one entry: question + answer + system text + images.
    fn entry_cost(&self, entry: &ConversationEntry) -> usize {
        let text = |s: Option<&str>| s.map(|t| self.count(t)).unwrap_or(0);
        text(entry.question_text())
            + text(entry.answer_text())
            + text(entry.system_text())
            + self.image_cost() * entry.images.len()
    }
}

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.trim().is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// The 4-characters-per-token heuristic.
#[derive(Debug, Clone)]
pub struct HeuristicEstimator {
    image_cost: usize,
}

impl HeuristicEstimator {
    pub fn new() -> Self {
        Self {
            image_cost: DEFAULT_IMAGE_COST,
        }
    }

    pub fn with_image_cost(mut self, cost: usize) -> Self {
        self.image_cost = cost;
        self
    }
}

impl Default for HeuristicEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenEstimator for HeuristicEstimator {
    fn count(&self, text: &str) -> usize {
        estimate_tokens(text)
    }

    fn image_cost(&self) -> usize {
        self.image_cost
    }
}

/// BPE-based estimator for OpenAI chat models.
pub struct TiktokenEstimator {
    bpe: CoreBPE,
    image_cost: usize,
}

impl TiktokenEstimator {
    /// Load the encoding for `model`, falling back to `cl100k_base` for
    /// models tiktoken does not know. Returns `None` if neither loads.
    pub fn for_model(model: &str) -> Option<Self> {
        let bpe = match tiktoken_rs::get_bpe_from_model(model) {
            Ok(bpe) => bpe,
            Err(e) => {
                tracing::debug!(model, error = %e, "Unknown model for tiktoken, using cl100k_base");
                match tiktoken_rs::cl100k_base() {
                    Ok(bpe) => bpe,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to load cl100k_base encoding");
                        return None;
                    }
                }
            }
        };
        Some(Self {
            bpe,
            image_cost: DEFAULT_IMAGE_COST,
        })
    }

    pub fn with_image_cost(mut self, cost: usize) -> Self {
        self.image_cost = cost;
        self
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn count(&self, text: &str) -> usize {
        if text.trim().is_empty() {
            return 0;
        }
        self.bpe.encode_with_special_tokens(text).len()
    }

    fn image_cost(&self) -> usize {
        self.image_cost
    }
}

impl std::fmt::Debug for TiktokenEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenEstimator")
            .field("image_cost", &self.image_cost)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::message::ImageRef;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("   "), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(estimate_tokens("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn entry_cost_sums_all_parts() {
        let est = HeuristicEstimator::new().with_image_cost(10);
        let entry = ConversationEntry {
            question: Some("abcd".into()),
            answer: Some("abcdefgh".into()),
            system: Some("abcd".into()),
            images: vec![ImageRef::new("/tmp/a.jpg"), ImageRef::new("/tmp/b.jpg")],
        };
        // 1 + 2 + 1 + 2 * 10
        assert_eq!(est.entry_cost(&entry), 24);
    }

    #[test]
    fn tiktoken_counts_words() {
        let est = TiktokenEstimator::for_model("gpt-3.5-turbo").unwrap();
        let tokens = est.count("Hello, world! This is a test.");
        assert!(tokens > 0);
        assert!(tokens < 20);
        assert_eq!(est.count(""), 0);
    }

    #[test]
    fn tiktoken_unknown_model_falls_back() {
        assert!(TiktokenEstimator::for_model("not-a-real-model").is_some());
    }
}
