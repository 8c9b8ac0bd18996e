//! Per-message lifecycle stages and final outcomes.

use parley_core::ids::MessageId;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    AdmissionPending,
    Admitted,
    ContextAssembled,
    ProviderCalled,
    Replied,
    Rejected,
    Failed,
    Cleaned,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::AdmissionPending => "admission_pending",
            Self::Admitted => "admitted",
            Self::ContextAssembled => "context_assembled",
            Self::ProviderCalled => "provider_called",
            Self::Replied => "replied",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
            Self::Cleaned => "cleaned",
        };
        f.write_str(name)
    }
}

/// Records the stage a message is in and traces each transition.
#[derive(Debug)]
pub(crate) struct StageTracker {
    message: MessageId,
    current: Stage,
}

impl StageTracker {
    pub(crate) fn new(message: &MessageId) -> Self {
        debug!(message = %message, stage = %Stage::Received, "Message stage");
        Self {
            message: message.clone(),
            current: Stage::Received,
        }
    }

    pub(crate) fn enter(&mut self, next: Stage) {
        debug!(message = %self.message, from = %self.current, stage = %next, "Message stage");
        self.current = next;
    }

    pub(crate) fn current(&self) -> Stage {
        self.current
    }
}

/// How a message ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A reply was delivered. `answered` is false when it was the fallback.
    Replied { answered: bool },
    /// Access denied; the notice was sent.
    Rejected,
    /// Nothing to do: draw request, group message without a mention, or no content.
    Ignored,
    /// Not processable: missing user or chat, or unknown channel.
    Skipped,
    /// Context, admission or delivery failed.
    Failed(String),
}

impl Outcome {
    pub fn is_replied(&self) -> bool {
        matches!(self, Self::Replied { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_follows_transitions() {
        let mut tracker = StageTracker::new(&MessageId::from("m1"));
        assert_eq!(tracker.current(), Stage::Received);
        tracker.enter(Stage::AdmissionPending);
        tracker.enter(Stage::Admitted);
        assert_eq!(tracker.current(), Stage::Admitted);
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::ContextAssembled.to_string(), "context_assembled");
        assert_eq!(Stage::Cleaned.to_string(), "cleaned");
    }

    #[test]
    fn fallback_still_counts_as_replied() {
        assert!(Outcome::Replied { answered: false }.is_replied());
        assert!(!Outcome::Ignored.is_replied());
    }
}
