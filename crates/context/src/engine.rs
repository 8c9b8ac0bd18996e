//! The conversation context engine.
//!
//! Keeps one [`ConversationState`] per chat and, for every new turn, builds a
//! window that fits the token budget: greeting first, then the longest
//! contiguous run of recent history that fits, then the new turn.
//!
//! # Expiry
//!
//! A chat whose last answer is older than its timeout starts over. The
//! shorter vision timeout applies while the retained history (or the new
//! turn) carries an image.
//!
//! # Locking
//!
//! All state sits behind one `std::sync::Mutex`. Every operation is
//! synchronous, so the guard is never held across an await point.

use crate::clock::{Clock, SystemClock};
use crate::token::TokenEstimator;
use chrono::{DateTime, Utc};
use parley_core::error::ContextError;
use parley_core::ids::ChatId;
use parley_core::message::{ConversationEntry, ImageRef};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

// ── Settings ──────────────────────────────────────────────────────────────

/// The identity priming text placed at the head of every window.
pub fn greeting_for(bot_name: &str) -> String {
    format!("You are a helpful assistant. Your name is {bot_name}.")
}

/// Per-engine tuning.
#[derive(Debug, Clone)]
pub struct ContextSettings {
    /// Token budget for one assembled window.
    pub budget: usize,
    /// Inactivity after which a text conversation is forgotten.
    pub text_timeout: Duration,
    /// Inactivity after which a conversation holding images is forgotten.
    pub vision_timeout: Duration,
    /// System prompt text for the greeting entry.
    pub greeting: String,
}

impl ContextSettings {
    pub fn new(bot_name: &str) -> Self {
        Self {
            budget: 1000,
            text_timeout: Duration::from_secs(120),
            vision_timeout: Duration::from_secs(60),
            greeting: greeting_for(bot_name),
        }
    }

    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_timeouts(mut self, text: Duration, vision: Duration) -> Self {
        self.text_timeout = text;
        self.vision_timeout = vision;
        self
    }
}

// ── State ─────────────────────────────────────────────────────────────────

/// Identifies the entry appended by one `prepare_turn` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(u64);

impl TurnId {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone)]
struct StoredEntry {
    turn: TurnId,
    entry: ConversationEntry,
}

/// One chat's remembered conversation.
#[derive(Debug)]
struct ConversationState {
    greeting: ConversationEntry,
    /// Oldest first. The greeting is not part of it.
    history: Vec<StoredEntry>,
    last_activity: Option<DateTime<Utc>>,
    has_pending_vision_turn: bool,
    next_turn: u64,
}

impl ConversationState {
    fn new(greeting: &str) -> Self {
        Self {
            greeting: ConversationEntry::system(greeting),
            history: Vec::new(),
            last_activity: None,
            has_pending_vision_turn: false,
            next_turn: 0,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match self.last_activity {
            Some(last) => (now - last).to_std().is_ok_and(|elapsed| elapsed > timeout),
            None => false,
        }
    }

    fn clear(&mut self) {
        self.history.clear();
        self.has_pending_vision_turn = false;
    }

    fn allocate_turn(&mut self) -> TurnId {
        let id = TurnId(self.next_turn);
        self.next_turn += 1;
        id
    }

    fn recompute_vision(&mut self) {
        self.has_pending_vision_turn = self.history.iter().any(|s| s.entry.has_images());
    }
}

/// The window assembled for one turn.
#[derive(Debug, Clone)]
pub struct PreparedTurn {
    /// Greeting first, chosen history oldest to newest, new turn last.
    pub entries: Vec<ConversationEntry>,
    /// The appended entry, for [`ContextEngine::record_answer_for`].
    pub turn: TurnId,
}

impl PreparedTurn {
    /// Whether any entry in the window carries an image.
    pub fn has_images(&self) -> bool {
        self.entries.iter().any(|e| e.has_images())
    }
}

// ── Engine ────────────────────────────────────────────────────────────────

pub struct ContextEngine {
    settings: ContextSettings,
    estimator: Arc<dyn TokenEstimator>,
    clock: Arc<dyn Clock>,
    chats: Mutex<HashMap<ChatId, ConversationState>>,
}

impl ContextEngine {
    pub fn new(settings: ContextSettings, estimator: Arc<dyn TokenEstimator>) -> Self {
        Self::with_clock(settings, estimator, Arc::new(SystemClock))
    }

    pub fn with_clock(
        settings: ContextSettings,
        estimator: Arc<dyn TokenEstimator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            estimator,
            clock,
            chats: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    /// Assemble the window for a new turn and remember the turn.
    ///
    /// `text` may be absent or blank only when `images` is non-empty; it is
    /// then used as the caption. The stored history is trimmed to what the
    /// window kept plus the new entry.
    pub fn prepare_turn(
        &self,
        chat: &ChatId,
        text: Option<&str>,
        images: Vec<ImageRef>,
    ) -> Result<PreparedTurn, ContextError> {
        let text = text.filter(|t| !t.trim().is_empty());
        let new_entry = match (text, images.is_empty()) {
            (None, true) => return Err(ContextError::EmptyTurn),
            (Some(t), true) => ConversationEntry::question(t),
            (caption, false) => ConversationEntry::image(images, caption.map(String::from)),
        };

        let now = self.clock.now();
        let budget = self.settings.budget;
        let mut chats = self.lock();
        let state = chats
            .entry(chat.clone())
            .or_insert_with(|| ConversationState::new(&self.settings.greeting));

        let timeout = if state.has_pending_vision_turn || new_entry.has_images() {
            self.settings.vision_timeout
        } else {
            self.settings.text_timeout
        };
        if state.is_expired(now, timeout) {
            tracing::debug!(chat = %chat, "Conversation expired, starting over");
            state.clear();
        }

        let required =
            self.estimator.entry_cost(&state.greeting) + self.estimator.entry_cost(&new_entry);
        if required > budget {
            return Err(ContextError::BudgetExceeded { required, budget });
        }

        let mut total = required;
        let mut kept = 0;
        for stored in state.history.iter().rev() {
            let cost = self.estimator.entry_cost(&stored.entry);
            if total + cost > budget {
                break;
            }
            total += cost;
            kept += 1;
        }

        let dropped = state.history.len() - kept;
        state.history.drain(..dropped);
        let turn = state.allocate_turn();
        state.history.push(StoredEntry {
            turn,
            entry: new_entry,
        });
        state.recompute_vision();

        let mut entries = Vec::with_capacity(state.history.len() + 1);
        entries.push(state.greeting.clone());
        entries.extend(state.history.iter().map(|s| s.entry.clone()));

        tracing::debug!(
            chat = %chat,
            tokens = total,
            budget,
            history = kept,
            dropped,
            "Context window assembled"
        );

        Ok(PreparedTurn { entries, turn })
    }

    /// Store the answer on the chat's most recent entry and stamp activity.
    ///
    /// Calling it twice overwrites. Returns false if the chat has no entries.
    pub fn record_answer(&self, chat: &ChatId, answer: &str) -> bool {
        let now = self.clock.now();
        let mut chats = self.lock();
        let Some(state) = chats.get_mut(chat) else {
            return false;
        };
        state.last_activity = Some(now);
        match state.history.last_mut() {
            Some(stored) => {
                stored.entry.answer = Some(answer.to_string());
                true
            }
            None => false,
        }
    }

    /// Store the answer on the entry created by a specific turn.
    ///
    /// If that entry has already left the history (another turn in the same
    /// chat pushed it out), only the activity stamp is updated.
    pub fn record_answer_for(&self, chat: &ChatId, turn: TurnId, answer: &str) -> bool {
        let now = self.clock.now();
        let mut chats = self.lock();
        let Some(state) = chats.get_mut(chat) else {
            return false;
        };
        state.last_activity = Some(now);
        match state.history.iter_mut().find(|s| s.turn == turn) {
            Some(stored) => {
                stored.entry.answer = Some(answer.to_string());
                true
            }
            None => {
                tracing::debug!(chat = %chat, turn = turn.value(), "Answered turn already evicted");
                false
            }
        }
    }

    /// Forget a chat's history.
    pub fn reset(&self, chat: &ChatId) {
        if let Some(state) = self.lock().get_mut(chat) {
            state.clear();
            state.last_activity = None;
        }
    }

    /// Number of stored history entries for a chat (greeting excluded).
    pub fn history_len(&self, chat: &ChatId) -> usize {
        self.lock().get(chat).map(|s| s.history.len()).unwrap_or(0)
    }

    /// Number of chats with state.
    pub fn chat_count(&self) -> usize {
        self.lock().len()
    }

    /// When the chat last received an answer.
    pub fn last_activity(&self, chat: &ChatId) -> Option<DateTime<Utc>> {
        self.lock().get(chat).and_then(|s| s.last_activity)
    }

    /// Whether the chat's retained history holds an image.
    pub fn has_pending_vision_turn(&self, chat: &ChatId) -> bool {
        self.lock()
            .get(chat)
            .is_some_and(|s| s.has_pending_vision_turn)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ChatId, ConversationState>> {
        self.chats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::token::HeuristicEstimator;

    /// Counts every character of text as one token, so costs are easy to set.
    struct CharEstimator;

    impl TokenEstimator for CharEstimator {
        fn count(&self, text: &str) -> usize {
            text.chars().count()
        }

        fn image_cost(&self) -> usize {
            10
        }
    }

    fn text(n: usize) -> String {
        "x".repeat(n)
    }

    fn engine_with(budget: usize, greeting_len: usize) -> (ContextEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let mut settings = ContextSettings::new("Bot").with_budget(budget);
        settings.greeting = text(greeting_len);
        let engine = ContextEngine::with_clock(settings, Arc::new(CharEstimator), clock.clone());
        (engine, clock)
    }

    fn chat() -> ChatId {
        ChatId::from("tg-1")
    }

    #[test]
    fn first_turn_is_greeting_plus_question() {
        let engine = ContextEngine::new(
            ContextSettings::new("Chloe"),
            Arc::new(HeuristicEstimator::new()),
        );
        let turn = engine.prepare_turn(&chat(), Some("hi"), vec![]).unwrap();
        assert_eq!(turn.entries.len(), 2);
        assert_eq!(
            turn.entries[0].system_text(),
            Some("You are a helpful assistant. Your name is Chloe.")
        );
        assert_eq!(turn.entries[1].question_text(), Some("hi"));
        assert_eq!(engine.history_len(&chat()), 1);
        assert!(engine.last_activity(&chat()).is_none());
    }

    #[test]
    fn window_keeps_newest_suffix_that_fits() {
        // budget 1000, greeting 20, new turn 50, history 300 / 400 / 500
        let (engine, _clock) = engine_with(1000, 20);
        let c = chat();
        for n in [300, 400, 500] {
            engine.prepare_turn(&c, Some(&text(n)), vec![]).unwrap();
        }

        let turn = engine.prepare_turn(&c, Some(&text(50)), vec![]).unwrap();
        let sizes: Vec<usize> = turn
            .entries
            .iter()
            .map(|e| {
                e.question_text()
                    .or(e.system_text())
                    .map(|t| t.len())
                    .unwrap_or(0)
            })
            .collect();
        assert_eq!(sizes, vec![20, 400, 500, 50]);
        assert_eq!(engine.history_len(&c), 3);
    }

    #[test]
    fn window_never_exceeds_budget() {
        let (engine, _clock) = engine_with(200, 10);
        let c = chat();
        for n in [30, 90, 20, 60, 40, 70, 10] {
            let turn = engine.prepare_turn(&c, Some(&text(n)), vec![]).unwrap();
            let total: usize = turn.entries.iter().map(|e| CharEstimator.entry_cost(e)).sum();
            assert!(total <= 200, "window of {total} tokens");
            engine.record_answer(&c, "ok");
        }
    }

    #[test]
    fn answers_count_against_budget() {
        let (engine, _clock) = engine_with(100, 0);
        let c = chat();
        engine.prepare_turn(&c, Some(&text(30)), vec![]).unwrap();
        engine.record_answer(&c, &text(30));

        // 30 + 30 history + 50 new > 100, so the old exchange is dropped
        let turn = engine.prepare_turn(&c, Some(&text(50)), vec![]).unwrap();
        assert_eq!(turn.entries.len(), 2);
    }

    #[test]
    fn blank_turn_is_rejected_without_state_change() {
        let (engine, _clock) = engine_with(100, 5);
        assert_eq!(
            engine.prepare_turn(&chat(), Some("  "), vec![]).unwrap_err(),
            ContextError::EmptyTurn
        );
        assert_eq!(
            engine.prepare_turn(&chat(), None, vec![]).unwrap_err(),
            ContextError::EmptyTurn
        );
        assert_eq!(engine.chat_count(), 0);
    }

    #[test]
    fn oversized_turn_is_rejected_and_not_stored() {
        let (engine, _clock) = engine_with(100, 20);
        let err = engine
            .prepare_turn(&chat(), Some(&text(90)), vec![])
            .unwrap_err();
        assert_eq!(
            err,
            ContextError::BudgetExceeded {
                required: 110,
                budget: 100
            }
        );
        assert_eq!(engine.history_len(&chat()), 0);
    }

    #[test]
    fn image_turn_uses_text_as_caption() {
        let (engine, _clock) = engine_with(1000, 5);
        let turn = engine
            .prepare_turn(
                &chat(),
                Some("what is this?"),
                vec![ImageRef::new("/tmp/cat.jpg")],
            )
            .unwrap();
        let last = turn.entries.last().unwrap();
        assert!(last.has_images());
        assert_eq!(last.question_text(), Some("what is this?"));
        assert!(turn.has_images());
        assert!(engine.has_pending_vision_turn(&chat()));
    }

    #[test]
    fn history_resets_after_text_timeout() {
        let (engine, clock) = engine_with(1000, 5);
        let c = chat();
        engine.prepare_turn(&c, Some("first"), vec![]).unwrap();
        engine.record_answer(&c, "one");

        clock.advance(Duration::from_secs(119));
        let turn = engine.prepare_turn(&c, Some("second"), vec![]).unwrap();
        assert_eq!(turn.entries.len(), 3);
        engine.record_answer(&c, "two");

        clock.advance(Duration::from_secs(121));
        let turn = engine.prepare_turn(&c, Some("third"), vec![]).unwrap();
        assert_eq!(turn.entries.len(), 2);
        assert_eq!(turn.entries[1].question_text(), Some("third"));
    }

    #[test]
    fn vision_history_uses_shorter_timeout() {
        let (engine, clock) = engine_with(1000, 5);
        let c = chat();
        engine
            .prepare_turn(&c, None, vec![ImageRef::new("/tmp/a.png")])
            .unwrap();
        engine.record_answer(&c, "a cat");

        clock.advance(Duration::from_secs(61));
        let turn = engine.prepare_turn(&c, Some("and now?"), vec![]).unwrap();
        assert_eq!(turn.entries.len(), 2);
        assert!(!engine.has_pending_vision_turn(&c));
    }

    #[test]
    fn incoming_image_uses_vision_timeout() {
        let (engine, clock) = engine_with(1000, 5);
        let c = chat();
        engine.prepare_turn(&c, Some("hello"), vec![]).unwrap();
        engine.record_answer(&c, "hi");

        clock.advance(Duration::from_secs(90));
        let turn = engine
            .prepare_turn(&c, None, vec![ImageRef::new("/tmp/b.jpg")])
            .unwrap();
        assert_eq!(turn.entries.len(), 2);
    }

    #[test]
    fn unanswered_state_never_expires() {
        let (engine, clock) = engine_with(1000, 5);
        let c = chat();
        engine.prepare_turn(&c, Some("first"), vec![]).unwrap();
        clock.advance(Duration::from_secs(10_000));
        let turn = engine.prepare_turn(&c, Some("second"), vec![]).unwrap();
        assert_eq!(turn.entries.len(), 3);
    }

    #[test]
    fn record_answer_overwrites_latest() {
        let (engine, clock) = engine_with(1000, 5);
        let c = chat();
        engine.prepare_turn(&c, Some("q"), vec![]).unwrap();
        assert!(engine.record_answer(&c, "first"));
        let first_stamp = engine.last_activity(&c).unwrap();

        clock.advance(Duration::from_secs(5));
        assert!(engine.record_answer(&c, "second"));
        assert!(engine.last_activity(&c).unwrap() > first_stamp);

        let turn = engine.prepare_turn(&c, Some("next"), vec![]).unwrap();
        assert_eq!(turn.entries[1].answer_text(), Some("second"));
    }

    #[test]
    fn record_answer_on_unknown_chat_is_noop() {
        let (engine, _clock) = engine_with(1000, 5);
        assert!(!engine.record_answer(&chat(), "orphan"));
        assert_eq!(engine.chat_count(), 0);
    }

    #[test]
    fn record_answer_for_targets_specific_turn() {
        let (engine, _clock) = engine_with(1000, 5);
        let c = chat();
        let alice = engine.prepare_turn(&c, Some("from alice"), vec![]).unwrap();
        let bob = engine.prepare_turn(&c, Some("from bob"), vec![]).unwrap();

        assert!(engine.record_answer_for(&c, alice.turn, "to alice"));
        assert!(engine.record_answer_for(&c, bob.turn, "to bob"));

        let next = engine.prepare_turn(&c, Some("next"), vec![]).unwrap();
        assert_eq!(next.entries[1].answer_text(), Some("to alice"));
        assert_eq!(next.entries[2].answer_text(), Some("to bob"));
    }

    #[test]
    fn record_answer_for_evicted_turn_only_stamps() {
        let (engine, _clock) = engine_with(100, 0);
        let c = chat();
        let old = engine.prepare_turn(&c, Some(&text(60)), vec![]).unwrap();
        engine.prepare_turn(&c, Some(&text(60)), vec![]).unwrap();

        assert!(!engine.record_answer_for(&c, old.turn, "late"));
        assert!(engine.last_activity(&c).is_some());
        assert_eq!(engine.history_len(&c), 1);
    }

    #[test]
    fn chats_are_independent() {
        let (engine, _clock) = engine_with(1000, 5);
        engine
            .prepare_turn(&ChatId::from("tg-1"), Some("a"), vec![])
            .unwrap();
        engine
            .prepare_turn(&ChatId::from("tg-2"), Some("b"), vec![])
            .unwrap();
        assert_eq!(engine.chat_count(), 2);
        assert_eq!(engine.history_len(&ChatId::from("tg-1")), 1);

        engine.reset(&ChatId::from("tg-1"));
        assert_eq!(engine.history_len(&ChatId::from("tg-1")), 0);
        assert_eq!(engine.history_len(&ChatId::from("tg-2")), 1);
    }
}
