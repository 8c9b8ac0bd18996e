//! # Parley Context
//!
//! The conversation context engine: per-chat history, token-bounded window
//! assembly and inactivity expiry.
//!
//! ```text
//! prepare_turn ─▶ [greeting, history..., new turn] ─▶ provider
//!                                                        │
//! record_answer ◀────────────── answer ◀─────────────────┘
//! ```

pub mod clock;
pub mod engine;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{ContextEngine, ContextSettings, PreparedTurn, TurnId, greeting_for};
pub use token::{HeuristicEstimator, TiktokenEstimator, TokenEstimator};
