//! # Parley Dispatch
//!
//! Admission control and the per-message pipeline.
//!
//! ```text
//! channels ─▶ merged stream ─▶ workers ─▶ admit(user) ─▶ ACL ─▶ speech
//!                                              │
//!            reply ◀── adapter ◀── context ◀───┘
//! ```

pub mod admission;
pub mod dispatcher;
pub mod stage;

pub use admission::{Admission, AdmissionClosed, AdmissionGuard};
pub use dispatcher::{ACCESS_DENIED_NOTICE, Dispatcher, DrawRequest, draw_request, strip_mention};
pub use stage::{Outcome, Stage};
