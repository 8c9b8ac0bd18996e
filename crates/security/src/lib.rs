//! Access control for Parley.
//!
//! Provides:
//! - **Acl**: per-user and per-chat allow/deny tables with an `allow_all` default
//! - **access_policy**: picks the list or allow-all based on the whitelist switch

pub mod acl;

pub use acl::{AccessDecision, Acl, access_policy};
