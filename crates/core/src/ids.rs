//! Opaque identifiers for chats, users and messages.
//!
//! Identifiers are strings namespaced by the messaging surface that produced
//! them (e.g. `tg-12345` for Telegram), so two surfaces never collide.

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifies one conversation (a private chat or a group).
    ChatId
);
string_id!(
    /// Identifies a user on a messaging surface.
    UserId
);
string_id!(
    /// Identifies a single inbound message, used for threaded replies.
    MessageId
);

/// Build a namespaced identifier from a surface prefix and a raw id.
pub fn namespaced(prefix: &str, raw: impl std::fmt::Display) -> String {
    format!("{prefix}-{raw}")
}

/// Strip a surface prefix, returning the raw id if the prefix matches.
pub fn strip_namespace<'a>(prefix: &str, id: &'a str) -> Option<&'a str> {
    id.strip_prefix(prefix)?.strip_prefix('-')
}
