//! Access list evaluation.
//!
//! Every user or chat id maps to an explicit allow/deny. Ids that are not
//! listed fall back to the `allow_all` entry of their table, and to deny
//! when that entry is absent too.

use parley_config::{ALLOW_ALL_KEY, AclConfig};
use parley_core::access::{AccessControl, AllowAll};
use parley_core::ids::{ChatId, UserId};
use std::collections::HashMap;
use std::sync::Arc;

/// Result of checking a message origin against the access list.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessDecision {
    /// The user is allowed directly.
    UserAllowed,
    /// The user is not, but the chat is.
    ChatAllowed,
    /// Neither is allowed.
    Denied { user: UserId, chat: ChatId },
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Denied { .. })
    }
}

/// Access list built from `acl.toml`.
#[derive(Debug, Clone, Default)]
pub struct Acl {
    users: HashMap<String, bool>,
    chats: HashMap<String, bool>,
}

impl Acl {
    pub fn from_config(config: &AclConfig) -> Self {
        Self {
            users: config.allowed_user_id.clone(),
            chats: config.allowed_chat_id.clone(),
        }
    }

    /// Explicitly allow or deny a user.
    pub fn set_user(mut self, id: impl Into<String>, allow: bool) -> Self {
        self.users.insert(id.into(), allow);
        self
    }

    /// Explicitly allow or deny a chat.
    pub fn set_chat(mut self, id: impl Into<String>, allow: bool) -> Self {
        self.chats.insert(id.into(), allow);
        self
    }

    /// Check the user first, then the chat.
    pub fn check(&self, user: &UserId, chat: &ChatId) -> AccessDecision {
        if self.allow_user(user) {
            AccessDecision::UserAllowed
        } else if self.allow_chat(chat) {
            AccessDecision::ChatAllowed
        } else {
            AccessDecision::Denied {
                user: user.clone(),
                chat: chat.clone(),
            }
        }
    }
}

fn lookup(table: &HashMap<String, bool>, id: &str) -> bool {
    table
        .get(id)
        .or_else(|| table.get(ALLOW_ALL_KEY))
        .copied()
        .unwrap_or(false)
}

impl AccessControl for Acl {
    fn allow_user(&self, user: &UserId) -> bool {
        lookup(&self.users, user.as_str())
    }

    fn allow_chat(&self, chat: &ChatId) -> bool {
        lookup(&self.chats, chat.as_str())
    }
}

/// The access policy for a deployment: the list when the whitelist is on,
/// everyone otherwise.
pub fn access_policy(whitelist_enabled: bool, config: &AclConfig) -> Arc<dyn AccessControl> {
    if whitelist_enabled {
        Arc::new(Acl::from_config(config))
    } else {
        tracing::warn!("Whitelist disabled, every user and chat is allowed");
        Arc::new(AllowAll)
    }
}
