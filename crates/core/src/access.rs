//! Access control seam consulted by the dispatch core.

use crate::ids::{ChatId, UserId};

/// Decides whether a user or a chat may use the relay.
///
/// The chat-level decision is only consulted when the user-level one denies.
pub trait AccessControl: Send + Sync {
    fn allow_user(&self, user: &UserId) -> bool;

    fn allow_chat(&self, chat: &ChatId) -> bool;

    /// User first, then chat.
    fn allows(&self, user: &UserId, chat: &ChatId) -> bool {
        self.allow_user(user) || self.allow_chat(chat)
    }
}

/// Allows everyone. Used when the allowlist is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn allow_user(&self, _user: &UserId) -> bool {
        true
    }

    fn allow_chat(&self, _chat: &ChatId) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ChatOnly;

    impl AccessControl for ChatOnly {
        fn allow_user(&self, _user: &UserId) -> bool {
            false
        }

        fn allow_chat(&self, chat: &ChatId) -> bool {
            chat.as_str() == "tg-1"
        }
    }

    #[test]
    fn chat_allowance_covers_denied_user() {
        let acl = ChatOnly;
        assert!(acl.allows(&UserId::from("tg-9"), &ChatId::from("tg-1")));
        assert!(!acl.allows(&UserId::from("tg-9"), &ChatId::from("tg-2")));
    }

    #[test]
    fn allow_all_allows() {
        assert!(AllowAll.allows(&UserId::from("a"), &ChatId::from("b")));
    }
}
