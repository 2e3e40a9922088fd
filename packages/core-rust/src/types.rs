use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a page within its session's scope.
pub type PageId = u32;

/// Composite key of a stored page: the owning session plus the page id.
///
/// The session is the logical owner partition. Bulk operations such as
/// [`PageStore::evict_session`](crate::PageStore::evict_session) act on all
/// keys sharing a `session_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageKey {
    /// Owning session.
    pub session_id: String,
    /// Page id, unique within the session.
    pub page_id: PageId,
}

impl PageKey {
    /// Creates a key for `page_id` owned by `session_id`.
    #[must_use]
    pub fn new(session_id: impl Into<String>, page_id: PageId) -> Self {
        Self {
            session_id: session_id.into(),
            page_id,
        }
    }

    /// Returns `true` if this key belongs to the given session.
    #[must_use]
    pub fn is_owned_by(&self, session_id: &str) -> bool {
        self.session_id == session_id
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.session_id, self.page_id)
    }
}

/// A page that knows its own id.
///
/// Lets callers store a page without repeating its id next to it.
pub trait ManageablePage: Send + Sync + 'static {
    /// The id this page is stored under.
    fn page_id(&self) -> PageId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_session_and_page() {
        let key = PageKey::new("session-1", 42);
        assert_eq!(key.to_string(), "session-1:42");
    }

    #[test]
    fn ownership_check_matches_session_only() {
        let key = PageKey::new("a", 1);
        assert!(key.is_owned_by("a"));
        assert!(!key.is_owned_by("b"));
        assert!(!key.is_owned_by(""));
    }

    #[test]
    fn keys_order_by_session_then_page() {
        let mut keys = vec![
            PageKey::new("b", 1),
            PageKey::new("a", 2),
            PageKey::new("a", 1),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![PageKey::new("a", 1), PageKey::new("a", 2), PageKey::new("b", 1)]
        );
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let json = serde_json::to_string(&PageKey::new("s", 7)).unwrap();
        assert_eq!(json, r#"{"sessionId":"s","pageId":7}"#);
    }
}
