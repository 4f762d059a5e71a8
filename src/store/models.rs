//! Chat data models
//!
//! Defines structures for conversations and messages as persisted by the
//! store adapter.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Current time in Unix milliseconds, the store's timestamp resolution
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// The unique thread between one buyer and one seller about one listing
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    /// Deterministic identifier: `{listing_id}_{buyer_id}`
    pub id: String,
    /// Listing the conversation is about
    pub listing_id: String,
    /// Seller who owns the listing
    pub seller_id: String,
    /// Buyer who opened the conversation
    pub buyer_id: String,
    /// Buyer display label; may be backfilled after creation
    pub buyer_name: Option<String>,
    /// Text of the most recently appended message
    pub last_message: Option<String>,
    /// When the conversation was last touched (Unix milliseconds)
    pub updated_at: i64,
}

impl Conversation {
    /// Whether the conversation carries a usable buyer display name
    pub fn has_buyer_name(&self) -> bool {
        self.buyer_name
            .as_deref()
            .is_some_and(|n| !n.trim().is_empty())
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    /// Store-assigned unique identifier
    pub id: String,
    /// ID of the conversation this message belongs to
    pub conversation_id: String,
    /// Identifier of the author (buyer or seller uid)
    pub sender_id: String,
    /// Message text, trimmed and non-empty
    pub text: String,
    /// Store-assigned creation time (Unix milliseconds); authoritative
    /// ordering key within a conversation
    pub created_at: i64,
}

/// Partial-merge update to a conversation's metadata
///
/// Fields left as `None` are untouched by the patch; `updated_at` is always
/// bumped. A patch never clears a field, so concurrent patches to different
/// fields cannot drop each other's writes.
#[derive(Debug, Clone, Default)]
pub struct MetadataPatch {
    /// New last-message text
    pub last_message: Option<String>,
    /// New buyer display name
    pub buyer_name: Option<String>,
}

impl MetadataPatch {
    /// Patch only the last-message text
    pub fn last_message(text: impl Into<String>) -> Self {
        Self {
            last_message: Some(text.into()),
            ..Default::default()
        }
    }

    /// Patch only the buyer display name
    pub fn buyer_name(name: impl Into<String>) -> Self {
        Self {
            buyer_name: Some(name.into()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_buyer_name() {
        let mut convo = Conversation {
            id: "L1_b1".to_string(),
            listing_id: "L1".to_string(),
            seller_id: "s1".to_string(),
            buyer_id: "b1".to_string(),
            buyer_name: None,
            last_message: None,
            updated_at: 0,
        };
        assert!(!convo.has_buyer_name());
        convo.buyer_name = Some("  ".to_string());
        assert!(!convo.has_buyer_name());
        convo.buyer_name = Some("Ana".to_string());
        assert!(convo.has_buyer_name());
    }
}
