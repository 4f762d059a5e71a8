//! Conversation store adapter
//!
//! Owns read/write access to conversation records and their messages over
//! SQLite, enforces idempotent conversation creation, and publishes change
//! events that drive the live subscriptions in [`super::live`].

use crate::error::ChatError;
use crate::identity;
use crate::store::live::StoreEvent;
use crate::store::models::{now_millis, Conversation, Message, MetadataPatch};
use crate::config::StoreConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// Store adapter for conversations and messages
///
/// Cheap to clone: clones share the same connection pool and change-event
/// channel, so a subscription created from one clone observes writes made
/// through another.
#[derive(Clone)]
pub struct ChatStore {
    pool: SqlitePool,
    events: broadcast::Sender<StoreEvent>,
}

impl ChatStore {
    /// Initialize the store from configuration
    pub async fn open(config: &StoreConfig) -> Result<Self, ChatError> {
        Self::new(&config.db_path, config.event_capacity).await
    }

    /// Initialize the store at the given SQLite path
    ///
    /// Creates the database file (and parent directory) if missing and runs
    /// migrations before returning.
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file
    /// * `event_capacity` - Depth of the change-notification channel
    ///
    /// # Returns
    /// * `Ok(ChatStore)` if successful
    /// * `Err(ChatError)` if connection or migration failed
    pub async fn new(db_path: &str, event_capacity: usize) -> Result<Self, ChatError> {
        // Ensure parent directory exists
        if let Some(parent) = PathBuf::from(db_path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                ChatError::Internal(anyhow::anyhow!("Failed to create db directory: {}", e))
            })?;
        }

        // SQLite connection string format: sqlite://path/to/db.db
        let connection_string = if db_path.starts_with("sqlite:") {
            db_path.to_string()
        } else {
            format!("sqlite:{}", db_path)
        };

        let options = SqliteConnectOptions::from_str(&connection_string)
            .map_err(|e| ChatError::Internal(anyhow::anyhow!("Invalid database path: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| {
                ChatError::Internal(anyhow::anyhow!("Failed to connect to database: {}", e))
            })?;

        info!("Connected to SQLite database at: {}", db_path);

        let (events, _) = broadcast::channel(event_capacity.max(1));
        let store = Self { pool, events };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<(), ChatError> {
        info!("Running database migrations...");

        let migration_sql = include_str!("../../migrations/001_create_conversations.sql");

        // Strip comment lines, then execute statement by statement
        let mut cleaned_sql = String::new();
        for line in migration_sql.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("--") {
                continue;
            }
            let without_comments = if let Some(comment_pos) = trimmed.find("--") {
                &trimmed[..comment_pos]
            } else {
                trimmed
            };
            cleaned_sql.push_str(without_comments.trim());
            cleaned_sql.push(' ');
        }

        let statements: Vec<&str> = cleaned_sql
            .split(';')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    ChatError::Internal(anyhow::anyhow!(
                        "Migration failed: {} - Statement: {}",
                        e,
                        statement.chars().take(100).collect::<String>()
                    ))
                })?;
        }

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get a conversation by ID
    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, ChatError> {
        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT id, listing_id, seller_id, buyer_id, buyer_name, last_message, updated_at \
             FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(conversation)
    }

    /// Ensure the conversation for a (listing, buyer) pair exists
    ///
    /// Computes the deterministic id and creates the record if absent, with
    /// `last_message = None` and `updated_at = now`. Safe under concurrent
    /// invocation: the insert is `ON CONFLICT DO NOTHING`, so duplicate calls
    /// converge on one record rather than racing destructively. If the record
    /// already exists without a buyer name and a non-empty name is supplied,
    /// only `buyer_name` is patched.
    pub async fn ensure_conversation(
        &self,
        listing_id: &str,
        buyer_id: &str,
        seller_id: &str,
        buyer_name: &str,
    ) -> Result<Conversation, ChatError> {
        let id = identity::conversation_id(listing_id, buyer_id);

        let existing = self.get_conversation(&id).await?;
        match existing {
            None => {
                let stored_name = if buyer_name.trim().is_empty() {
                    None
                } else {
                    Some(buyer_name.trim())
                };
                sqlx::query(
                    "INSERT INTO conversations \
                     (id, listing_id, seller_id, buyer_id, buyer_name, last_message, updated_at) \
                     VALUES (?, ?, ?, ?, ?, NULL, ?) \
                     ON CONFLICT (id) DO NOTHING",
                )
                .bind(&id)
                .bind(listing_id)
                .bind(seller_id)
                .bind(buyer_id)
                .bind(stored_name)
                .bind(now_millis())
                .execute(&self.pool)
                .await?;

                debug!(conversation_id = %id, "Created conversation");
                self.notify(StoreEvent::Conversations {
                    listing_id: listing_id.to_string(),
                    seller_id: seller_id.to_string(),
                });
            }
            Some(ref conversation) => {
                if !conversation.has_buyer_name() && !buyer_name.trim().is_empty() {
                    self.patch_metadata(&id, MetadataPatch::buyer_name(buyer_name.trim()))
                        .await?;
                }
            }
        }

        self.get_conversation(&id)
            .await?
            .ok_or_else(|| ChatError::ConversationNotFound(id))
    }

    /// Fetch the conversations for a listing owned by a seller
    ///
    /// Ordering is recomputed here, after the fetch, by `updated_at`
    /// descending (most recently active first) — the store's native result
    /// order is not relied upon.
    pub async fn list_conversations_for(
        &self,
        listing_id: &str,
        seller_id: &str,
    ) -> Result<Vec<Conversation>, ChatError> {
        let mut conversations = sqlx::query_as::<_, Conversation>(
            "SELECT id, listing_id, seller_id, buyer_id, buyer_name, last_message, updated_at \
             FROM conversations WHERE listing_id = ? AND seller_id = ?",
        )
        .bind(listing_id)
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await?;

        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    /// Apply a partial-merge patch to a conversation's metadata
    ///
    /// Fields not present in the patch are left untouched; `updated_at` is
    /// always bumped.
    pub async fn patch_metadata(
        &self,
        conversation_id: &str,
        patch: MetadataPatch,
    ) -> Result<(), ChatError> {
        let result = sqlx::query(
            "UPDATE conversations SET \
             last_message = COALESCE(?, last_message), \
             buyer_name = COALESCE(?, buyer_name), \
             updated_at = ? \
             WHERE id = ?",
        )
        .bind(&patch.last_message)
        .bind(&patch.buyer_name)
        .bind(now_millis())
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ChatError::ConversationNotFound(conversation_id.to_string()));
        }

        debug!(conversation_id = %conversation_id, "Patched conversation metadata");

        if let Some(conversation) = self.get_conversation(conversation_id).await? {
            self.notify(StoreEvent::Conversations {
                listing_id: conversation.listing_id,
                seller_id: conversation.seller_id,
            });
        }

        Ok(())
    }

    /// Get all messages in a conversation, in authoritative order
    ///
    /// Ascending by `created_at`, ties broken by append order (rowid).
    pub async fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>, ChatError> {
        let messages = sqlx::query_as::<_, Message>(
            "SELECT id, conversation_id, sender_id, text, created_at \
             FROM messages WHERE conversation_id = ? \
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    /// Append a message to a conversation
    ///
    /// Rejects blank text before any store call. The message insert happens
    /// before the owning conversation's `last_message` patch, so the message
    /// is visible in the stream at least as soon as the metadata update —
    /// never the reverse.
    pub async fn append_message(
        &self,
        conversation_id: &str,
        sender_id: &str,
        text: &str,
    ) -> Result<Message, ChatError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ChatError::Validation(
                "message text must not be empty".to_string(),
            ));
        }

        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            text: trimmed.to_string(),
            created_at: now_millis(),
        };

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, text, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.sender_id)
        .bind(&message.text)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        debug!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            "Appended message"
        );

        self.notify(StoreEvent::Messages {
            conversation_id: conversation_id.to_string(),
        });

        self.patch_metadata(conversation_id, MetadataPatch::last_message(trimmed))
            .await?;

        Ok(message)
    }

    /// Broadcast a change event; no receivers is not an error
    fn notify(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }

    /// Subscribe to the change-event channel (used by the live streams)
    pub(crate) fn event_receiver(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Get the database pool (used by tests to force store failures)
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (ChatStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let store = ChatStore::new(db_path.to_str().unwrap(), 16)
            .await
            .expect("Failed to create test store");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_ensure_conversation_creates_once() {
        let (store, _temp_dir) = test_store().await;

        let first = store
            .ensure_conversation("L1", "b1", "s1", "Ana")
            .await
            .unwrap();
        assert_eq!(first.id, "L1_b1");
        assert_eq!(first.buyer_name.as_deref(), Some("Ana"));
        assert!(first.last_message.is_none());

        let second = store
            .ensure_conversation("L1", "b1", "s1", "Ana")
            .await
            .unwrap();
        assert_eq!(second.id, first.id);

        let all = store.list_conversations_for("L1", "s1").await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_conversation_backfills_missing_name() {
        let (store, _temp_dir) = test_store().await;

        let created = store
            .ensure_conversation("L1", "b1", "s1", "")
            .await
            .unwrap();
        assert!(created.buyer_name.is_none());

        let patched = store
            .ensure_conversation("L1", "b1", "s1", "Ana")
            .await
            .unwrap();
        assert_eq!(patched.buyer_name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn test_ensure_conversation_never_overwrites_name() {
        let (store, _temp_dir) = test_store().await;

        store
            .ensure_conversation("L1", "b1", "s1", "Ana")
            .await
            .unwrap();
        let kept = store
            .ensure_conversation("L1", "b1", "s1", "Someone Else")
            .await
            .unwrap();
        assert_eq!(kept.buyer_name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn test_patch_metadata_is_partial_merge() {
        let (store, _temp_dir) = test_store().await;

        store
            .ensure_conversation("L1", "b1", "s1", "Ana")
            .await
            .unwrap();

        store
            .patch_metadata("L1_b1", MetadataPatch::last_message("hello"))
            .await
            .unwrap();
        let convo = store.get_conversation("L1_b1").await.unwrap().unwrap();
        assert_eq!(convo.buyer_name.as_deref(), Some("Ana"));
        assert_eq!(convo.last_message.as_deref(), Some("hello"));

        store
            .patch_metadata("L1_b1", MetadataPatch::buyer_name("Ana Maria"))
            .await
            .unwrap();
        let convo = store.get_conversation("L1_b1").await.unwrap().unwrap();
        assert_eq!(convo.buyer_name.as_deref(), Some("Ana Maria"));
        assert_eq!(convo.last_message.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_patch_metadata_bumps_updated_at() {
        let (store, _temp_dir) = test_store().await;

        let created = store
            .ensure_conversation("L1", "b1", "s1", "Ana")
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .patch_metadata("L1_b1", MetadataPatch::last_message("hello"))
            .await
            .unwrap();
        let patched = store.get_conversation("L1_b1").await.unwrap().unwrap();
        assert!(patched.updated_at > created.updated_at);
    }

    #[tokio::test]
    async fn test_patch_metadata_missing_conversation() {
        let (store, _temp_dir) = test_store().await;
        let result = store
            .patch_metadata("nope", MetadataPatch::last_message("hello"))
            .await;
        match result {
            Err(ChatError::ConversationNotFound(_)) => {}
            other => panic!("Expected ConversationNotFound, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_append_message_rejects_blank_text() {
        let (store, _temp_dir) = test_store().await;
        store
            .ensure_conversation("L1", "b1", "s1", "Ana")
            .await
            .unwrap();

        let result = store.append_message("L1_b1", "b1", "   ").await;
        match result {
            Err(ChatError::Validation(_)) => {}
            other => panic!("Expected Validation error, got {:?}", other.err()),
        }
        assert!(store.get_messages("L1_b1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_message_trims_and_updates_last_message() {
        let (store, _temp_dir) = test_store().await;
        store
            .ensure_conversation("L1", "b1", "s1", "Ana")
            .await
            .unwrap();

        let message = store
            .append_message("L1_b1", "b1", "  Hi, is this available?  ")
            .await
            .unwrap();
        assert_eq!(message.text, "Hi, is this available?");

        let convo = store.get_conversation("L1_b1").await.unwrap().unwrap();
        assert_eq!(convo.last_message.as_deref(), Some("Hi, is this available?"));
    }

    #[tokio::test]
    async fn test_messages_ordered_by_created_at_then_append_order() {
        let (store, _temp_dir) = test_store().await;
        store
            .ensure_conversation("L1", "b1", "s1", "Ana")
            .await
            .unwrap();

        for i in 0..5 {
            store
                .append_message("L1_b1", "b1", &format!("message {}", i))
                .await
                .unwrap();
        }

        let messages = store.get_messages("L1_b1").await.unwrap();
        assert_eq!(messages.len(), 5);
        for (i, message) in messages.iter().enumerate() {
            assert_eq!(message.text, format!("message {}", i));
        }
        for pair in messages.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }
    }

    #[tokio::test]
    async fn test_list_conversations_sorted_most_recent_first() {
        let (store, _temp_dir) = test_store().await;

        store
            .ensure_conversation("L1", "b1", "s1", "Ana")
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .ensure_conversation("L1", "b2", "s1", "Ben")
            .await
            .unwrap();

        let list = store.list_conversations_for("L1", "s1").await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "L1_b2");

        // New activity moves b1 back to the top
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.append_message("L1_b1", "b1", "hello").await.unwrap();
        let list = store.list_conversations_for("L1", "s1").await.unwrap();
        assert_eq!(list[0].id, "L1_b1");
    }

    #[tokio::test]
    async fn test_list_conversations_scoped_to_listing_and_seller() {
        let (store, _temp_dir) = test_store().await;

        store
            .ensure_conversation("L1", "b1", "s1", "Ana")
            .await
            .unwrap();
        store
            .ensure_conversation("L2", "b1", "s1", "Ana")
            .await
            .unwrap();
        store
            .ensure_conversation("L1", "b2", "s2", "Ben")
            .await
            .unwrap();

        let list = store.list_conversations_for("L1", "s1").await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "L1_b1");
    }
}
