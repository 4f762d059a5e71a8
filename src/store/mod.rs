//! Conversation store
//!
//! SQLite-backed persistence for conversations and messages, plus the live
//! subscription streams that drive the buyer and seller sessions.

pub mod db;
pub mod live;
pub mod models;

pub use db::ChatStore;
pub use live::StoreEvent;
pub use models::{Conversation, Message, MetadataPatch};
