//! Marketplace chat subsystem
//!
//! Peer-to-peer marketplace messaging: a prospective buyer opens a
//! conversation with a listing's seller, and a seller triages every buyer
//! conversation for a listing from a single inbox. The crate covers
//! conversation lifecycle, idempotent conversation identity, live message
//! synchronization, and buyer-identity backfill; listings, auth UI, and the
//! user directory are external collaborators consumed through the interfaces
//! in [`directory`] and [`identity`].
//!
//! Typical embedding:
//!
//! ```no_run
//! use market_chat::{AuthUser, BuyerChatSession, ChatStore, Config, Viewer};
//!
//! # async fn demo() -> Result<(), market_chat::ChatError> {
//! let config = Config::from_env();
//! let store = ChatStore::open(&config.store).await?;
//!
//! let viewer = Viewer::signed_in(
//!     AuthUser {
//!         uid: "b1".to_string(),
//!         display_name: Some("Ana".to_string()),
//!         email: None,
//!     },
//!     None,
//! );
//! let mut session = BuyerChatSession::new(store, viewer, "L1", "s1");
//! session.open().await?;
//! session.send("Hi, is this available?").await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod directory;
pub mod error;
pub mod identity;
pub mod session;
pub mod store;

pub use config::{Config, StoreConfig};
pub use directory::{InMemoryUserDirectory, UserDirectory, UserProfile};
pub use error::ChatError;
pub use identity::{AuthUser, Role, Viewer};
pub use session::{
    BuyerChatSession, BuyerPhase, FailureCounter, InboxPhase, SellerInboxSession,
};
pub use store::{ChatStore, Conversation, Message, MetadataPatch, StoreEvent};
