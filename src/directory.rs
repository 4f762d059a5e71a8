//! User directory collaborator interface
//!
//! The user directory is an external collaborator: a point-lookup from uid to
//! profile, consumed by identity backfill. Production embedders implement
//! [`UserDirectory`] over their own user store; [`InMemoryUserDirectory`] is
//! provided for tests and embedding without a backing directory.

use crate::error::ChatError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Profile fields relevant to display-name resolution
///
/// The directory may hold more (seller status, contact details, ...); only
/// the naming fields cross this interface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    /// Full legal name, if the user provided one
    pub full_name: Option<String>,
    /// Display name, typically seeded from an OAuth provider
    pub display_name: Option<String>,
    /// Email address
    pub email: Option<String>,
}

/// Point lookup from uid to profile
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Fetch the profile for `uid`, or `None` if the user has no profile
    async fn get_profile(&self, uid: &str) -> Result<Option<UserProfile>, ChatError>;
}

/// HashMap-backed directory for tests and standalone embedding
#[derive(Debug, Default, Clone)]
pub struct InMemoryUserDirectory {
    profiles: Arc<RwLock<HashMap<String, UserProfile>>>,
}

impl InMemoryUserDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the profile for `uid`
    pub async fn insert(&self, uid: impl Into<String>, profile: UserProfile) {
        self.profiles.write().await.insert(uid.into(), profile);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_profile(&self, uid: &str) -> Result<Option<UserProfile>, ChatError> {
        Ok(self.profiles.read().await.get(uid).cloned())
    }
}
