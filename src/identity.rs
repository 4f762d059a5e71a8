//! Identity resolution
//!
//! Derives the stable conversation key for a (listing, buyer) pair, resolves
//! display names for participants, and reconciles conversations whose buyer
//! name is missing by backfilling it from the user directory.

use crate::directory::{UserDirectory, UserProfile};
use crate::error::ChatError;
use crate::store::{ChatStore, Conversation, MetadataPatch};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Separator joining listing id and buyer id into a conversation id
const CONVERSATION_ID_SEPARATOR: char = '_';

/// Snapshot of the signed-in user from the auth session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    /// Stable user identifier
    pub uid: String,
    /// Display name from the auth provider
    pub display_name: Option<String>,
    /// Email address from the auth provider
    pub email: Option<String>,
}

/// Role of a chat participant, used for fallback labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The prospective buyer contacting a listing
    Buyer,
    /// The seller who owns the listing
    Seller,
}

impl Role {
    /// Fixed fallback label when no name source is available
    pub fn fallback_label(&self) -> &'static str {
        match self {
            Role::Buyer => "Buyer",
            Role::Seller => "Seller",
        }
    }
}

/// Explicit auth/profile context passed into each session constructor
///
/// A session holds its own snapshot taken at creation and never reaches into
/// ambient global state; re-authentication constructs a new session.
#[derive(Debug, Clone, Default)]
pub struct Viewer {
    /// The signed-in user, or `None` when signed out
    pub user: Option<AuthUser>,
    /// The user's directory profile, if already loaded
    pub profile: Option<UserProfile>,
}

impl Viewer {
    /// Snapshot for a signed-in user
    pub fn signed_in(user: AuthUser, profile: Option<UserProfile>) -> Self {
        Self {
            user: Some(user),
            profile,
        }
    }

    /// Snapshot for a signed-out viewer
    pub fn signed_out() -> Self {
        Self::default()
    }
}

/// Derive the deterministic conversation id for a (listing, buyer) pair
///
/// Pure concatenation with a fixed separator: the same pair always yields the
/// same id, which is what makes conversation creation idempotent.
pub fn conversation_id(listing_id: &str, buyer_id: &str) -> String {
    format!("{}{}{}", listing_id, CONVERSATION_ID_SEPARATOR, buyer_id)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Resolve a display name for the viewer
///
/// Priority order: profile full name, profile display name, auth display
/// name, auth email, else the role's fixed fallback label. Always returns a
/// non-empty string.
pub fn resolve_display_name(viewer: &Viewer, role: Role) -> String {
    let profile = viewer.profile.as_ref();
    let user = viewer.user.as_ref();

    non_blank(profile.and_then(|p| p.full_name.as_deref()))
        .or_else(|| non_blank(profile.and_then(|p| p.display_name.as_deref())))
        .or_else(|| non_blank(user.and_then(|u| u.display_name.as_deref())))
        .or_else(|| non_blank(user.and_then(|u| u.email.as_deref())))
        .unwrap_or_else(|| role.fallback_label())
        .to_string()
}

/// Pick a buyer name from a directory profile, falling back to the raw uid
fn name_from_profile(profile: Option<UserProfile>, buyer_id: &str) -> String {
    profile
        .as_ref()
        .and_then(|p| {
            non_blank(p.full_name.as_deref())
                .or_else(|| non_blank(p.display_name.as_deref()))
                .or_else(|| non_blank(p.email.as_deref()))
                .map(str::to_string)
        })
        .unwrap_or_else(|| buyer_id.to_string())
}

/// Backfill a conversation's missing buyer name from the user directory
///
/// If the conversation already carries a non-empty `buyer_name`, it is
/// returned unchanged with no side effect, so repeated calls after a
/// successful backfill are no-ops. Otherwise the buyer's profile is looked
/// up, a name chosen (full name, display name, email, else the raw uid), and
/// persisted onto the conversation via a metadata-only partial patch.
pub async fn backfill_buyer_name(
    store: &ChatStore,
    directory: &dyn UserDirectory,
    conversation: &Conversation,
) -> Result<String, ChatError> {
    if let Some(name) = non_blank(conversation.buyer_name.as_deref()) {
        return Ok(name.to_string());
    }

    let profile = directory.get_profile(&conversation.buyer_id).await?;
    let name = name_from_profile(profile, &conversation.buyer_id);

    debug!(
        conversation_id = %conversation.id,
        buyer_id = %conversation.buyer_id,
        "Backfilling buyer name from directory"
    );

    store
        .patch_metadata(&conversation.id, MetadataPatch::buyer_name(&name))
        .await?;

    Ok(name)
}
