//! Session controllers
//!
//! Buyer- and seller-facing controllers over the conversation store. Sessions
//! hold an explicit [`crate::identity::Viewer`] snapshot taken at
//! construction, own their live subscriptions, and release them on close.
//!
//! Store failures inside a session are intentionally absorbed rather than
//! propagated (best-effort sends, per-buyer backfill); [`FailureCounter`] is
//! the explicit swallow point, so tests can assert how many failures occurred
//! without any of them escaping.

pub mod buyer;
pub mod seller;

pub use buyer::{BuyerChatSession, BuyerPhase};
pub use seller::{InboxPhase, SellerInboxSession};

use crate::error::ChatError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Counter of store failures a session absorbed at its boundary
///
/// Cloneable; clones share the same counter, so a test can keep one handle
/// while the session records through another.
#[derive(Debug, Clone, Default)]
pub struct FailureCounter {
    swallowed: Arc<AtomicUsize>,
}

impl FailureCounter {
    /// Record a swallowed failure
    pub(crate) fn record(&self, context: &str, error: &ChatError) {
        warn!(context = context, error = %error, "Swallowed store failure");
        self.swallowed.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of failures absorbed so far
    pub fn count(&self) -> usize {
        self.swallowed.load(Ordering::Relaxed)
    }
}
