//! Error types for the chat subsystem
//!
//! This module defines the error taxonomy shared by the store adapter,
//! identity resolver, and sessions. Sessions deliberately swallow most store
//! failures at their boundary (see [`crate::session::FailureCounter`]); the
//! variants here are what crosses that seam.

use thiserror::Error;

/// Chat subsystem error types
#[derive(Error, Debug)]
pub enum ChatError {
    /// Message text was empty after trimming; rejected before any store call
    #[error("validation failed: {0}")]
    Validation(String),

    /// Operation attempted with no signed-in user
    #[error("sign-in required: {0}")]
    AuthRequired(String),

    /// Metadata patch targeted a conversation that does not exist
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    /// Underlying store read/write failed
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Internal error (catch-all for setup failures)
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
