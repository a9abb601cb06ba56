//! Error types for meterline.
//!
//! Expected business conditions (an endpoint that is not accessible, a coupon
//! that does not apply) are *not* errors: they are returned as typed values by
//! the operations that produce them. `BillingError` covers the cases that must
//! abort the enclosing transaction or be surfaced as a hard failure.

use crate::ids::IdError;

/// Result type for meterline operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors that can occur in meterline operations.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of record (e.g. "wallet", "package plan").
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Stored data contradicts itself (e.g. a payment references a missing plan).
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// Storage error.
    #[error("storage error: {message}")]
    Storage {
        /// Error message from the storage collaborator.
        message: String,
        /// Whether retrying the operation may succeed (lock conflicts, timeouts).
        retryable: bool,
    },

    /// A write conflicted with an existing record.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Invalid amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// A usage payload failed validation.
    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Notification delivery failed.
    #[error("notification error: {0}")]
    Notification(String),
}

impl BillingError {
    /// Shorthand for a [`BillingError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether a retry of the failed operation may succeed.
    ///
    /// Queue-driven flows re-deliver on any error; synchronous request flows
    /// use this to tell a transient failure from a terminal one.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage { retryable: true, .. })
    }
}
