//! Error types for meterline storage.

use meterline_core::BillingError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of record.
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// The transaction lost a lock race (busy, timed out, deadlock). Retrying
    /// the whole transaction may succeed.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// A unique key is already taken.
    #[error("duplicate {entity}: {id}")]
    Duplicate {
        /// The kind of record.
        entity: &'static str,
        /// The key that was duplicated.
        id: String,
    },
}

impl StoreError {
    /// Shorthand for a [`StoreError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for a [`StoreError::Duplicate`].
    pub fn duplicate(entity: &'static str, id: impl ToString) -> Self {
        Self::Duplicate {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<StoreError> for BillingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::Duplicate { .. } => Self::Conflict(err.to_string()),
            StoreError::Conflict(_) => Self::Storage {
                message: err.to_string(),
                retryable: true,
            },
            StoreError::Database(_) | StoreError::Serialization(_) => Self::Storage {
                message: err.to_string(),
                retryable: false,
            },
        }
    }
}
