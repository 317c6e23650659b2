//! Storage layer errors

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Debug, Error)]
pub enum StoreError {
    /// Entity not found
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound {
        /// Type of entity (request, donation, transaction, ...)
        entity_type: String,
        /// Entity ID
        id: String,
    },

    /// Duplicate entity (idempotency violation)
    #[error("Duplicate entity: {entity_type} with id {id}")]
    Duplicate {
        /// Type of entity
        entity_type: String,
        /// Entity ID
        id: String,
    },

    /// Compare-and-swap lost against a concurrent writer (transient)
    #[error("Concurrent modification of {entity_type} {id}: expected version {expected}")]
    Conflict {
        /// Type of entity
        entity_type: String,
        /// Entity ID
        id: String,
        /// Version the writer based its decision on
        expected: i64,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error (reading rows back into entities)
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Storage cannot be reached (pool exhausted, connection lost, poisoned lock)
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Domain error passthrough
    #[error("Domain error: {0}")]
    Domain(#[from] mishteh_domain::DomainError),
}

impl StoreError {
    /// Create a not found error
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Create a duplicate error
    pub fn duplicate(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Duplicate {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(entity_type: impl Into<String>, id: impl Into<String>, expected: i64) -> Self {
        Self::Conflict {
            entity_type: entity_type.into(),
            id: id.into(),
            expected,
        }
    }

    /// True for errors a caller may resolve by re-reading and retrying
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound {
                entity_type: "unknown".to_string(),
                id: "unknown".to_string(),
            },
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // unique_violation
                Some("23505") => StoreError::Duplicate {
                    entity_type: db_err.table().unwrap_or("unknown").to_string(),
                    id: db_err.constraint().unwrap_or("unknown").to_string(),
                },
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => StoreError::Conflict {
                    entity_type: db_err.table().unwrap_or("unknown").to_string(),
                    id: "unknown".to_string(),
                    expected: -1,
                },
                _ => StoreError::Database(db_err.to_string()),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            },
            sqlx::Error::Tls(_) => StoreError::Unavailable(err.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Deserialization(err.to_string())
            },
            _ => StoreError::Database(err.to_string()),
        }
    }
}
