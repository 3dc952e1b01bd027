//! Error types for relink.
//!
//! All errors are strongly typed using thiserror so callers can pattern
//! match on the specific condition (a vanished record, a broken schema, a
//! partially applied propagation) instead of parsing messages.

use thiserror::Error;

use crate::propagation::PropagationReport;
use crate::value::{RecordId, TypeKey};

/// Errors raised by an `EntityStore` backend.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The record does not exist (or vanished between two steps).
    #[error("Record not found: {type_key}#{id}")]
    RecordNotFound {
        /// Type of the missing record.
        type_key: TypeKey,
        /// ID of the missing record.
        id: RecordId,
    },

    /// The store has no collection for this type.
    #[error("Unknown type: {0}")]
    UnknownType(TypeKey),

    /// A patch referenced a field the record does not declare.
    #[error("Unknown field '{field}' on {type_key}")]
    UnknownField {
        /// Type being patched.
        type_key: TypeKey,
        /// Offending field.
        field: String,
    },

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    Connection(String),
}

impl StorageError {
    /// Returns true if this is a not-found condition.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::RecordNotFound { .. })
    }
}

/// Errors raised while loading or querying type schemas.
#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    /// Schema document could not be parsed.
    #[error("Failed to parse schema: {0}")]
    Parse(String),

    /// Two schemas share a key.
    #[error("Duplicate type: {0}")]
    DuplicateType(TypeKey),

    /// No schema is registered for the key.
    #[error("Unknown type: {0}")]
    UnknownType(TypeKey),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Document could not be parsed.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// A value is out of its allowed range.
    #[error("Invalid config value for '{field}': {reason}")]
    Invalid {
        /// Offending field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// One per-record update that did not apply.
#[derive(Debug, Clone)]
pub struct UpdateFailure {
    /// Type of the record.
    pub type_key: TypeKey,
    /// Record that could not be updated.
    pub record_id: RecordId,
    /// Underlying storage error.
    pub error: StorageError,
}

/// A link query for one matched type that did not run.
#[derive(Debug, Clone)]
pub struct QueryFailure {
    /// Type whose records could not be queried.
    pub type_key: TypeKey,
    /// Underlying storage error.
    pub error: StorageError,
}

/// Errors surfaced by a propagation run.
#[derive(Debug, Error)]
pub enum PropagationError {
    /// A query (or the initial lookup) failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The written type is not registered.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Some work applied, some did not. The report covers what succeeded.
    #[error(
        "{} of {} relation updates failed, {} link queries failed",
        failures.len(),
        report.attempted_updates(),
        query_failures.len()
    )]
    Partial {
        /// Everything that was done.
        report: Box<PropagationReport>,
        /// Per-record updates that failed.
        failures: Vec<UpdateFailure>,
        /// Matched types whose link query failed.
        query_failures: Vec<QueryFailure>,
    },
}

impl PropagationError {
    /// Returns true if the failure is a missing record.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_not_found())
    }

    /// Returns true if some updates were applied before failures occurred.
    #[must_use]
    pub const fn is_partial(&self) -> bool {
        matches!(self, Self::Partial { .. })
    }
}

/// Top-level error type for relink.
#[derive(Debug, Error)]
pub enum RelinkError {
    /// A propagation run failed or partially failed.
    #[error("Propagation error: {0}")]
    Propagation(#[from] PropagationError),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<StorageError> for RelinkError {
    fn from(err: StorageError) -> Self {
        Self::Propagation(PropagationError::Storage(err))
    }
}

impl From<SchemaError> for RelinkError {
    fn from(err: SchemaError) -> Self {
        Self::Propagation(PropagationError::Schema(err))
    }
}

impl RelinkError {
    /// Returns true if this is a not-found condition.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Propagation(e) if e.is_not_found())
    }

    /// Returns true if retrying the same write could succeed.
    ///
    /// Nothing retries inside this crate; the flag is for the caller's pipeline.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Propagation(PropagationError::Storage(e)) => {
                matches!(e, StorageError::Connection(_))
            }
            Self::Propagation(PropagationError::Partial { .. }) => true,
            Self::Propagation(PropagationError::Schema(_)) | Self::Config(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn not_found() -> StorageError {
        StorageError::RecordNotFound {
            type_key: TypeKey::new("api::article.article"),
            id: RecordId::new(5),
        }
    }

    #[test]
    fn test_storage_error_display() {
        let msg = not_found().to_string();
        assert!(msg.contains("Record not found"));
        assert!(msg.contains("api::article.article#5"));

        let err = StorageError::Backend("disk full".to_string());
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_not_found_is_visible_at_every_level() {
        assert!(not_found().is_not_found());

        let prop: PropagationError = not_found().into();
        assert!(prop.is_not_found());
        assert!(!prop.is_partial());

        let top: RelinkError = not_found().into();
        assert!(top.is_not_found());
        assert!(!top.is_retryable());
    }

    #[test]
    fn test_partial_error_display() {
        let err = PropagationError::Partial {
            report: Box::new(PropagationReport::begin(
                TypeKey::new("api::article.article"),
                RecordId::new(5),
            )),
            failures: vec![UpdateFailure {
                type_key: TypeKey::new("shared.author"),
                record_id: RecordId::new(1),
                error: StorageError::Backend("boom".to_string()),
            }],
            query_failures: Vec::new(),
        };
        assert!(err.is_partial());
        assert!(err.to_string().contains("relation updates failed"));

        let top: RelinkError = err.into();
        assert!(top.is_retryable());
    }

    #[test]
    fn test_retryable() {
        let err: RelinkError = StorageError::Connection("refused".to_string()).into();
        assert!(err.is_retryable());

        let err: RelinkError = SchemaError::UnknownType(TypeKey::new("x")).into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Invalid {
            field: "max_concurrent_updates".to_string(),
            reason: "must be at least 1".to_string(),
        };
        assert!(err.to_string().contains("max_concurrent_updates"));
    }
}
