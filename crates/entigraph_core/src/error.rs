//! Error types for entigraph core.

use entigraph_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in entigraph core operations.
///
/// Absence on load is not an error: loaders return `Ok(None)`.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error. Removing an absent key surfaces here as
    /// [`StorageError::KeyNotFound`].
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// JSON encoding or decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A save collided with a distinct record already stored under the key.
    #[error("entity {key} already exists")]
    AlreadyExists {
        /// The occupied storage key.
        key: String,
    },

    /// A property or relation value has the wrong shape or type.
    #[error("type mismatch: {message}")]
    TypeMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// A validator, cardinality rule, or reverse-descriptor rule rejected a write.
    #[error("validation failed: {message}")]
    ValidationFailure {
        /// Description of the failure.
        message: String,
    },

    /// A direct link/unlink was redundant (already linked, or not linked).
    #[error("relation conflict: {message}")]
    RelationConflict {
        /// Description of the conflict.
        message: String,
    },

    /// The acting caller does not own the entity.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denial.
        message: String,
    },

    /// No schema is registered under this type name.
    #[error("unknown entity type: {name}")]
    UnknownType {
        /// The unregistered type name.
        name: String,
    },

    /// The entity type declares no such scalar property.
    #[error("type {type_name} has no property '{property}'")]
    UnknownProperty {
        /// The entity type.
        type_name: String,
        /// The requested property.
        property: String,
    },

    /// The entity type declares no such relation.
    #[error("type {type_name} has no relation '{relation}'")]
    UnknownRelation {
        /// The entity type.
        type_name: String,
        /// The requested relation.
        relation: String,
    },

    /// A stored record does not have the expected shape.
    #[error("invalid record at {key}: {message}")]
    InvalidRecord {
        /// The storage key of the record.
        key: String,
        /// Description of the problem.
        message: String,
    },

    /// A relation reassignment failed after some pairs were already applied.
    ///
    /// The graph is left as it was after `completed` link/unlink pairs.
    #[error("relation '{relation}' partially updated ({completed} pairs applied): {source}")]
    PartialUpdate {
        /// The relation being reassigned.
        relation: String,
        /// Number of pairs persisted before the failure.
        completed: usize,
        /// The failure that stopped the update.
        #[source]
        source: Box<CoreError>,
    },
}

impl CoreError {
    /// Creates a type mismatch error.
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            message: message.into(),
        }
    }

    /// Creates a validation failure error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailure {
            message: message.into(),
        }
    }

    /// Creates a relation conflict error.
    pub fn relation_conflict(message: impl Into<String>) -> Self {
        Self::RelationConflict {
            message: message.into(),
        }
    }

    /// Creates a permission denied error.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Creates an invalid record error.
    pub fn invalid_record(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Returns true if this is a storage-level missing-key error.
    #[must_use]
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Self::Storage(StorageError::KeyNotFound { .. }))
    }

    /// Returns the underlying error, looking through [`CoreError::PartialUpdate`].
    #[must_use]
    pub fn root(&self) -> &CoreError {
        match self {
            Self::PartialUpdate { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_not_found_predicate() {
        let err = CoreError::from(StorageError::key_not_found("person@1"));
        assert!(err.is_key_not_found());
        assert!(!CoreError::validation("x").is_key_not_found());
    }

    #[test]
    fn root_unwraps_partial_update() {
        let err = CoreError::PartialUpdate {
            relation: "employees".into(),
            completed: 2,
            source: Box::new(CoreError::permission_denied("not owner")),
        };
        assert!(matches!(err.root(), CoreError::PermissionDenied { .. }));
        assert!(err.to_string().contains("2 pairs applied"));
    }
}
