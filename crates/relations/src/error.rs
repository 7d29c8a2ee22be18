//! Error types for the relationship engine
//!
//! Failures fall into four groups: deployment-time resolution errors, storage
//! errors raised by a [`TableStore`](crate::store::TableStore), programming
//! errors (invariant violations), and configuration errors. Absent values and
//! empty collections are normal results and never show up here.

use thiserror::Error;

/// Result type alias for relationship operations
pub type RelationResult<T> = Result<T, RelationError>;

/// Error type for relationship operations
#[derive(Debug, Clone, Error)]
pub enum RelationError {
    /// The underlying table store failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Relationship wiring failed at startup
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    /// An argument violates the field's contract
    #[error("Invalid argument for '{field}': {message}")]
    InvalidArgument { field: String, message: String },

    /// The backing state changed structurally while a cursor was open
    #[error("Concurrent modification of '{field}': expected generation {expected}, found {found}")]
    ConcurrentModification {
        field: String,
        expected: u64,
        found: u64,
    },

    /// Mutation attempted on a read-only relationship field
    #[error("Relationship field '{0}' is read-only")]
    ReadOnly(String),

    /// Field lookup by name failed at runtime
    #[error("Unknown relationship field '{field}' on entity '{entity}'")]
    UnknownField { entity: String, field: String },

    /// Entity lookup by name failed at runtime
    #[error("Unknown entity type '{0}'")]
    UnknownEntity(String),

    /// The entity was already removed in this session
    #[error("Entity {0} has been removed")]
    EntityRemoved(String),

    /// The entity row does not exist in storage
    #[error("Entity {0} not found")]
    EntityNotFound(String),

    /// A non-nullable foreign key was left unset at flush time
    #[error("Foreign key violation on {entity}.{field}: column(s) {columns} cannot be NULL")]
    ForeignKeyViolation {
        entity: String,
        field: String,
        columns: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RelationError {
    pub fn storage(message: impl Into<String>) -> Self {
        RelationError::Storage(message.into())
    }

    pub fn invalid_argument(field: &str, message: impl Into<String>) -> Self {
        RelationError::InvalidArgument {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// True for errors caused by misuse of the API rather than by storage.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            RelationError::InvalidArgument { .. }
                | RelationError::ConcurrentModification { .. }
                | RelationError::ReadOnly(_)
                | RelationError::UnknownField { .. }
                | RelationError::UnknownEntity(_)
                | RelationError::EntityRemoved(_)
        )
    }
}

impl From<serde_json::Error> for RelationError {
    fn from(err: serde_json::Error) -> Self {
        RelationError::Storage(err.to_string())
    }
}

/// Deployment-time wiring errors. These are fatal and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("Association '{association}' references unknown entity '{entity}'")]
    UnknownEntity { association: String, entity: String },

    #[error("Association '{association}' has no field on entity '{entity}'")]
    UnknownField { association: String, entity: String },

    #[error("Entity '{entity}' declares relationship field '{field}' more than once")]
    DuplicateField { entity: String, field: String },

    #[error("Entity type '{0}' is registered more than once")]
    DuplicateEntity(String),

    #[error("Association '{0}' has ambiguous foreign-key mapping")]
    AmbiguousForeignKey(String),

    #[error("Association '{association}' has an invalid foreign key: {message}")]
    InvalidForeignKey { association: String, message: String },

    #[error("Association '{association}': cascade delete on '{field}' requires a to-one inverse")]
    InvalidCascade { association: String, field: String },

    #[error("Invalid declaration: {0}")]
    InvalidDeclaration(String),
}

/// Configuration errors, shaped like the core crate's config errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: '{value}', expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Validation failed for {field}: {reason}")]
    ValidationFailed { field: String, reason: String },
}
