//! Error types for data-access operations.

use thiserror::Error;

/// Result type for data-access operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while composing or dispatching commands.
///
/// Driver and BSON failures are passed through unchanged: this layer never
/// wraps, retries, or reinterprets what the store client reports.
#[derive(Error, Debug)]
pub enum Error {
    /// MongoDB driver error.
    #[error("mongodb error: {0}")]
    Driver(#[from] mongodb::error::Error),

    /// BSON serialization error.
    #[error("bson error: {0}")]
    BsonSer(#[from] bson::ser::Error),

    /// BSON deserialization error.
    #[error("bson deserialization error: {0}")]
    BsonDe(#[from] bson::de::Error),

    /// A builder was configured incorrectly (projection or distinct field
    /// set twice, or required but missing). Raised before any store call.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A lifecycle rule was violated (factory default set twice, convention
    /// added after registration closed, transaction state misuse).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Invalid input: illegal collection name, malformed filter fragment,
    /// or a capability the entity type does not declare.
    #[error("validation error: {0}")]
    Validation(String),

    /// A get-and-execute operation matched zero documents where the
    /// contract requires one.
    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Check if this is a configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Check if this is an invalid operation error.
    pub fn is_invalid_operation(&self) -> bool {
        matches!(self, Self::InvalidOperation(_))
    }

    /// Check if this is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this error originated in the store client or the BSON layer.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Driver(_) | Self::BsonSer(_) | Self::BsonDe(_))
    }
}
