// Error types module
use thiserror::Error;

/// Main error type for the SaylDB sync subsystem
#[derive(Error, Debug)]
pub enum SaylDbError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("{0}")]
    Other(String),
}

/// Storage-related errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("Entity not found: {entity_type}/{id}")]
    EntityNotFound { entity_type: String, id: String },

    #[error("Missing primary key '{key}' in row for {entity_type}")]
    MissingPrimaryKey { entity_type: String, key: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SaylDbError>;

impl StoreError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        StoreError::Validation(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        StoreError::Other(msg.into())
    }
}

impl SaylDbError {
    /// Create a not found error
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        SaylDbError::NotFound(what.into())
    }

    /// Create an invalid operation error
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        SaylDbError::InvalidOperation(msg.into())
    }

    /// Create an invalid filter error
    pub fn invalid_filter<S: Into<String>>(msg: S) -> Self {
        SaylDbError::InvalidFilter(msg.into())
    }

    /// Create a schema error
    pub fn schema_error<S: Into<String>>(msg: S) -> Self {
        SaylDbError::SchemaError(msg.into())
    }

    /// Create a conflict error
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        SaylDbError::Conflict(msg.into())
    }
}

// Conversion from String to SaylDbError
impl From<String> for SaylDbError {
    fn from(msg: String) -> Self {
        SaylDbError::Other(msg)
    }
}

// Conversion from anyhow::Error to SaylDbError
impl From<anyhow::Error> for SaylDbError {
    fn from(err: anyhow::Error) -> Self {
        SaylDbError::Other(err.to_string())
    }
}
