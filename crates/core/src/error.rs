//! Error types for shoal
//!
//! This module defines the error taxonomy shared by every layer.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! The variants fall into four groups:
//! - caller errors (`BadParameter`, `Unsupported`, `IllegalName`): no state change
//! - lifecycle and concurrency errors (`NotFound`, `AlreadyExists`,
//!   `CollectionUnavailable`, `UniqueConstraintViolated`, `Locked`)
//! - resource errors (`Io`, `ResourceExhausted`, `Serialization`)
//! - corruption (`Corrupted`), terminal for a collection until repaired

use crate::types::CollectionStatus;
use std::io;
use thiserror::Error;

/// Result type alias for shoal operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the shoal database
#[derive(Debug, Error)]
pub enum Error {
    /// Collection, document or index does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Name or identifier is already taken
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A unique index already maps the key to another live document
    #[error("unique constraint violated in index {index}: key {key}")]
    UniqueConstraintViolated {
        /// Index identifier
        index: u64,
        /// Rendered key tuple
        key: String,
    },

    /// Malformed condition tree, field/index mismatch, wrong literal type
    #[error("bad parameter: {0}")]
    BadParameter(String),

    /// Operator is not supported by the addressed index kind
    #[error("operator {operator} is not supported by {index_kind} index")]
    Unsupported {
        /// Index kind name
        index_kind: &'static str,
        /// Operator name
        operator: &'static str,
    },

    /// Collection cannot be used in its current status
    #[error("collection '{name}' is not available (status {status})")]
    CollectionUnavailable {
        /// Collection name
        name: String,
        /// Status observed when the use was attempted
        status: CollectionStatus,
    },

    /// Collection or database name violates the naming rules
    #[error("illegal name: {0}")]
    IllegalName(String),

    /// Resource is locked by someone else (e.g. database directory)
    #[error("locked: {0}")]
    Locked(String),

    /// Unreadable on-disk data detected
    #[error("data corruption: {0}")]
    Corrupted(String),

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// In-memory structure could not be allocated at the required size
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl Error {
    /// Build a `BadParameter` error from any displayable message
    pub fn bad_parameter(msg: impl Into<String>) -> Self {
        Error::BadParameter(msg.into())
    }

    /// Build a `NotFound` error from any displayable message
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Build a `Corrupted` error from any displayable message
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Error::Corrupted(msg.into())
    }

    /// Whether this error leaves the collection permanently unusable
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corrupted(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
