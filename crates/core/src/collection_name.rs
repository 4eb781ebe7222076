//! Collection name type
//!
//! ## Validation
//!
//! Collection names must:
//! - Be 1-64 characters
//! - Contain only ASCII alphanumeric, dash, underscore
//! - Start with a letter, or with `_` for system collections

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a collection name
pub const MAX_COLLECTION_NAME_LENGTH: usize = 64;

/// Prefix reserved for system collections
pub const SYSTEM_PREFIX: char = '_';

/// Validated collection name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionName(String);

/// Error when validating a collection name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionNameError {
    /// Name is empty
    Empty,
    /// Name exceeds maximum length
    TooLong {
        /// Actual length of the name
        length: usize,
        /// Maximum allowed length
        max: usize,
    },
    /// Name contains invalid character
    InvalidChar {
        /// The invalid character
        char: char,
        /// Position of the invalid character
        position: usize,
    },
    /// Name starts with invalid character
    InvalidStart {
        /// The invalid starting character
        char: char,
    },
    /// Name uses the system prefix without being a system collection
    ReservedPrefix,
}

impl fmt::Display for CollectionNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionNameError::Empty => write!(f, "collection name cannot be empty"),
            CollectionNameError::TooLong { length, max } => {
                write!(f, "collection name too long: {} chars (max {})", length, max)
            }
            CollectionNameError::InvalidChar { char, position } => write!(
                f,
                "invalid character '{}' at position {} (only alphanumeric, dash, underscore allowed)",
                char, position
            ),
            CollectionNameError::InvalidStart { char } => {
                write!(f, "collection name cannot start with '{}'", char)
            }
            CollectionNameError::ReservedPrefix => write!(
                f,
                "names starting with '{}' are reserved for system collections",
                SYSTEM_PREFIX
            ),
        }
    }
}

impl std::error::Error for CollectionNameError {}

impl From<CollectionNameError> for Error {
    fn from(e: CollectionNameError) -> Self {
        Error::IllegalName(e.to_string())
    }
}

impl CollectionName {
    /// Validate and wrap a user collection name
    pub fn new(name: impl Into<String>) -> Result<Self, CollectionNameError> {
        let name = name.into();
        Self::validate(&name, false)?;
        Ok(CollectionName(name))
    }

    /// Validate and wrap a system collection name (must start with `_`)
    pub fn system(name: impl Into<String>) -> Result<Self, CollectionNameError> {
        let name = name.into();
        Self::validate(&name, true)?;
        Ok(CollectionName(name))
    }

    /// Validate a name
    ///
    /// With `is_system` set, a leading `_` is permitted.
    pub fn validate(name: &str, is_system: bool) -> Result<(), CollectionNameError> {
        let first = match name.chars().next() {
            Some(c) => c,
            None => return Err(CollectionNameError::Empty),
        };

        if name.len() > MAX_COLLECTION_NAME_LENGTH {
            return Err(CollectionNameError::TooLong {
                length: name.len(),
                max: MAX_COLLECTION_NAME_LENGTH,
            });
        }

        if first == SYSTEM_PREFIX {
            if !is_system {
                return Err(CollectionNameError::ReservedPrefix);
            }
        } else if !first.is_ascii_alphabetic() {
            return Err(CollectionNameError::InvalidStart { char: first });
        }

        for (pos, ch) in name.chars().enumerate() {
            if !(ch.is_ascii_alphanumeric() || ch == '-' || ch == '_') {
                return Err(CollectionNameError::InvalidChar {
                    char: ch,
                    position: pos,
                });
            }
        }

        Ok(())
    }

    /// Whether the name carries the system prefix
    pub fn is_system(&self) -> bool {
        self.0.starts_with(SYSTEM_PREFIX)
    }

    /// Get the name as a string slice
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for CollectionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for CollectionName {
    type Error = CollectionNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        CollectionName::new(value)
    }
}

// ============================================================================
// Tests
// ============================================================================
