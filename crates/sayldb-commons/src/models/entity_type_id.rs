//! Type-safe wrapper for entity type names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type-safe wrapper for an entity type name (analogous to a table name).
///
/// Entity types are stable interned-style identifiers: sessions key their
/// subscription and delivery state by `(EntityTypeId, EntityId)` composite
/// keys rather than by runtime type handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityTypeId(String);

impl EntityTypeId {
    /// Creates a new EntityTypeId from a string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the entity type name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the wrapper and returns the inner String.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for EntityTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EntityTypeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EntityTypeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for EntityTypeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
