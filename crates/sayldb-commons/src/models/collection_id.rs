//! Identifier for one live collection within a session.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_COLLECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one live collection on the wire so the client can correlate
/// collection pushes with the query that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionId(u64);

impl CollectionId {
    /// Allocate the next process-unique collection id.
    pub fn next() -> Self {
        Self(NEXT_COLLECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = CollectionId::next();
        let b = CollectionId::next();
        assert_ne!(a, b);
    }
}
