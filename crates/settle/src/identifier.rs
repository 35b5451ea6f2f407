//! Unique node and graph identifiers.

use std::fmt;

/// A process-unique identifier for a node, observer, or graph.
///
/// Identifiers are 128 bits drawn from the thread-local entropy source, so
/// the collision probability is negligible and ids are never reused. They
/// are comparable and orderable, which keeps id-keyed iteration
/// deterministic once an insertion order is fixed.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Identifier(u128);

impl Identifier {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(rand::random::<u128>())
    }

    /// The first eight hex characters, for diagnostics and dot labels.
    pub fn short(&self) -> String {
        format!("{:032x}", self.0)[..8].to_string()
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifiers_are_unique() {
        let a = Identifier::new();
        let b = Identifier::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_is_prefix_of_display() {
        let id = Identifier::new();
        let full = id.to_string();
        assert_eq!(full.len(), 32);
        assert!(full.starts_with(&id.short()));
        assert_eq!(id.short().len(), 8);
    }
}
