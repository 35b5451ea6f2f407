//! Insertion-ordered, id-keyed node containers.
//!
//! The graph keeps every relationship (`parents`, `children`, `observers`,
//! heap buckets) in sets keyed by [`Identifier`] that iterate in insertion
//! order, so traversal is deterministic for tests. Child- and
//! observer-facing sets hold weak handles: a linked pair would otherwise
//! form a strong reference cycle.

use std::sync::Weak;

use indexmap::IndexMap;

use crate::node::{ErasedIncr, ErasedNode};
use crate::Identifier;

type Hasher = ahash::RandomState;

/// An insertion-ordered set of strong node handles, keyed by id.
#[derive(Default)]
pub(crate) struct NodeSet {
    items: IndexMap<Identifier, ErasedIncr, Hasher>,
}

impl NodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, keeping the first insertion's position.
    ///
    /// Returns `true` if the node was not already present.
    pub fn push(&mut self, node: ErasedIncr) -> bool {
        let id = node.meta().id();
        if self.items.contains_key(&id) {
            return false;
        }
        self.items.insert(id, node);
        true
    }

    /// Remove by id, preserving the order of the remaining entries.
    pub fn remove(&mut self, id: Identifier) -> Option<ErasedIncr> {
        self.items.shift_remove(&id)
    }

    pub fn contains(&self, id: Identifier) -> bool {
        self.items.contains_key(&id)
    }

    pub fn get(&self, id: Identifier) -> Option<&ErasedIncr> {
        self.items.get(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Handles in insertion order.
    pub fn values(&self) -> Vec<ErasedIncr> {
        self.items.values().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// An insertion-ordered set of weak node handles, keyed by id.
///
/// Dead entries are skipped on read and compacted on write.
#[derive(Default)]
pub(crate) struct WeakNodeSet {
    items: IndexMap<Identifier, Weak<dyn ErasedNode>, Hasher>,
}

impl WeakNodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a weak handle to `node`. Returns `true` if newly inserted.
    pub fn push(&mut self, node: &ErasedIncr) -> bool {
        let id = node.meta().id();
        if let Some(existing) = self.items.get(&id) {
            if existing.strong_count() > 0 {
                return false;
            }
        }
        self.items.insert(id, erased_downgrade(node));
        true
    }

    pub fn remove(&mut self, id: Identifier) -> bool {
        self.items.shift_remove(&id).is_some()
    }

    pub fn contains(&self, id: Identifier) -> bool {
        self.items
            .get(&id)
            .map(|w| w.strong_count() > 0)
            .unwrap_or(false)
    }

    /// Upgradeable handles in insertion order, compacting dead entries.
    pub fn alive(&mut self) -> Vec<ErasedIncr> {
        self.items.retain(|_, weak| weak.strong_count() > 0);
        self.items
            .values()
            .filter_map(|weak| weak.upgrade())
            .collect()
    }

    /// The number of live entries.
    pub fn len_alive(&mut self) -> usize {
        self.items.retain(|_, weak| weak.strong_count() > 0);
        self.items.len()
    }

    pub fn is_empty_alive(&mut self) -> bool {
        self.len_alive() == 0
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

fn erased_downgrade(node: &ErasedIncr) -> Weak<dyn ErasedNode> {
    std::sync::Arc::downgrade(node)
}
