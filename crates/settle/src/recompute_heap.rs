//! The height-bucketed recompute heap.
//!
//! Pending nodes sit in buckets indexed by their pseudo-height. A
//! stabilization pass drains the smallest non-empty bucket at a time, so a
//! node is never recomputed before every parent it reads from.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::node::{ErasedIncr, HEIGHT_UNSET};
use crate::node_set::NodeSet;
use crate::Identifier;

type Hasher = ahash::RandomState;

/// Height-ordered pending work, shared across threads.
///
/// The internal lock is held only for the duration of each operation, never
/// across user callbacks, so variables can be set (and thereby enqueued)
/// from other threads while a pass runs.
pub(crate) struct RecomputeHeap {
    inner: Mutex<HeapInner>,
}

struct HeapInner {
    /// Buckets indexed by height; grown on demand.
    heights: Vec<NodeSet>,
    /// Fast membership and removal by id.
    lookup: HashMap<Identifier, ErasedIncr, Hasher>,
    /// Smallest non-empty bucket, or `HEIGHT_UNSET` when empty.
    min_height: i64,
    /// Largest non-empty bucket seen since the last emptying.
    max_height: i64,
}

impl RecomputeHeap {
    pub fn new(initial_height: usize) -> Self {
        // Buckets grow on demand; cap the upfront allocation for graphs
        // configured with very large height ceilings.
        let initial_height = initial_height.min(256);
        let mut heights = Vec::with_capacity(initial_height);
        heights.resize_with(initial_height, NodeSet::new);
        Self {
            inner: Mutex::new(HeapInner {
                heights,
                lookup: HashMap::default(),
                min_height: HEIGHT_UNSET,
                max_height: HEIGHT_UNSET,
            }),
        }
    }

    /// Place `node` into the bucket for its current height.
    ///
    /// Idempotent when the node is already present.
    pub fn add(&self, node: ErasedIncr) {
        let mut inner = self.inner.lock();
        inner.add_node(node);
    }

    /// Re-bucket a node whose height changed externally. No-op when absent.
    pub fn fix(&self, id: Identifier) {
        let mut inner = self.inner.lock();
        if let Some(node) = inner.remove_by_id(id) {
            inner.add_node(node);
        }
    }

    /// Pop one node from the smallest non-empty bucket.
    pub fn remove_min(&self) -> Option<ErasedIncr> {
        let mut inner = self.inner.lock();
        if inner.lookup.is_empty() {
            return None;
        }
        let height = inner.min_height.max(0) as usize;
        for h in height..inner.heights.len() {
            if inner.heights[h].is_empty() {
                continue;
            }
            let node = inner.heights[h].values()[0].clone();
            inner.remove_entry(&node);
            return Some(node);
        }
        None
    }

    /// Drain the entire smallest non-empty bucket.
    ///
    /// The returned nodes all sit at one height, so they are independent of
    /// each other and form one batch of the stabilization pass.
    pub fn remove_min_height(&self) -> Vec<ErasedIncr> {
        let mut inner = self.inner.lock();
        if inner.lookup.is_empty() {
            return Vec::new();
        }
        let start = inner.min_height.max(0) as usize;
        for height in start..inner.heights.len() {
            if inner.heights[height].is_empty() {
                continue;
            }
            let batch = inner.heights[height].values();
            inner.heights[height].clear();
            for node in &batch {
                node.meta().set_height_in_recompute_heap(HEIGHT_UNSET);
                inner.lookup.remove(&node.meta().id());
            }
            inner.min_height = height as i64;
            inner.min_height = inner.next_min_height();
            return batch;
        }
        Vec::new()
    }

    /// Remove a specific node. Returns whether it was present.
    pub fn remove(&self, node: &ErasedIncr) -> bool {
        let mut inner = self.inner.lock();
        inner.remove_by_id(node.meta().id()).is_some()
    }

    pub fn has(&self, id: Identifier) -> bool {
        self.inner.lock().lookup.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lookup.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        for bucket in &mut inner.heights {
            for node in bucket.values() {
                node.meta().set_height_in_recompute_heap(HEIGHT_UNSET);
            }
            bucket.clear();
        }
        inner.lookup.clear();
        inner.min_height = HEIGHT_UNSET;
        inner.max_height = HEIGHT_UNSET;
    }

    /// Verify the lookup table, bucket membership, and recorded heights
    /// agree. Used by tests and the fuzz validator.
    pub fn sanity_check(&self) -> Result<(), String> {
        let inner = self.inner.lock();
        if !inner.lookup.is_empty() {
            let min = inner.min_height.max(0) as usize;
            if inner.heights.get(min).map(NodeSet::is_empty).unwrap_or(true) {
                return Err(format!(
                    "recompute heap: lookup has {} items but the bucket at min height {} is empty",
                    inner.lookup.len(),
                    min
                ));
            }
        }
        let mut bucketed = 0usize;
        for (height, bucket) in inner.heights.iter().enumerate() {
            for node in bucket.values() {
                bucketed += 1;
                let meta = node.meta();
                if meta.height_in_recompute_heap() != height as i64 {
                    return Err(format!(
                        "recompute heap: node {} in bucket {} records heap height {}",
                        meta.id().short(),
                        height,
                        meta.height_in_recompute_heap()
                    ));
                }
                if meta.height_in_recompute_heap() != meta.height() {
                    return Err(format!(
                        "recompute heap: node {} has height {} but sits at heap height {}",
                        meta.id().short(),
                        meta.height(),
                        meta.height_in_recompute_heap()
                    ));
                }
                if !inner.lookup.contains_key(&meta.id()) {
                    return Err(format!(
                        "recompute heap: node {} bucketed but missing from lookup",
                        meta.id().short()
                    ));
                }
            }
        }
        if bucketed != inner.lookup.len() {
            return Err(format!(
                "recompute heap: {} bucketed nodes but {} lookup entries",
                bucketed,
                inner.lookup.len()
            ));
        }
        Ok(())
    }
}

impl HeapInner {
    fn add_node(&mut self, node: ErasedIncr) {
        let meta = node.meta();
        if self.lookup.contains_key(&meta.id()) {
            return;
        }
        let height = meta.height().max(0);
        meta.set_height_in_recompute_heap(height);
        self.update_min_max(height);
        self.grow_to(height as usize);
        self.heights[height as usize].push(node.clone());
        self.lookup.insert(meta.id(), node);
    }

    fn remove_by_id(&mut self, id: Identifier) -> Option<ErasedIncr> {
        let node = self.lookup.get(&id).cloned()?;
        self.remove_entry(&node);
        Some(node)
    }

    fn remove_entry(&mut self, node: &ErasedIncr) {
        let meta = node.meta();
        let height = meta.height_in_recompute_heap().max(0) as usize;
        self.lookup.remove(&meta.id());
        let emptied_bucket = match self.heights.get_mut(height) {
            Some(bucket) => {
                bucket.remove(meta.id());
                bucket.is_empty()
            }
            None => false,
        };
        if height as i64 == self.min_height && emptied_bucket {
            self.min_height = self.next_min_height();
        }
        meta.set_height_in_recompute_heap(HEIGHT_UNSET);
    }

    fn update_min_max(&mut self, height: i64) {
        if self.lookup.is_empty() {
            self.min_height = height;
            self.max_height = height;
            return;
        }
        if self.min_height > height {
            self.min_height = height;
        }
        if self.max_height < height {
            self.max_height = height;
        }
    }

    fn grow_to(&mut self, height: usize) {
        if self.heights.len() <= height {
            self.heights.resize_with(height + 1, NodeSet::new);
        }
    }

    /// The next smallest non-empty bucket, or `HEIGHT_UNSET` when drained.
    fn next_min_height(&self) -> i64 {
        if self.lookup.is_empty() {
            return HEIGHT_UNSET;
        }
        let start = self.min_height.max(0) as usize;
        for height in start..self.heights.len() {
            if !self.heights[height].is_empty() {
                return height as i64;
            }
        }
        HEIGHT_UNSET
    }
}
