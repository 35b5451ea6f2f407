//! The adjust-heights heap.
//!
//! When a new edge `parent -> child` would violate the height invariant
//! (`parent.height < child.height`), this structure walks the affected
//! descendants in height order, raising each one just far enough, and
//! re-buckets any raised node that sits in the recompute heap.

use parking_lot::Mutex;

use crate::node::{ErasedIncr, HEIGHT_UNSET};
use crate::node_set::NodeSet;
use crate::recompute_heap::RecomputeHeap;
use crate::{GraphError, Identifier};

pub(crate) struct AdjustHeightsHeap {
    inner: Mutex<AhInner>,
    max_height_allowed: i64,
}

struct AhInner {
    heights: Vec<NodeSet>,
    len: usize,
    min_height: i64,
    /// Largest height ever assigned through this heap.
    max_height_seen: i64,
}

impl AdjustHeightsHeap {
    pub fn new(max_height_allowed: usize) -> Self {
        // Buckets grow on demand; only the ceiling is fixed.
        let initial = max_height_allowed.min(256);
        let mut heights = Vec::with_capacity(initial);
        heights.resize_with(initial, NodeSet::new);
        Self {
            inner: Mutex::new(AhInner {
                heights,
                len: 0,
                min_height: HEIGHT_UNSET,
                max_height_seen: 0,
            }),
            max_height_allowed: max_height_allowed as i64,
        }
    }

    pub fn max_height_allowed(&self) -> i64 {
        self.max_height_allowed
    }

    pub fn max_height_seen(&self) -> i64 {
        self.inner.lock().max_height_seen
    }

    /// Raise `node` to `height` if that is an increase.
    ///
    /// Fails with [`GraphError::HeightTooLarge`] instead of assigning a
    /// height at or beyond the configured ceiling.
    pub fn set_height(&self, node: &ErasedIncr, height: i64) -> Result<(), GraphError> {
        if height >= self.max_height_allowed {
            return Err(GraphError::HeightTooLarge {
                height,
                max_height: self.max_height_allowed,
            });
        }
        let meta = node.meta();
        if height > meta.height() {
            meta.set_height(height);
            let mut inner = self.inner.lock();
            if height > inner.max_height_seen {
                inner.max_height_seen = height;
            }
        }
        Ok(())
    }

    /// Restore the height invariant after linking `parent -> child`.
    ///
    /// Raises `child` above `parent`, then walks raised nodes in height
    /// order pushing the raise through their children. Nodes whose height
    /// changed while queued in the recompute heap are re-bucketed there.
    pub fn adjust_heights(
        &self,
        recompute_heap: &RecomputeHeap,
        child: &ErasedIncr,
        parent: &ErasedIncr,
    ) -> Result<(), GraphError> {
        let mut raised: Vec<Identifier> = Vec::new();
        let result = self.adjust_heights_inner(child, parent, &mut raised);
        for id in raised {
            recompute_heap.fix(id);
        }
        result
    }

    fn adjust_heights_inner(
        &self,
        child: &ErasedIncr,
        parent: &ErasedIncr,
        raised: &mut Vec<Identifier>,
    ) -> Result<(), GraphError> {
        if let Err(err) = self.set_height(child, parent.meta().height() + 1) {
            return Err(err);
        }
        self.push(child.clone());
        raised.push(child.meta().id());

        while let Some(node) = self.pop_min() {
            let height = node.meta().height();
            let children = node.meta().children.lock().alive();
            for c in children {
                if c.meta().height() <= height {
                    if let Err(err) = self.set_height(&c, height + 1) {
                        self.drain();
                        return Err(err);
                    }
                    raised.push(c.meta().id());
                    self.push(c);
                }
            }
        }
        Ok(())
    }

    fn push(&self, node: ErasedIncr) {
        let mut inner = self.inner.lock();
        let meta = node.meta();
        let in_heap = meta.height_in_adjust_heights_heap();
        let height = meta.height().max(0);
        if in_heap == height {
            return;
        }
        if in_heap != HEIGHT_UNSET {
            // Re-bucket at the raised height.
            let removed = inner
                .heights
                .get_mut(in_heap.max(0) as usize)
                .map(|bucket| bucket.remove(meta.id()).is_some())
                .unwrap_or(false);
            if removed {
                inner.len -= 1;
            }
        }
        meta.set_height_in_adjust_heights_heap(height);
        let idx = height as usize;
        if inner.heights.len() <= idx {
            inner.heights.resize_with(idx + 1, NodeSet::new);
        }
        if inner.len == 0 || inner.min_height > height {
            inner.min_height = height;
        }
        if inner.heights[idx].push(node) {
            inner.len += 1;
        }
    }

    fn pop_min(&self) -> Option<ErasedIncr> {
        let mut inner = self.inner.lock();
        if inner.len == 0 {
            return None;
        }
        let start = inner.min_height.max(0) as usize;
        for h in start..inner.heights.len() {
            if inner.heights[h].is_empty() {
                continue;
            }
            let node = inner.heights[h].values()[0].clone();
            inner.heights[h].remove(node.meta().id());
            inner.len -= 1;
            inner.min_height = h as i64;
            node.meta().set_height_in_adjust_heights_heap(HEIGHT_UNSET);
            return Some(node);
        }
        None
    }

    /// Drop any queued work, clearing the per-node markers.
    fn drain(&self) {
        while self.pop_min().is_some() {}
    }

    /// Remove a node that is being detached from the graph.
    pub fn remove(&self, node: &ErasedIncr) {
        let mut inner = self.inner.lock();
        let meta = node.meta();
        let in_heap = meta.height_in_adjust_heights_heap();
        if in_heap == HEIGHT_UNSET {
            return;
        }
        let removed = inner
            .heights
            .get_mut(in_heap.max(0) as usize)
            .map(|bucket| bucket.remove(meta.id()).is_some())
            .unwrap_or(false);
        if removed {
            inner.len -= 1;
        }
        meta.set_height_in_adjust_heights_heap(HEIGHT_UNSET);
    }
}
