//! Compact adjacency lists.
//!
//! An [`EdgeList`] is a small dense array of node ids with inline storage
//! for short lists. Removal is unordered (swap with last); the graph
//! algorithms never rely on edge order.

use smallvec::SmallVec;

/// Ids stored inline before spilling to the heap. Upper-layer lists are
/// capped at `max_edges` and commonly shorter than this.
const INLINE_EDGES: usize = 8;

/// A per-layer neighbor list.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EdgeList {
    ids: SmallVec<[u32; INLINE_EDGES]>,
}

impl EdgeList {
    /// Create an empty list sized for the layer's degree cap.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            ids: SmallVec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.ids.contains(&id)
    }

    /// Append an id. The caller maintains the no-duplicate invariant.
    pub fn push(&mut self, id: u32) {
        self.ids.push(id);
    }

    /// Append an id unless already present. Returns whether it was added.
    pub fn push_unique(&mut self, id: u32) -> bool {
        if self.contains(id) {
            false
        } else {
            self.ids.push(id);
            true
        }
    }

    /// Unordered remove: swap with the last element and shrink.
    /// Returns whether the id was present.
    pub fn remove(&mut self, id: u32) -> bool {
        match self.ids.iter().position(|&x| x == id) {
            Some(pos) => {
                self.ids.swap_remove(pos);
                true
            }
            None => false,
        }
    }

    /// Replace the whole list.
    pub fn replace(&mut self, ids: &[u32]) {
        self.ids.clear();
        self.ids.extend_from_slice(ids);
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.ids
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.ids.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<u32> {
        self.ids.to_vec()
    }
}
