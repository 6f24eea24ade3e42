//! Fixed-indexed node storage with id reuse.
//!
//! Nodes and labels live in parallel slot arrays addressed by dense ids.
//! Capacity doubles on overflow; ids vacated by removal are queued for
//! reuse before the high-water mark advances. Readers clone the per-node
//! `Arc`, so a record stays addressable while any search still holds it —
//! reuse installs a fresh record in the slot and never frees the old one
//! in place.

use crate::graph::edges::EdgeList;
use crate::params::HnswParams;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A graph node: per-layer out-edges and (when removals are enabled)
/// per-layer in-edges, each behind its own read/write lock.
#[derive(Debug)]
pub struct Node {
    pub id: u32,
    /// Top layer this node participates in, assigned at creation.
    pub max_layer: usize,
    out: Vec<RwLock<EdgeList>>,
    ins: Vec<RwLock<EdgeList>>,
}

impl Node {
    pub fn new(id: u32, max_layer: usize, track_in: bool, params: &HnswParams) -> Self {
        let mut out = Vec::with_capacity(max_layer + 1);
        let mut ins = Vec::with_capacity(if track_in { max_layer + 1 } else { 0 });
        for layer in 0..=max_layer {
            out.push(RwLock::new(EdgeList::with_capacity(
                params.max_edges_at(layer) + 1,
            )));
            if track_in {
                ins.push(RwLock::new(EdgeList::default()));
            }
        }
        Self {
            id,
            max_layer,
            out,
            ins,
        }
    }

    /// Rebuild a node from snapshot adjacency, preserving its id.
    pub fn from_snapshot(
        id: u32,
        out_edges: Vec<Vec<u32>>,
        in_edges: Option<Vec<Vec<u32>>>,
    ) -> Self {
        let max_layer = out_edges.len().saturating_sub(1);
        let out = out_edges
            .into_iter()
            .map(|ids| {
                let mut list = EdgeList::with_capacity(ids.len() + 1);
                list.replace(&ids);
                RwLock::new(list)
            })
            .collect();
        let ins = in_edges
            .map(|layers| {
                layers
                    .into_iter()
                    .map(|ids| {
                        let mut list = EdgeList::default();
                        list.replace(&ids);
                        RwLock::new(list)
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            id,
            max_layer,
            out,
            ins,
        }
    }

    /// Whether reverse adjacency is maintained for this node.
    pub fn tracks_in(&self) -> bool {
        !self.ins.is_empty()
    }

    pub fn out_read(&self, layer: usize) -> RwLockReadGuard<'_, EdgeList> {
        self.out[layer].read()
    }

    pub fn out_write(&self, layer: usize) -> RwLockWriteGuard<'_, EdgeList> {
        self.out[layer].write()
    }

    pub fn in_read(&self, layer: usize) -> RwLockReadGuard<'_, EdgeList> {
        self.ins[layer].read()
    }

    pub fn in_write(&self, layer: usize) -> RwLockWriteGuard<'_, EdgeList> {
        self.ins[layer].write()
    }

    pub fn out_degree(&self, layer: usize) -> usize {
        if layer <= self.max_layer {
            self.out[layer].read().len()
        } else {
            0
        }
    }
}

/// Consistent read access to node records and labels.
///
/// Holding a view pins the slot arrays (growth waits for it to drop) so
/// traversal indexes without bounds races. Never hold a view while
/// blocking on a region lock.
pub struct ArenaView<'a, L> {
    nodes: RwLockReadGuard<'a, Vec<Option<Arc<Node>>>>,
    labels: RwLockReadGuard<'a, Vec<Option<L>>>,
}

impl<L> ArenaView<'_, L> {
    #[inline]
    pub fn node(&self, id: u32) -> Option<&Arc<Node>> {
        self.nodes.get(id as usize).and_then(|slot| slot.as_ref())
    }

    #[inline]
    pub fn label(&self, id: u32) -> Option<&L> {
        self.labels.get(id as usize).and_then(|slot| slot.as_ref())
    }
}

/// The node/label arena.
#[derive(Debug)]
pub struct Arena<L> {
    nodes: RwLock<Vec<Option<Arc<Node>>>>,
    labels: RwLock<Vec<Option<L>>>,
    free_ids: Mutex<VecDeque<u32>>,
    /// High-water mark: ids in `0..len` have been handed out at least once.
    len: AtomicUsize,
    /// Live node count.
    count: AtomicUsize,
}

impl<L> Arena<L> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut nodes = Vec::new();
        nodes.resize_with(capacity, || None);
        let mut labels = Vec::new();
        labels.resize_with(capacity, || None);
        Self {
            nodes: RwLock::new(nodes),
            labels: RwLock::new(labels),
            free_ids: Mutex::new(VecDeque::new()),
            len: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.nodes.read().len()
    }

    /// High-water mark of handed-out ids.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Number of live nodes.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn node(&self, id: u32) -> Option<Arc<Node>> {
        self.nodes
            .read()
            .get(id as usize)
            .and_then(|slot| slot.clone())
    }

    /// Whether the id currently names a live node.
    pub fn is_live(&self, id: u32) -> bool {
        self.labels
            .read()
            .get(id as usize)
            .map_or(false, |slot| slot.is_some())
    }

    pub fn view(&self) -> ArenaView<'_, L> {
        ArenaView {
            nodes: self.nodes.read(),
            labels: self.labels.read(),
        }
    }

    /// Allocate an id (reusing a freed one when available), install a fresh
    /// node record and label, and return the id together with the new
    /// capacity if the arena grew.
    pub fn insert(
        &self,
        max_layer: usize,
        label: L,
        track_in: bool,
        params: &HnswParams,
    ) -> (u32, Option<usize>) {
        let reused = self.free_ids.lock().pop_front();
        let mut grew = None;
        let id = {
            let mut nodes = self.nodes.write();
            let id = match reused {
                Some(id) => id,
                None => {
                    let id = self.len.fetch_add(1, Ordering::AcqRel) as u32;
                    if id as usize >= nodes.len() {
                        let new_cap = (nodes.len() * 2).max(id as usize + 1);
                        nodes.resize_with(new_cap, || None);
                        self.labels.write().resize_with(new_cap, || None);
                        grew = Some(new_cap);
                    }
                    id
                }
            };
            nodes[id as usize] = Some(Arc::new(Node::new(id, max_layer, track_in, params)));
            id
        };
        self.labels.write()[id as usize] = Some(label);
        self.count.fetch_add(1, Ordering::AcqRel);
        (id, grew)
    }

    /// Clear the label and queue the id for reuse. The node record stays
    /// in place so concurrent readers holding the id still observe a
    /// consistent (soon-stale) adjacency.
    pub fn remove(&self, id: u32) -> Option<L> {
        let label = self.labels.write().get_mut(id as usize)?.take();
        if label.is_some() {
            self.free_ids.lock().push_back(id);
            self.count.fetch_sub(1, Ordering::AcqRel);
        }
        label
    }

    /// Swap the label of a live node, returning the old one. A dead slot
    /// is left untouched and `None` is returned.
    pub fn set_label(&self, id: u32, label: L) -> Option<L> {
        let mut labels = self.labels.write();
        match labels.get_mut(id as usize) {
            Some(slot) if slot.is_some() => slot.replace(label),
            _ => None,
        }
    }

    /// Grow to at least `capacity`; returns the new capacity if growth
    /// happened.
    pub fn reserve(&self, capacity: usize) -> Option<usize> {
        let mut nodes = self.nodes.write();
        if capacity <= nodes.len() {
            return None;
        }
        nodes.resize_with(capacity, || None);
        self.labels.write().resize_with(capacity, || None);
        Some(capacity)
    }

    /// Ids of all live nodes, ascending.
    pub fn live_ids(&self) -> Vec<u32> {
        self.labels
            .read()
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| slot.as_ref().map(|_| id as u32))
            .collect()
    }

    pub fn free_ids_snapshot(&self) -> Vec<u32> {
        self.free_ids.lock().iter().copied().collect()
    }

    /// Rebuild an arena from snapshot parts (used by deserialization).
    pub fn from_parts(
        capacity: usize,
        len: usize,
        entries: Vec<(u32, L, Arc<Node>)>,
        free_ids: Vec<u32>,
    ) -> Self {
        let arena = Self::with_capacity(capacity.max(len));
        let count = entries.len();
        {
            let mut nodes = arena.nodes.write();
            let mut labels = arena.labels.write();
            for (id, label, node) in entries {
                nodes[id as usize] = Some(node);
                labels[id as usize] = Some(label);
            }
        }
        *arena.free_ids.lock() = free_ids.into();
        arena.len.store(len, Ordering::Release);
        arena.count.store(count, Ordering::Release);
        arena
    }
}
