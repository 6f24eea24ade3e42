//! Per-search "seen" tracking, pooled across threads.
//!
//! A throughput workload cannot afford a fresh hash set per query, so a
//! [`VisitedSet`] keeps one stamp word per node id and a round counter:
//! an id counts as seen when its stamp equals the current round, and
//! starting the next search is a single counter bump instead of a wipe.
//! Stamp storage is wiped for real only when the round counter wraps.
//! Sets live in a mutex-guarded pool ([`VisitedPool`]); checkout, search,
//! and return on drop.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Round-stamped membership set over dense ids.
///
/// Ids past the current storage length are handled by growing in
/// power-of-two steps, so a search racing arena growth never faults.
#[derive(Debug)]
pub struct VisitedSet {
    stamps: Vec<u16>,
    round: u16,
}

impl VisitedSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            stamps: vec![0; capacity],
            round: 1,
        }
    }

    /// Start a new search round. O(1) except when the round counter
    /// wraps, which triggers the deferred wipe of the stamp storage.
    pub fn begin(&mut self) {
        self.round = self.round.wrapping_add(1);
        if self.round == 0 {
            self.stamps.fill(0);
            self.round = 1;
        }
    }

    /// Grow storage to cover at least `capacity` ids.
    pub fn grow(&mut self, capacity: usize) {
        if self.stamps.len() < capacity {
            self.stamps.resize(capacity, 0);
        }
    }

    /// Stamp `id` for the current round. Returns `true` exactly once per
    /// round per id.
    #[inline]
    pub fn first_visit(&mut self, id: u32) -> bool {
        let idx = id as usize;
        if idx >= self.stamps.len() {
            let grown = (idx + 1).next_power_of_two();
            self.stamps.resize(grown, 0);
        }
        let slot = &mut self.stamps[idx];
        if *slot == self.round {
            return false;
        }
        *slot = self.round;
        true
    }

    #[cfg(test)]
    fn capacity(&self) -> usize {
        self.stamps.len()
    }
}

/// A mutex-guarded stack of reusable [`VisitedSet`]s.
///
/// Checkout-modify-return: [`VisitedPool::checkout`] pops a set (or makes
/// one sized to the current capacity hint) and starts a fresh round on
/// it; dropping the handle returns the set.
#[derive(Debug)]
pub struct VisitedPool {
    idle: Mutex<Vec<VisitedSet>>,
    capacity: AtomicUsize,
}

impl VisitedPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            capacity: AtomicUsize::new(capacity),
        }
    }

    /// Raise the capacity hint after arena growth. Pooled sets grow
    /// lazily at their next checkout.
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.fetch_max(capacity, Ordering::Relaxed);
    }

    /// Take a set with a fresh round, sized to the current capacity hint.
    pub fn checkout(&self) -> PooledVisited<'_> {
        let hint = self.capacity.load(Ordering::Relaxed);
        let mut set = self
            .idle
            .lock()
            .pop()
            .unwrap_or_else(|| VisitedSet::with_capacity(hint));
        set.grow(hint);
        set.begin();
        PooledVisited {
            pool: self,
            set: Some(set),
        }
    }
}

/// Handle over a checked-out [`VisitedSet`]; returns it to the pool on drop.
#[derive(Debug)]
pub struct PooledVisited<'a> {
    pool: &'a VisitedPool,
    set: Option<VisitedSet>,
}

impl Deref for PooledVisited<'_> {
    type Target = VisitedSet;

    fn deref(&self) -> &VisitedSet {
        self.set.as_ref().expect("set present until drop")
    }
}

impl DerefMut for PooledVisited<'_> {
    fn deref_mut(&mut self) -> &mut VisitedSet {
        self.set.as_mut().expect("set present until drop")
    }
}

impl Drop for PooledVisited<'_> {
    fn drop(&mut self) {
        if let Some(set) = self.set.take() {
            self.pool.idle.lock().push(set);
        }
    }
}
