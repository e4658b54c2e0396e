//! Visited-constraint storage with subsumption.

use crate::constraint::Constraint;
use dashmap::DashMap;
use fencer_model::StateId;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Stored constraints, bucketed by a fingerprint of their control vector.
///
/// Constraints with different control vectors never subsume each other, so
/// each insert only has to look at one bucket. Buckets are `DashMap` entries:
/// concurrent inserts are linearizable per bucket.
pub struct Container {
    buckets: DashMap<u64, Vec<Arc<Constraint>>>,
    len: AtomicUsize,
    evicted: AtomicUsize,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

fn control_fingerprint(control: &[StateId]) -> u64 {
    let mut hasher = ahash::AHasher::default();
    control.hash(&mut hasher);
    hasher.finish()
}

impl Container {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            len: AtomicUsize::new(0),
            evicted: AtomicUsize::new(0),
        }
    }

    /// Store `constraint` unless a stored constraint already entails it.
    /// Stored constraints it entails are dropped. Returns whether it was novel.
    pub fn insert(&self, constraint: &Arc<Constraint>) -> bool {
        let fp = control_fingerprint(constraint.control());
        let mut bucket = self.buckets.entry(fp).or_default();
        if bucket.iter().any(|stored| constraint.entails(stored)) {
            return false;
        }
        let before = bucket.len();
        bucket.retain(|stored| !stored.entails(constraint));
        let dropped = before - bucket.len();
        bucket.push(Arc::clone(constraint));
        drop(bucket);

        if dropped > 0 {
            self.len.fetch_sub(dropped, Ordering::Relaxed);
            self.evicted.fetch_add(dropped, Ordering::Relaxed);
        }
        self.len.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Whether some stored constraint entails `constraint`.
    pub fn contains_entailing(&self, constraint: &Constraint) -> bool {
        let fp = control_fingerprint(constraint.control());
        self.buckets
            .get(&fp)
            .is_some_and(|bucket| bucket.iter().any(|stored| constraint.entails(stored)))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Constraints dropped because a later insert entailed them.
    pub fn evicted(&self) -> usize {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Every stored constraint, in no particular order.
    pub fn snapshot(&self) -> Vec<Arc<Constraint>> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.value().clone())
            .collect()
    }
}
