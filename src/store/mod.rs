//! Ordered obsel storage for one trace.
//!
//! Obsels are kept in a B-tree keyed by `(begin, seq)` where `seq` is the
//! insertion sequence number, so iteration is by begin time with a stable
//! tie-break for equal timestamps.

use crate::change::{ChangeDescriptor, classify};
use crate::error::{Result, TraceError};
use crate::types::{Obsel, ObselId, Timestamp, TraceId};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;

mod batch;

pub use batch::{ObselBatch, ObselDraft};

/// Position of an obsel in its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObselKey {
    pub begin: Timestamp,
    pub seq: u64,
}

impl ObselKey {
    fn lower(bound: Bound<Timestamp>) -> Bound<ObselKey> {
        match bound {
            Bound::Included(begin) => Bound::Included(ObselKey { begin, seq: 0 }),
            Bound::Excluded(begin) => Bound::Excluded(ObselKey { begin, seq: u64::MAX }),
            Bound::Unbounded => Bound::Unbounded,
        }
    }

    fn upper(bound: Bound<Timestamp>) -> Bound<ObselKey> {
        match bound {
            Bound::Included(begin) => Bound::Included(ObselKey { begin, seq: u64::MAX }),
            Bound::Excluded(begin) => Bound::Excluded(ObselKey { begin, seq: 0 }),
            Bound::Unbounded => Bound::Unbounded,
        }
    }
}

/// Store statistics
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Number of obsels currently stored
    pub obsel_count: usize,
    /// Number of batches applied
    pub batches_applied: u64,
    /// Number of batches classified as strictly monotonic
    pub monotonic_batches: u64,
    /// Total obsels added over the store's lifetime
    pub added_total: u64,
    /// Total obsels removed over the store's lifetime
    pub removed_total: u64,
}

/// Ordered container of the obsels of one trace.
#[derive(Debug, Clone)]
pub struct ObselStore {
    trace: TraceId,
    obsels: BTreeMap<ObselKey, Obsel>,
    keys: FxHashMap<ObselId, ObselKey>,
    next_seq: u64,
    stats: StoreStats,
}

impl ObselStore {
    pub fn new(trace: TraceId) -> Self {
        Self {
            trace,
            obsels: BTreeMap::new(),
            keys: FxHashMap::default(),
            next_seq: 0,
            stats: StoreStats::default(),
        }
    }

    /// Build a store holding `obsels`, inserted in the given order.
    pub fn from_obsels<I>(trace: TraceId, obsels: I) -> Result<Self>
    where
        I: IntoIterator<Item = Obsel>,
    {
        let mut store = Self::new(trace);
        store.apply(obsels.into_iter().collect(), Vec::new())?;
        Ok(store)
    }

    pub fn trace(&self) -> &TraceId {
        &self.trace
    }

    pub fn len(&self) -> usize {
        self.obsels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obsels.is_empty()
    }

    pub fn get(&self, id: &ObselId) -> Option<&Obsel> {
        self.keys.get(id).and_then(|key| self.obsels.get(key))
    }

    pub fn key_of(&self, id: &ObselId) -> Option<ObselKey> {
        self.keys.get(id).copied()
    }

    pub fn contains(&self, id: &ObselId) -> bool {
        self.keys.contains_key(id)
    }

    /// All obsels in begin order.
    pub fn iter(&self) -> impl Iterator<Item = &Obsel> + '_ {
        self.obsels.values()
    }

    /// All obsels with their keys, in begin order.
    pub fn entries(&self) -> impl Iterator<Item = (ObselKey, &Obsel)> + '_ {
        self.obsels.iter().map(|(key, obsel)| (*key, obsel))
    }

    /// Obsels whose begin lies within the given bounds, in begin order.
    /// The iterator is lazy; calling `range` again restarts it.
    pub fn range(
        &self,
        from: Bound<Timestamp>,
        to: Bound<Timestamp>,
    ) -> impl Iterator<Item = &Obsel> + '_ {
        self.key_range(ObselKey::lower(from), ObselKey::upper(to))
            .map(|(_, obsel)| obsel)
    }

    /// Obsels strictly after `cursor` (all obsels when `cursor` is `None`).
    pub fn after(&self, cursor: Option<ObselKey>) -> impl Iterator<Item = (ObselKey, &Obsel)> + '_ {
        let lower = match cursor {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        self.key_range(lower, Bound::Unbounded)
    }

    fn key_range(
        &self,
        lower: Bound<ObselKey>,
        upper: Bound<ObselKey>,
    ) -> impl Iterator<Item = (ObselKey, &Obsel)> + '_ {
        let valid = match (&lower, &upper) {
            (
                Bound::Included(lo) | Bound::Excluded(lo),
                Bound::Included(hi) | Bound::Excluded(hi),
            ) => lo <= hi,
            _ => true,
        };
        valid
            .then(|| self.obsels.range((lower, upper)))
            .into_iter()
            .flatten()
            .map(|(key, obsel)| (*key, obsel))
    }

    /// Largest begin currently stored.
    pub fn max_begin(&self) -> Option<Timestamp> {
        self.last_key().map(|key| key.begin)
    }

    /// Key of the last obsel in store order.
    pub fn last_key(&self) -> Option<ObselKey> {
        self.obsels.keys().next_back().copied()
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = self.stats.clone();
        stats.obsel_count = self.obsels.len();
        stats
    }

    /// Add one obsel.
    pub fn insert(&mut self, obsel: Obsel) -> Result<ChangeDescriptor> {
        self.apply(vec![obsel], Vec::new())
    }

    /// Remove one obsel.
    pub fn remove(&mut self, id: &ObselId) -> Result<ChangeDescriptor> {
        self.apply(Vec::new(), vec![id.clone()])
    }

    /// Apply a batch of removals and additions atomically.
    ///
    /// The whole batch is validated before anything changes: an unknown
    /// removal or a duplicate addition leaves the store untouched. Removals
    /// are applied first, so an id may be removed and re-added in one batch.
    pub fn apply(&mut self, adds: Vec<Obsel>, removes: Vec<ObselId>) -> Result<ChangeDescriptor> {
        let mut removed_set: FxHashSet<&ObselId> = FxHashSet::default();
        let mut removed_begins = Vec::with_capacity(removes.len());
        for id in &removes {
            let key = match self.keys.get(id) {
                Some(key) if removed_set.insert(id) => key,
                _ => {
                    return Err(TraceError::ObselNotFound {
                        trace: self.trace.clone(),
                        obsel: id.clone(),
                    });
                }
            };
            removed_begins.push(key.begin);
        }

        let mut added_set: FxHashSet<&ObselId> = FxHashSet::default();
        for obsel in &adds {
            let id = obsel.id();
            let clashes = self.keys.contains_key(id) && !removed_set.contains(id);
            if clashes || !added_set.insert(id) {
                return Err(TraceError::DuplicateObsel {
                    trace: self.trace.clone(),
                    obsel: id.clone(),
                });
            }
        }

        let added_begins: Vec<Timestamp> = adds.iter().map(Obsel::begin).collect();
        let (kind, earliest_affected_begin) = classify(self.max_begin(), &added_begins, &removed_begins);

        for id in &removes {
            if let Some(key) = self.keys.remove(id) {
                self.obsels.remove(&key);
            }
        }

        let added: Vec<ObselId> = adds.iter().map(|obsel| obsel.id().clone()).collect();
        for obsel in adds {
            let key = ObselKey {
                begin: obsel.begin(),
                seq: self.next_seq,
            };
            self.next_seq += 1;
            self.keys.insert(obsel.id().clone(), key);
            self.obsels.insert(key, obsel);
        }

        self.stats.batches_applied += 1;
        self.stats.added_total += added.len() as u64;
        self.stats.removed_total += removes.len() as u64;
        if kind == crate::change::ChangeKind::StrictlyMonotonic {
            self.stats.monotonic_batches += 1;
        }

        Ok(ChangeDescriptor {
            trace: self.trace.clone(),
            kind,
            earliest_affected_begin,
            added,
            removed: removes,
        })
    }
}
