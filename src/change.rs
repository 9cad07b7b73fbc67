//! Classification of mutation batches applied to a trace.
//!
//! Every committed batch of additions and removals yields one
//! [`ChangeDescriptor`]. Dependent computed traces consume it once to decide
//! between resuming from saved state and recomputing.

use crate::types::{ObselId, Timestamp, TraceId};
use serde::{Deserialize, Serialize};

/// How a batch relates to the obsels that existed before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// Only additions, none beginning before the previous maximum begin.
    StrictlyMonotonic,
    /// Any removal, or any addition inserted before the previous maximum.
    NonMonotonic,
}

/// Description of one committed batch on a trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDescriptor {
    pub trace: TraceId,
    pub kind: ChangeKind,
    /// Minimum begin among added and removed obsels. `None` when unknown, in
    /// which case consumers must rescan the whole trace.
    pub earliest_affected_begin: Option<Timestamp>,
    pub added: Vec<ObselId>,
    pub removed: Vec<ObselId>,
}

impl ChangeDescriptor {
    /// Descriptor for a change whose extent is unknown.
    pub fn full_rescan(trace: TraceId) -> Self {
        Self {
            trace,
            kind: ChangeKind::NonMonotonic,
            earliest_affected_begin: None,
            added: Vec::new(),
            removed: Vec::new(),
        }
    }

    /// No obsel was added or removed. A full-rescan descriptor is never empty.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.is_monotonic()
    }

    pub fn is_monotonic(&self) -> bool {
        self.kind == ChangeKind::StrictlyMonotonic
    }
}

/// Classify a batch given the maximum begin that existed before it.
///
/// Returns the change kind and the earliest affected begin.
///
/// ```
/// use tracekit::change::{classify, ChangeKind};
///
/// assert_eq!(classify(Some(10), &[10, 12], &[]), (ChangeKind::StrictlyMonotonic, Some(10)));
/// assert_eq!(classify(Some(10), &[9], &[]), (ChangeKind::NonMonotonic, Some(9)));
/// assert_eq!(classify(Some(10), &[20], &[3]), (ChangeKind::NonMonotonic, Some(3)));
/// assert_eq!(classify(None, &[5, 1], &[]), (ChangeKind::StrictlyMonotonic, Some(1)));
/// ```
pub fn classify(
    previous_max: Option<Timestamp>,
    added: &[Timestamp],
    removed: &[Timestamp],
) -> (ChangeKind, Option<Timestamp>) {
    let earliest = added.iter().chain(removed.iter()).copied().min();

    let in_order = match previous_max {
        Some(max) => added.iter().all(|&begin| begin >= max),
        None => true,
    };

    let kind = if removed.is_empty() && in_order {
        ChangeKind::StrictlyMonotonic
    } else {
        ChangeKind::NonMonotonic
    };

    (kind, earliest)
}
