//! Incremental recompute protocol shared by all methods.
//!
//! [`Driver::run`] is pure: it reads the sources, the committed derived obsels
//! and the saved computation state, and returns the delta to commit together
//! with the state to save. Nothing is written until the whole run succeeded,
//! which keeps commits all-or-nothing per notification.

use crate::change::ChangeDescriptor;
use crate::config::EngineConfig;
use crate::error::{Result, TraceError};
use crate::method::{DerivedSet, MethodContext, Replay, TransformMethod};
use crate::storage::ComputationState;
use crate::store::{ObselKey, ObselStore};
use crate::types::{Obsel, ObselId, Timestamp, TraceId};

/// Why a computed trace is being recomputed.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// The computed trace was just created.
    Initial,
    /// Source `source` committed a batch.
    Change {
        source: usize,
        change: ChangeDescriptor,
    },
    /// Explicit refresh: always recompute from scratch.
    Forced,
}

/// How a run was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputeMode {
    /// Only the appended obsels were processed.
    Incremental,
    /// The suffix starting at this begin was replayed.
    Partial(Timestamp),
    Full,
    /// Nothing to do.
    Unchanged,
}

/// Everything one run needs to know about a computed trace.
#[derive(Debug)]
pub struct Job<'a> {
    pub trace: &'a TraceId,
    pub method: &'a dyn TransformMethod,
    pub fingerprint: u64,
    /// Source stores, primary first
    pub sources: &'a [&'a ObselStore],
    /// Obsels currently committed to the computed trace
    pub current: &'a ObselStore,
    /// State saved by the previous run, if any
    pub state: Option<ComputationState>,
    /// Commit generation of the computed trace
    pub generation: u64,
    /// The previous run failed, saved state cannot be trusted
    pub stale: bool,
    pub trigger: Trigger,
}

/// Result of a run: the delta to commit and the state to save.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// Obsels to add, ordered by `(begin, id)`
    pub added: Vec<Obsel>,
    pub removed: Vec<ObselId>,
    pub state: ComputationState,
    pub mode: RecomputeMode,
}

impl Outcome {
    /// The run leaves the derived obsels as they were.
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Driver {
    config: EngineConfig,
}

impl Driver {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run(&self, job: Job<'_>) -> Result<Outcome> {
        let cx = MethodContext {
            trace: job.trace,
            sources: job.sources,
            config: &self.config,
        };
        let saved = self.usable_state(&job);

        let (change, state) = match (&job.trigger, saved) {
            (Trigger::Change { source, change }, Some(state)) => ((*source, change), state),
            (trigger, _) => {
                log::debug!("{}: full recompute ({:?})", job.trace, TriggerName(trigger));
                return self.full(&cx, &job);
            }
        };

        let (source, change) = change;
        if change.is_empty() {
            return Ok(Outcome {
                added: Vec::new(),
                removed: Vec::new(),
                state,
                mode: RecomputeMode::Unchanged,
            });
        }

        let attempt = if change.is_monotonic() {
            self.incremental(&cx, &job, source, state)
        } else {
            match change.earliest_affected_begin {
                Some(from) if self.config.partial_recompute => {
                    self.partial(&cx, &job, source, from, state)
                }
                _ => Ok(None),
            }
        };

        let outcome = match attempt {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                log::debug!("{}: non-monotonic change, full recompute", job.trace);
                return self.full(&cx, &job);
            }
            Err(TraceError::StateCorrupted(reason)) => {
                log::warn!(
                    "{}: computation state unusable ({}), recomputing from scratch",
                    job.trace,
                    reason
                );
                return self.full(&cx, &job);
            }
            Err(e) => return Err(e),
        };

        if self.config.verify_incremental {
            return self.verify(&cx, &job, outcome);
        }
        Ok(outcome)
    }

    /// Saved state is only trusted when everything it depends on still holds.
    fn usable_state(&self, job: &Job<'_>) -> Option<ComputationState> {
        let state = job.state.clone()?;
        let reason = if job.stale {
            "trace is stale"
        } else if state.method != job.method.name() {
            "method changed"
        } else if state.fingerprint != job.fingerprint {
            "parameters changed"
        } else if state.generation != job.generation {
            "generation mismatch"
        } else if state.cursors.len() != job.sources.len() {
            "source count changed"
        } else {
            return Some(state);
        };
        log::debug!("{}: ignoring saved state, {}", job.trace, reason);
        None
    }

    fn incremental(
        &self,
        cx: &MethodContext<'_>,
        job: &Job<'_>,
        source: usize,
        state: ComputationState,
    ) -> Result<Option<Outcome>> {
        let store = job
            .sources
            .get(source)
            .ok_or_else(|| TraceError::Invariant(format!("no source #{} for {}", source, job.trace)))?;
        let new_obsels: Vec<&Obsel> = store
            .after(state.cursors[source])
            .map(|(_, obsel)| obsel)
            .collect();

        let cursors = advance(state.cursors, source, store);
        let mut custom = state.custom;
        let mut out = DerivedSet::from_store(job.current);
        job.method
            .incremental_step(cx, source, &new_obsels, &mut custom, &mut out)?;

        log::debug!(
            "{}: incremental step over {} new obsel(s) of source #{}",
            job.trace,
            new_obsels.len(),
            source
        );
        Ok(Some(self.finish(job, out, custom, cursors, RecomputeMode::Incremental)))
    }

    fn partial(
        &self,
        cx: &MethodContext<'_>,
        job: &Job<'_>,
        source: usize,
        from: Timestamp,
        state: ComputationState,
    ) -> Result<Option<Outcome>> {
        let store = job
            .sources
            .get(source)
            .ok_or_else(|| TraceError::Invariant(format!("no source #{} for {}", source, job.trace)))?;
        let cursors = advance(state.cursors, source, store);
        let mut custom = state.custom;
        let mut out = DerivedSet::from_store(job.current);
        match job.method.partial_recompute(cx, from, &mut custom, &mut out)? {
            Replay::Done => {
                log::debug!("{}: partial recompute from {}", job.trace, from);
                Ok(Some(self.finish(job, out, custom, cursors, RecomputeMode::Partial(from))))
            }
            Replay::Unsupported => Ok(None),
        }
    }

    fn full(&self, cx: &MethodContext<'_>, job: &Job<'_>) -> Result<Outcome> {
        let mut custom = serde_json::Value::Null;
        let mut out = DerivedSet::new();
        job.method.recompute(cx, &mut custom, &mut out)?;
        let cursors = job.sources.iter().map(|store| store.last_key()).collect();
        Ok(self.finish(job, out, custom, cursors, RecomputeMode::Full))
    }

    /// Recompute from scratch and compare with an incremental result.
    fn verify(&self, cx: &MethodContext<'_>, job: &Job<'_>, outcome: Outcome) -> Result<Outcome> {
        let expected = self.full(cx, job)?;
        if settled(job.current, &outcome) == settled(job.current, &expected) {
            return Ok(outcome);
        }
        log::error!(
            "{}: {:?} run diverged from full recompute, committing the full result",
            job.trace,
            outcome.mode
        );
        Ok(expected)
    }

    fn finish(
        &self,
        job: &Job<'_>,
        out: DerivedSet,
        custom: serde_json::Value,
        cursors: Vec<Option<ObselKey>>,
        mode: RecomputeMode,
    ) -> Outcome {
        let (added, removed) = diff(job.current, out);
        Outcome {
            added,
            removed,
            state: ComputationState {
                method: job.method.name().to_string(),
                fingerprint: job.fingerprint,
                generation: job.generation + 1,
                cursors,
                custom,
            },
            mode,
        }
    }
}

/// Move the cursor of `source` to the end of its store. Other sources may
/// still have notifications queued, their cursors stay put.
fn advance(
    mut cursors: Vec<Option<ObselKey>>,
    source: usize,
    store: &ObselStore,
) -> Vec<Option<ObselKey>> {
    if let Some(cursor) = cursors.get_mut(source) {
        *cursor = store.last_key();
    }
    cursors
}

struct TriggerName<'a>(&'a Trigger);

impl std::fmt::Debug for TriggerName<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Trigger::Initial => f.write_str("initial"),
            Trigger::Change { source, change } => {
                write!(f, "source #{} changed, {:?}, no usable state", source, change.kind)
            }
            Trigger::Forced => f.write_str("forced"),
        }
    }
}

/// Symmetric difference between the committed obsels and a derived set.
/// Obsels present on both sides but with different content are replaced.
fn diff(current: &ObselStore, out: DerivedSet) -> (Vec<Obsel>, Vec<ObselId>) {
    let removed: Vec<ObselId> = current
        .iter()
        .filter(|obsel| out.get(obsel.id()) != Some(*obsel))
        .map(|obsel| obsel.id().clone())
        .collect();

    let added: Vec<Obsel> = out
        .into_sorted()
        .into_iter()
        .filter(|obsel| current.get(obsel.id()) != Some(obsel))
        .collect();

    (added, removed)
}

/// Derived obsels after applying `outcome` to `current`, as a sorted list.
fn settled(current: &ObselStore, outcome: &Outcome) -> Vec<Obsel> {
    let mut obsels: Vec<Obsel> = current
        .iter()
        .filter(|obsel| !outcome.removed.contains(obsel.id()))
        .cloned()
        .chain(outcome.added.iter().cloned())
        .collect();
    obsels.sort_by(|a, b| a.begin().cmp(&b.begin()).then_with(|| a.id().cmp(b.id())));
    obsels
}

/// Full recompute of `method` over `sources`: the reference result every
/// incremental run must agree with. Sorted by `(begin, id)`.
pub fn recompute(
    method: &dyn TransformMethod,
    trace: &TraceId,
    sources: &[&ObselStore],
) -> Result<Vec<Obsel>> {
    recompute_with(method, trace, sources, &EngineConfig::default())
}

pub(crate) fn recompute_with(
    method: &dyn TransformMethod,
    trace: &TraceId,
    sources: &[&ObselStore],
    config: &EngineConfig,
) -> Result<Vec<Obsel>> {
    let cx = MethodContext {
        trace,
        sources,
        config,
    };
    let mut custom = serde_json::Value::Null;
    let mut out = DerivedSet::new();
    method.recompute(&cx, &mut custom, &mut out)?;
    Ok(out.into_sorted())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::FilterMethod;
    use crate::types::ObselType;

    fn obsel(id: &str, begin: Timestamp) -> Obsel {
        Obsel::builder(id, ObselType::new("http://m#ot"), begin)
            .build()
            .unwrap()
    }

    struct Harness {
        driver: Driver,
        method: FilterMethod,
        trace: TraceId,
        source: ObselStore,
        derived: ObselStore,
        state: Option<ComputationState>,
        generation: u64,
    }

    impl Harness {
        fn new(config: EngineConfig) -> Self {
            Self {
                driver: Driver::new(config),
                method: FilterMethod::new(Some(10), Some(20)).unwrap(),
                trace: TraceId::from("ctr/"),
                source: ObselStore::new(TraceId::from("s/")),
                derived: ObselStore::new(TraceId::from("ctr/")),
                state: None,
                generation: 0,
            }
        }

        fn notify(&mut self, trigger: Trigger) -> RecomputeMode {
            let sources = [&self.source];
            let outcome = self
                .driver
                .run(Job {
                    trace: &self.trace,
                    method: &self.method,
                    fingerprint: 1,
                    sources: &sources,
                    current: &self.derived,
                    state: self.state.clone(),
                    generation: self.generation,
                    stale: false,
                    trigger,
                })
                .unwrap();
            if outcome.mode != RecomputeMode::Unchanged {
                self.derived.apply(outcome.added, outcome.removed).unwrap();
                self.generation = outcome.state.generation;
                self.state = Some(outcome.state);
            }
            outcome.mode
        }

        fn edit(&mut self, adds: Vec<Obsel>, removes: Vec<&str>) -> RecomputeMode {
            let change = self
                .source
                .apply(adds, removes.into_iter().map(ObselId::from).collect())
                .unwrap();
            self.notify(Trigger::Change { source: 0, change })
        }

        fn derived_begins(&self) -> Vec<Timestamp> {
            self.derived.iter().map(Obsel::begin).collect()
        }
    }

    #[test]
    fn test_mode_selection() {
        let mut h = Harness::new(EngineConfig::default());
        assert_eq!(h.notify(Trigger::Initial), RecomputeMode::Full);
        assert_eq!(h.edit(vec![obsel("o10", 10)], vec![]), RecomputeMode::Incremental);
        assert_eq!(h.edit(vec![obsel("o15", 15)], vec![]), RecomputeMode::Incremental);
        assert_eq!(h.edit(vec![obsel("o12", 12)], vec![]), RecomputeMode::Partial(12));
        assert_eq!(h.edit(vec![], vec![]), RecomputeMode::Unchanged);
        assert_eq!(h.edit(vec![], vec!["o10"]), RecomputeMode::Partial(10));
        assert_eq!(h.derived_begins(), vec![12, 15]);
    }

    #[test]
    fn test_unchanged_derived_obsels_keep_identity() {
        let mut h = Harness::new(EngineConfig::default());
        h.notify(Trigger::Initial);
        h.edit(vec![obsel("o10", 10), obsel("o15", 15)], vec![]);
        let before = h.derived.stats().added_total;

        h.edit(vec![obsel("o12", 12)], vec![]);
        // only the new derived obsel is added, nothing is re-added
        assert_eq!(h.derived.stats().added_total, before + 1);
        assert_eq!(h.derived.stats().removed_total, 0);
    }

    #[test]
    fn test_partial_disabled_falls_back_to_full() {
        let mut h = Harness::new(EngineConfig::default().with_partial_recompute(false));
        h.notify(Trigger::Initial);
        h.edit(vec![obsel("o15", 15)], vec![]);
        assert_eq!(h.edit(vec![obsel("o11", 11)], vec![]), RecomputeMode::Full);
        assert_eq!(h.derived_begins(), vec![11, 15]);
    }

    #[test]
    fn test_stale_generation_forces_full() {
        let mut h = Harness::new(EngineConfig::default());
        h.notify(Trigger::Initial);
        h.generation += 1;
        assert_eq!(h.edit(vec![obsel("o10", 10)], vec![]), RecomputeMode::Full);
    }

    #[test]
    fn test_verification_keeps_agreeing_result() {
        let mut h = Harness::new(EngineConfig::default().with_verify_incremental(true));
        h.notify(Trigger::Initial);
        assert_eq!(h.edit(vec![obsel("o10", 10)], vec![]), RecomputeMode::Incremental);
        assert_eq!(h.edit(vec![obsel("o05", 5)], vec![]), RecomputeMode::Partial(5));
        assert_eq!(h.derived_begins(), vec![10]);
    }

    #[test]
    fn test_pure_recompute_is_sorted() {
        let source = ObselStore::from_obsels(
            TraceId::from("s/"),
            vec![obsel("b", 15), obsel("a", 11), obsel("c", 30)],
        )
        .unwrap();
        let method = FilterMethod::new(Some(10), Some(20)).unwrap();
        let derived = recompute(&method, &TraceId::from("ctr/"), &[&source]).unwrap();
        let begins: Vec<Timestamp> = derived.iter().map(Obsel::begin).collect();
        assert_eq!(begins, vec![11, 15]);
    }
}
