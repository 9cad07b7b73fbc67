//! In-memory trace base.
//!
//! `TraceBase` owns models, stored traces and computed traces. Every committed
//! batch on a trace is classified and pushed to the computed traces depending
//! on it, breadth-first, until no computed trace changes any more.

use crate::change::ChangeDescriptor;
use crate::config::EngineConfig;
use crate::driver::{Driver, Job, RecomputeMode, Trigger, recompute_with};
use crate::error::{ConfigurationError, Result, TraceError};
use crate::method::{MethodParams, MethodRegistry, MethodSetup, TransformMethod};
use crate::storage::{ComputationState, MemoryStateBackend, StateBackend};
use crate::store::{ObselBatch, ObselDraft, ObselStore};
use crate::types::{Obsel, ObselId, Timestamp, TraceId, TraceKind, TraceModel};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;

#[cfg(feature = "sync")]
mod sync;

#[cfg(feature = "sync")]
pub use sync::SyncBase;

/// What an edit did to the edited trace and to the computed traces
/// depending on it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeReport {
    /// Change committed to the edited trace
    pub change: ChangeDescriptor,
    /// Computed traces brought up to date, in propagation order
    pub refreshed: Vec<(TraceId, RecomputeMode)>,
    /// Computed traces whose recomputation failed; they are now stale
    pub failed: Vec<(TraceId, String)>,
}

impl ChangeReport {
    fn new(change: ChangeDescriptor) -> Self {
        Self {
            change,
            refreshed: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Base statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseStats {
    pub stored_traces: usize,
    pub computed_traces: usize,
    /// Notifications delivered to computed traces, refreshes included
    pub notifications: u64,
    pub incremental_runs: u64,
    pub partial_runs: u64,
    pub full_runs: u64,
    pub failed_runs: u64,
}

#[derive(Debug)]
struct TraceEntry {
    model: String,
    store: ObselStore,
    setup: TraceSetup,
}

#[derive(Debug)]
enum TraceSetup {
    Stored { default_subject: Option<String> },
    Computed(Box<ComputedTrace>),
}

#[derive(Debug)]
struct ComputedTrace {
    method_name: String,
    params: MethodParams,
    method: Box<dyn TransformMethod>,
    fingerprint: u64,
    sources: Vec<TraceId>,
    generation: u64,
    stale: bool,
    last_error: Option<String>,
}

impl TraceEntry {
    fn computed(&self) -> Option<&ComputedTrace> {
        match &self.setup {
            TraceSetup::Computed(computed) => Some(computed),
            TraceSetup::Stored { .. } => None,
        }
    }

    fn computed_mut(&mut self) -> Option<&mut ComputedTrace> {
        match &mut self.setup {
            TraceSetup::Computed(computed) => Some(computed),
            TraceSetup::Stored { .. } => None,
        }
    }
}

/// A base of traces kept consistent with their sources.
///
/// # Examples
///
/// ```rust
/// use tracekit::{MethodParams, ObselDraft, TraceBase};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut base = TraceBase::new();
/// let model = base.create_model("http://localhost/b/m")?;
/// model.add_obsel_type("#ot");
///
/// base.create_stored_trace("http://localhost/b/s/", "http://localhost/b/m", Some("alice"))?;
/// base.create_computed_trace(
///     "http://localhost/b/ctr/",
///     "filter",
///     MethodParams::new().with("after", "10").with("before", "20"),
///     ["http://localhost/b/s/"],
/// )?;
///
/// base.create_obsel("http://localhost/b/s/", ObselDraft::new("#ot", 5))?;
/// base.create_obsel("http://localhost/b/s/", ObselDraft::new("#ot", 12))?;
/// assert_eq!(base.obsel_count("http://localhost/b/ctr/")?, 1);
/// # Ok(())
/// # }
/// ```
pub struct TraceBase {
    models: BTreeMap<String, TraceModel>,
    traces: BTreeMap<TraceId, TraceEntry>,
    /// source trace -> computed traces reading it; kept after the source is
    /// deleted so that a re-created source reaches its dependents again
    dependents: FxHashMap<TraceId, Vec<TraceId>>,
    registry: MethodRegistry,
    driver: Driver,
    states: Box<dyn StateBackend>,
    stats: BaseStats,
}

impl std::fmt::Debug for TraceBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceBase")
            .field("models", &self.models.len())
            .field("traces", &self.traces.len())
            .field("config", self.driver.config())
            .finish()
    }
}

impl Default for TraceBase {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceBase {
    /// Empty base with default configuration and in-memory state.
    pub fn new() -> Self {
        Self::with_parts(
            EngineConfig::default(),
            MethodRegistry::default(),
            Box::new(MemoryStateBackend::new()),
        )
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_parts(
            config,
            MethodRegistry::default(),
            Box::new(MemoryStateBackend::new()),
        )
    }

    pub(crate) fn with_parts(
        config: EngineConfig,
        registry: MethodRegistry,
        states: Box<dyn StateBackend>,
    ) -> Self {
        Self {
            models: BTreeMap::new(),
            traces: BTreeMap::new(),
            dependents: FxHashMap::default(),
            registry,
            driver: Driver::new(config),
            states,
            stats: BaseStats::default(),
        }
    }

    /// Create a base builder for custom state storage or methods.
    pub fn builder() -> crate::builder::BaseBuilder {
        crate::builder::BaseBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        self.driver.config()
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    pub fn stats(&self) -> BaseStats {
        let mut stats = self.stats.clone();
        let computed = self
            .traces
            .values()
            .filter(|entry| entry.computed().is_some())
            .count();
        stats.computed_traces = computed;
        stats.stored_traces = self.traces.len() - computed;
        stats
    }

    // ===== Models =====

    pub fn create_model(&mut self, uri: impl Into<String>) -> Result<&mut TraceModel> {
        let uri = uri.into();
        if self.models.contains_key(&uri) {
            return Err(TraceError::ModelExists(uri));
        }
        Ok(self
            .models
            .entry(uri.clone())
            .or_insert_with(|| TraceModel::new(uri)))
    }

    pub fn model(&self, uri: &str) -> Option<&TraceModel> {
        self.models.get(uri)
    }

    /// Types added here are visible to computed traces on their next
    /// [`refresh`](Self::refresh).
    pub fn model_mut(&mut self, uri: &str) -> Option<&mut TraceModel> {
        self.models.get_mut(uri)
    }

    // ===== Traces =====

    pub fn create_stored_trace(
        &mut self,
        id: impl Into<TraceId>,
        model: &str,
        default_subject: Option<&str>,
    ) -> Result<()> {
        let id = id.into();
        if self.traces.contains_key(&id) {
            return Err(TraceError::TraceExists(id));
        }
        if !self.models.contains_key(model) {
            return Err(TraceError::ModelNotFound(model.to_string()));
        }

        log::debug!("created stored trace {}", id);
        self.traces.insert(
            id.clone(),
            TraceEntry {
                model: model.to_string(),
                store: ObselStore::new(id),
                setup: TraceSetup::Stored {
                    default_subject: default_subject.map(str::to_string),
                },
            },
        );
        Ok(())
    }

    /// Create a computed trace and compute its initial content.
    ///
    /// The method and its parameters are validated before anything is
    /// created; the computed trace uses the model of its primary (first)
    /// source.
    pub fn create_computed_trace<I>(
        &mut self,
        id: impl Into<TraceId>,
        method: &str,
        params: MethodParams,
        sources: I,
    ) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<TraceId>,
    {
        let id = id.into();
        if self.traces.contains_key(&id) {
            return Err(TraceError::TraceExists(id));
        }

        let sources: Vec<TraceId> = sources.into_iter().map(Into::into).collect();
        let mut seen = FxHashSet::default();
        for source in &sources {
            if !seen.insert(source) {
                return Err(ConfigurationError::DuplicateSource(source.clone()).into());
            }
            if !self.traces.contains_key(source) {
                return Err(TraceError::TraceNotFound(source.clone()));
            }
        }

        let primary = sources.first().ok_or_else(|| ConfigurationError::SourceCount {
            method: method.to_string(),
            expected: "at least 1".to_string(),
            actual: 0,
        })?;
        let model = self.entry(primary.as_str())?.model.clone();
        let built = self.build_method(method, &params, &model, sources.len())?;

        self.traces.insert(
            id.clone(),
            TraceEntry {
                model,
                store: ObselStore::new(id.clone()),
                setup: TraceSetup::Computed(Box::new(ComputedTrace {
                    method_name: method.to_string(),
                    fingerprint: params.fingerprint(method),
                    params,
                    method: built,
                    sources: sources.clone(),
                    generation: 0,
                    stale: false,
                    last_error: None,
                })),
            },
        );
        for source in &sources {
            self.dependents.entry(source.clone()).or_default().push(id.clone());
        }

        if let Err(e) = self.notify(&id, Trigger::Initial) {
            self.unlink(&id);
            self.traces.remove(&id);
            return Err(e);
        }
        log::debug!("created computed trace {} ({} over {:?})", id, method, sources);
        Ok(())
    }

    /// Delete a trace. Computed traces reading it become stale until a trace
    /// with the same id exists again and changes.
    pub fn delete_trace(&mut self, id: impl AsRef<str>) -> Result<()> {
        let id = id.as_ref();
        let (id, _) = self
            .traces
            .remove_entry(id)
            .ok_or_else(|| TraceError::TraceNotFound(TraceId::from(id)))?;

        self.unlink(&id);
        if let Err(e) = self.states.remove_state(&id) {
            log::warn!("{}: failed to drop computation state: {}", id, e);
        }

        let dependents = self.dependents.get(&id).cloned().unwrap_or_default();
        for dependent in dependents {
            if let Some(computed) = self
                .traces
                .get_mut(&dependent)
                .and_then(TraceEntry::computed_mut)
            {
                computed.stale = true;
                computed.last_error = Some(TraceError::SourceUnavailable(id.clone()).to_string());
                log::warn!("{}: source {} was deleted, trace is stale", dependent, id);
            }
        }
        Ok(())
    }

    /// Forget `id` as a dependent of its sources.
    fn unlink(&mut self, id: &TraceId) {
        for list in self.dependents.values_mut() {
            list.retain(|dependent| dependent != id);
        }
        self.dependents.retain(|_, list| !list.is_empty());
    }

    pub fn contains_trace(&self, id: impl AsRef<str>) -> bool {
        self.traces.contains_key(id.as_ref())
    }

    pub fn trace_ids(&self) -> impl Iterator<Item = &TraceId> {
        self.traces.keys()
    }

    pub fn trace_kind(&self, id: impl AsRef<str>) -> Result<TraceKind> {
        let entry = self.entry(id.as_ref())?;
        Ok(match entry.setup {
            TraceSetup::Stored { .. } => TraceKind::Stored,
            TraceSetup::Computed(_) => TraceKind::Computed,
        })
    }

    /// URI of the model a trace draws its obsel types from.
    pub fn trace_model(&self, id: impl AsRef<str>) -> Result<&str> {
        Ok(&self.entry(id.as_ref())?.model)
    }

    /// Sources of a computed trace, primary first.
    pub fn sources(&self, id: impl AsRef<str>) -> Result<&[TraceId]> {
        Ok(&self.computed(id.as_ref())?.sources)
    }

    // ===== Obsels =====

    /// Add one obsel to a stored trace.
    pub fn create_obsel(&mut self, trace: impl AsRef<str>, draft: ObselDraft) -> Result<Obsel> {
        let report = self.edit(trace.as_ref(), |batch| {
            batch.add(draft);
            Ok(())
        })?;
        let id = report
            .change
            .added
            .first()
            .ok_or_else(|| TraceError::Invariant("batch of one addition added nothing".to_string()))?;
        self.get_obsel(trace.as_ref(), id)?
            .cloned()
            .ok_or_else(|| TraceError::ObselNotFound {
                trace: report.change.trace.clone(),
                obsel: id.clone(),
            })
    }

    pub fn remove_obsel(&mut self, trace: impl AsRef<str>, id: impl Into<ObselId>) -> Result<ChangeReport> {
        let id = id.into();
        self.edit(trace, |batch| {
            batch.remove(id);
            Ok(())
        })
    }

    /// Apply a batch of additions and removals to a stored trace atomically,
    /// then bring every dependent computed trace up to date.
    ///
    /// Failing dependents do not fail the edit: they are reported in
    /// [`ChangeReport::failed`] and marked stale.
    pub fn edit<F>(&mut self, trace: impl AsRef<str>, fill: F) -> Result<ChangeReport>
    where
        F: FnOnce(&mut ObselBatch) -> Result<()>,
    {
        let trace = trace.as_ref();
        let mut batch = ObselBatch::new();
        fill(&mut batch)?;

        let entry = self.entry(trace)?;
        let default_subject = match &entry.setup {
            TraceSetup::Stored { default_subject } => default_subject.as_deref(),
            TraceSetup::Computed(_) => {
                return Err(TraceError::ComputedTraceReadOnly(entry.store.trace().clone()));
            }
        };
        let model = self
            .models
            .get(&entry.model)
            .ok_or_else(|| TraceError::ModelNotFound(entry.model.clone()))?;

        let (drafts, removes) = batch.into_parts();
        let adds = drafts
            .into_iter()
            .map(|draft| draft.resolve(entry.store.trace(), model, default_subject))
            .collect::<Result<Vec<_>>>()?;

        let change = self.entry_mut(trace)?.store.apply(adds, removes)?;
        log::debug!(
            "{}: committed +{} -{} ({:?})",
            trace,
            change.added.len(),
            change.removed.len(),
            change.kind
        );
        Ok(self.propagate(change))
    }

    /// Obsels of a trace in begin order.
    pub fn obsels(&self, trace: impl AsRef<str>) -> Result<Vec<&Obsel>> {
        Ok(self.entry(trace.as_ref())?.store.iter().collect())
    }

    pub fn obsel_count(&self, trace: impl AsRef<str>) -> Result<usize> {
        Ok(self.entry(trace.as_ref())?.store.len())
    }

    /// Obsels whose begin lies within `from..to`, in begin order.
    pub fn read_obsels(
        &self,
        trace: impl AsRef<str>,
        from: Bound<Timestamp>,
        to: Bound<Timestamp>,
    ) -> Result<Box<dyn Iterator<Item = &Obsel> + '_>> {
        Ok(Box::new(self.entry(trace.as_ref())?.store.range(from, to)))
    }

    pub fn get_obsel(&self, trace: impl AsRef<str>, id: &ObselId) -> Result<Option<&Obsel>> {
        Ok(self.entry(trace.as_ref())?.store.get(id))
    }

    /// Direct access to the store of a trace.
    pub fn store(&self, trace: impl AsRef<str>) -> Result<&ObselStore> {
        Ok(&self.entry(trace.as_ref())?.store)
    }

    // ===== Computed traces =====

    /// Rebuild the method of a computed trace from its parameters (picking up
    /// model changes), recompute it from scratch and propagate the result.
    pub fn refresh(&mut self, trace: impl AsRef<str>) -> Result<ChangeReport> {
        let trace = trace.as_ref();
        let (method_name, params, model, source_count) = {
            let entry = self.entry(trace)?;
            let computed = entry
                .computed()
                .ok_or_else(|| TraceError::NotComputed(entry.store.trace().clone()))?;
            (
                computed.method_name.clone(),
                computed.params.clone(),
                entry.model.clone(),
                computed.sources.len(),
            )
        };
        let rebuilt = self.build_method(&method_name, &params, &model, source_count)?;
        if let Some(computed) = self.entry_mut(trace)?.computed_mut() {
            computed.method = rebuilt;
        }

        let id = self.entry(trace)?.store.trace().clone();
        let (mode, change) = self.notify(&id, Trigger::Forced)?;
        let change = change.unwrap_or_else(|| ChangeDescriptor {
            trace: id.clone(),
            kind: crate::change::ChangeKind::StrictlyMonotonic,
            earliest_affected_begin: None,
            added: Vec::new(),
            removed: Vec::new(),
        });

        let mut report = self.propagate(change);
        report.refreshed.insert(0, (id, mode));
        Ok(report)
    }

    /// Derive the content of a computed trace from scratch without touching
    /// it. This is the reference every incremental update must agree with.
    pub fn recompute_from_scratch(&self, trace: impl AsRef<str>) -> Result<Vec<Obsel>> {
        let trace = trace.as_ref();
        let computed = self.computed(trace)?;
        let sources = self.source_stores(computed)?;
        let id = self.entry(trace)?.store.trace();
        recompute_with(computed.method.as_ref(), id, &sources, self.driver.config())
    }

    pub fn is_stale(&self, trace: impl AsRef<str>) -> Result<bool> {
        Ok(self.computed(trace.as_ref())?.stale)
    }

    /// Message of the error that made the trace stale, if any.
    pub fn last_error(&self, trace: impl AsRef<str>) -> Result<Option<&str>> {
        Ok(self.computed(trace.as_ref())?.last_error.as_deref())
    }

    /// State saved after the last successful run.
    pub fn computation_state(&self, trace: impl AsRef<str>) -> Result<Option<ComputationState>> {
        let trace = trace.as_ref();
        self.computed(trace)?;
        self.states.load_state(&TraceId::from(trace))
    }

    // ===== Internals =====

    fn entry(&self, trace: &str) -> Result<&TraceEntry> {
        self.traces
            .get(trace)
            .ok_or_else(|| TraceError::TraceNotFound(TraceId::from(trace)))
    }

    fn entry_mut(&mut self, trace: &str) -> Result<&mut TraceEntry> {
        self.traces
            .get_mut(trace)
            .ok_or_else(|| TraceError::TraceNotFound(TraceId::from(trace)))
    }

    fn computed(&self, trace: &str) -> Result<&ComputedTrace> {
        self.entry(trace)?
            .computed()
            .ok_or_else(|| TraceError::NotComputed(TraceId::from(trace)))
    }

    fn build_method(
        &self,
        method: &str,
        params: &MethodParams,
        model: &str,
        source_count: usize,
    ) -> Result<Box<dyn TransformMethod>> {
        let model = self
            .models
            .get(model)
            .ok_or_else(|| TraceError::ModelNotFound(model.to_string()))?;
        let setup = MethodSetup {
            model,
            source_count,
            config: self.driver.config(),
        };
        Ok(self.registry.build(method, params, &setup)?)
    }

    fn source_stores(&self, computed: &ComputedTrace) -> Result<Vec<&ObselStore>> {
        computed
            .sources
            .iter()
            .map(|source| {
                self.traces
                    .get(source)
                    .map(|entry| &entry.store)
                    .ok_or_else(|| TraceError::SourceUnavailable(source.clone()))
            })
            .collect()
    }

    /// Deliver `change` to every dependent, then the changes of those
    /// dependents to theirs, breadth-first.
    fn propagate(&mut self, change: ChangeDescriptor) -> ChangeReport {
        let mut report = ChangeReport::new(change.clone());
        let mut queue = VecDeque::from([change]);

        while let Some(change) = queue.pop_front() {
            let dependents = self.dependents.get(&change.trace).cloned().unwrap_or_default();
            for dependent in dependents {
                let source = self
                    .traces
                    .get(&dependent)
                    .and_then(TraceEntry::computed)
                    .and_then(|computed| computed.sources.iter().position(|s| s == &change.trace));
                let Some(source) = source else {
                    continue;
                };

                let trigger = Trigger::Change {
                    source,
                    change: change.clone(),
                };
                match self.notify(&dependent, trigger) {
                    Ok((mode, derived)) => {
                        report.refreshed.push((dependent, mode));
                        if let Some(derived) = derived.filter(|d| !d.is_empty()) {
                            queue.push_back(derived);
                        }
                    }
                    Err(e) => report.failed.push((dependent, e.to_string())),
                }
            }
        }
        report
    }

    /// Run the driver for one computed trace and commit the outcome.
    ///
    /// Returns the change committed to the computed trace (`None` when the
    /// run had nothing to do). On failure the trace is marked stale and its
    /// obsels are left untouched.
    fn notify(
        &mut self,
        trace: &TraceId,
        trigger: Trigger,
    ) -> Result<(RecomputeMode, Option<ChangeDescriptor>)> {
        self.stats.notifications += 1;
        match self.run_and_commit(trace, trigger) {
            Ok(result) => {
                match result.0 {
                    RecomputeMode::Incremental => self.stats.incremental_runs += 1,
                    RecomputeMode::Partial(_) => self.stats.partial_runs += 1,
                    RecomputeMode::Full => self.stats.full_runs += 1,
                    RecomputeMode::Unchanged => {}
                }
                Ok(result)
            }
            Err(e) => {
                self.stats.failed_runs += 1;
                log::error!("{}: recomputation failed: {}", trace, e);
                if let Some(computed) = self.traces.get_mut(trace).and_then(TraceEntry::computed_mut) {
                    computed.stale = true;
                    computed.last_error = Some(e.to_string());
                }
                Err(e)
            }
        }
    }

    fn run_and_commit(
        &mut self,
        trace: &TraceId,
        trigger: Trigger,
    ) -> Result<(RecomputeMode, Option<ChangeDescriptor>)> {
        let persist = self.driver.config().persist_state;
        let saved = if persist {
            self.states.load_state(trace).unwrap_or_else(|e| {
                log::warn!("{}: cannot load computation state: {}", trace, e);
                None
            })
        } else {
            None
        };

        let outcome = {
            let entry = self.entry(trace.as_str())?;
            let computed = entry
                .computed()
                .ok_or_else(|| TraceError::NotComputed(trace.clone()))?;
            let sources = self.source_stores(computed)?;
            self.driver.run(Job {
                trace,
                method: computed.method.as_ref(),
                fingerprint: computed.fingerprint,
                sources: &sources,
                current: &entry.store,
                state: saved,
                generation: computed.generation,
                stale: computed.stale,
                trigger,
            })?
        };

        let mode = outcome.mode;
        if mode == RecomputeMode::Unchanged {
            return Ok((mode, None));
        }

        let entry = self.entry_mut(trace.as_str())?;
        let change = entry.store.apply(outcome.added, outcome.removed)?;
        if let Some(computed) = entry.computed_mut() {
            computed.generation = outcome.state.generation;
            computed.stale = false;
            computed.last_error = None;
        }

        if persist && let Err(e) = self.states.save_state(trace, &outcome.state) {
            // the generation check discards the older saved state next time
            log::warn!("{}: cannot save computation state: {}", trace, e);
        }

        log::debug!(
            "{}: {:?} run committed +{} -{}",
            trace,
            mode,
            change.added.len(),
            change.removed.len()
        );
        Ok((mode, Some(change)))
    }
}
