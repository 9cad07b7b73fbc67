//! Transformation methods.
//!
//! A method defines how a computed trace is derived from its sources. Every
//! method implements [`TransformMethod`]; the [`crate::driver::Driver`] decides
//! which entry point to call for each notification and commits the result.

use crate::config::EngineConfig;
use crate::error::{ConfigurationError, Result};
use crate::store::ObselStore;
use crate::types::{Obsel, ObselId, Timestamp, TraceId, TraceModel};
use rustc_hash::FxHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

pub mod filter;
pub mod fsa;
pub mod fusion;
mod registry;

pub use filter::FilterMethod;
pub use fsa::FsaMethod;
pub use fusion::FusionMethod;
pub use registry::{MethodFactory, MethodRegistry};

/// String parameters of a computed trace, e.g. `{"after": "10", "before": "20"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodParams(BTreeMap<String, String>);

impl MethodParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reject any parameter not listed in `known`.
    pub fn check_known(&self, known: &[&str]) -> std::result::Result<(), ConfigurationError> {
        match self.0.keys().find(|key| !known.contains(&key.as_str())) {
            Some(key) => Err(ConfigurationError::UnknownParameter(key.clone())),
            None => Ok(()),
        }
    }

    /// Parse an optional integer timestamp parameter.
    pub fn timestamp(&self, key: &str) -> std::result::Result<Option<Timestamp>, ConfigurationError> {
        self.get(key)
            .map(|value| {
                value
                    .trim()
                    .parse::<Timestamp>()
                    .map_err(|e| ConfigurationError::InvalidParameter {
                        name: key.to_string(),
                        value: value.to_string(),
                        reason: e.to_string(),
                    })
            })
            .transpose()
    }

    /// Stable hash of a method name and these parameters. Saved computation
    /// state is only reused when the fingerprint still matches.
    pub fn fingerprint(&self, method: &str) -> u64 {
        let mut hasher = FxHasher::default();
        method.hash(&mut hasher);
        for (key, value) in &self.0 {
            key.hash(&mut hasher);
            value.hash(&mut hasher);
        }
        hasher.finish()
    }
}

impl<K, V> FromIterator<(K, V)> for MethodParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// What a method factory may inspect while building a method.
#[derive(Debug, Clone, Copy)]
pub struct MethodSetup<'a> {
    /// Model of the primary source, against which type references resolve
    pub model: &'a TraceModel,
    pub source_count: usize,
    pub config: &'a EngineConfig,
}

impl MethodSetup<'_> {
    /// Fail unless exactly `expected` sources are configured.
    pub fn expect_sources(&self, method: &str, expected: usize) -> std::result::Result<(), ConfigurationError> {
        if self.source_count != expected {
            return Err(ConfigurationError::SourceCount {
                method: method.to_string(),
                expected: expected.to_string(),
                actual: self.source_count,
            });
        }
        Ok(())
    }
}

/// Read-only view a method gets of the computed trace and its sources.
#[derive(Debug, Clone, Copy)]
pub struct MethodContext<'a> {
    pub trace: &'a TraceId,
    /// Source stores, primary first
    pub sources: &'a [&'a ObselStore],
    pub config: &'a EngineConfig,
}

impl<'a> MethodContext<'a> {
    pub fn primary(&self) -> Option<&'a ObselStore> {
        self.sources.first().copied()
    }
}

/// Outcome of [`TransformMethod::partial_recompute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replay {
    /// The suffix was replayed, the derived set is up to date.
    Done,
    /// The method cannot replay from a point; the driver recomputes fully.
    Unsupported,
}

/// Capability interface of a transformation method.
///
/// `custom` is the method-private part of the computation state. It is
/// `Value::Null` when a run starts from scratch and is persisted as-is after
/// a successful run.
pub trait TransformMethod: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Derive everything from the full content of the sources. `out` is empty.
    fn recompute(
        &self,
        cx: &MethodContext<'_>,
        custom: &mut serde_json::Value,
        out: &mut DerivedSet,
    ) -> Result<()>;

    /// Consume obsels appended to source `source` (in store order) after a
    /// strictly monotonic change. `out` holds the current derived obsels.
    fn incremental_step(
        &self,
        cx: &MethodContext<'_>,
        source: usize,
        new_obsels: &[&Obsel],
        custom: &mut serde_json::Value,
        out: &mut DerivedSet,
    ) -> Result<()>;

    /// Replay from `from` after a non-monotonic change: drop whatever was
    /// derived from obsels at or after `from`, then re-derive that suffix.
    fn partial_recompute(
        &self,
        _cx: &MethodContext<'_>,
        _from: Timestamp,
        _custom: &mut serde_json::Value,
        _out: &mut DerivedSet,
    ) -> Result<Replay> {
        Ok(Replay::Unsupported)
    }
}

/// Working copy of the obsels of a computed trace.
///
/// Methods add and remove obsels here; the driver then commits only the
/// difference with the stored obsels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedSet {
    obsels: BTreeMap<ObselId, Obsel>,
}

impl DerivedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Working copy of the obsels currently stored in `store`.
    pub fn from_store(store: &ObselStore) -> Self {
        Self {
            obsels: store
                .iter()
                .map(|obsel| (obsel.id().clone(), obsel.clone()))
                .collect(),
        }
    }

    /// Add an obsel, replacing any obsel with the same id.
    pub fn insert(&mut self, obsel: Obsel) -> Option<Obsel> {
        self.obsels.insert(obsel.id().clone(), obsel)
    }

    pub fn remove(&mut self, id: &ObselId) -> Option<Obsel> {
        self.obsels.remove(id)
    }

    pub fn get(&self, id: &ObselId) -> Option<&Obsel> {
        self.obsels.get(id)
    }

    pub fn contains(&self, id: &ObselId) -> bool {
        self.obsels.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.obsels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obsels.is_empty()
    }

    /// Obsels in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Obsel> {
        self.obsels.values()
    }

    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Obsel) -> bool,
    {
        self.obsels.retain(|_, obsel| keep(obsel));
    }

    /// Drop every obsel beginning at or after `from`.
    pub fn truncate_from(&mut self, from: Timestamp) -> usize {
        let before = self.obsels.len();
        self.retain(|obsel| obsel.begin() < from);
        before - self.obsels.len()
    }

    /// All obsels ordered by `(begin, id)`.
    pub fn into_sorted(self) -> Vec<Obsel> {
        let mut obsels: Vec<Obsel> = self.obsels.into_values().collect();
        obsels.sort_by(|a, b| a.begin().cmp(&b.begin()).then_with(|| a.id().cmp(b.id())));
        obsels
    }
}

/// Deterministic id of a derived obsel.
///
/// The id depends only on the computed trace, `tag` and the provenance, so
/// recomputing yields the same ids and unchanged derived obsels keep their
/// identity across runs. The readable part of the id is the last segment of
/// `tag`.
///
/// ```
/// use tracekit::method::derived_id;
/// use tracekit::types::{ObselId, TraceId};
///
/// let trace = TraceId::from("http://localhost/b/ctr/");
/// let provenance = [ObselId::from("oA"), ObselId::from("oB")];
/// let id = derived_id(&trace, "http://localhost/b/m#otX", &provenance);
/// assert!(id.as_str().starts_with("http://localhost/b/ctr/otX-"));
/// assert_eq!(id, derived_id(&trace, "http://localhost/b/m#otX", &provenance));
/// ```
pub fn derived_id(trace: &TraceId, tag: &str, provenance: &[ObselId]) -> ObselId {
    format_derived_id(trace, tag, provenance_hasher(tag, provenance).finish())
}

/// Like [`derived_id`], with `lineage` mixed into the hash. Methods that can
/// produce several obsels with the same tag and provenance pass something
/// telling them apart.
pub fn derived_id_in_lineage(
    trace: &TraceId,
    tag: &str,
    lineage: u64,
    provenance: &[ObselId],
) -> ObselId {
    let mut hasher = provenance_hasher(tag, provenance);
    lineage.hash(&mut hasher);
    format_derived_id(trace, tag, hasher.finish())
}

fn provenance_hasher(tag: &str, provenance: &[ObselId]) -> FxHasher {
    let mut hasher = FxHasher::default();
    tag.hash(&mut hasher);
    for id in provenance {
        id.as_str().hash(&mut hasher);
    }
    hasher
}

fn format_derived_id(trace: &TraceId, tag: &str, hash: u64) -> ObselId {
    let readable = tag.rsplit(['#', '/']).next().unwrap_or(tag);
    let separator = if trace.as_str().ends_with('/') { "" } else { "/" };
    ObselId::new(format!("{trace}{separator}{readable}-{hash:016x}"))
}
