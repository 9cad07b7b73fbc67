//! Computation state storage for computed traces.
//!
//! This module provides a trait-based abstraction over the place where each
//! computed trace keeps its small, method-private computation state between
//! notifications. State is a cache: losing it only costs a full recompute.

use crate::error::Result;
use crate::store::ObselKey;
use crate::types::TraceId;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

#[cfg(feature = "snapshot")]
mod snapshot;

#[cfg(feature = "snapshot")]
pub use snapshot::SnapshotStateBackend;

/// Persisted state of one computed trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputationState {
    /// Name of the method that wrote this state
    pub method: String,
    /// Hash of the method name and parameters the state was computed with
    pub fingerprint: u64,
    /// Commit generation of the computed trace when the state was saved
    pub generation: u64,
    /// Per source: key of the last obsel already processed
    pub cursors: Vec<Option<ObselKey>>,
    /// Method-private part
    #[serde(default)]
    pub custom: serde_json::Value,
}

impl ComputationState {
    /// Read one field of the method-private part.
    pub fn custom_field(&self, key: &str) -> Option<&serde_json::Value> {
        self.custom.get(key)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Trait for computation state storage implementations
pub trait StateBackend: Send + Sync {
    /// Load the state saved for a computed trace, if any
    fn load_state(&self, trace: &TraceId) -> Result<Option<ComputationState>>;

    /// Save (replace) the state of a computed trace
    fn save_state(&mut self, trace: &TraceId, state: &ComputationState) -> Result<()>;

    /// Forget the state of a computed trace
    fn remove_state(&mut self, trace: &TraceId) -> Result<()>;

    /// Get storage statistics
    fn stats(&self) -> StateStats;
}

/// State backend statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateStats {
    /// Number of computed traces with saved state
    pub entries: usize,
    /// Number of saves performed
    pub saves: u64,
    /// Approximate size of all saved states in bytes
    pub size_bytes: usize,
}

/// In-memory state backend. States are kept serialized, as an external
/// store would keep them.
#[derive(Debug, Default)]
pub struct MemoryStateBackend {
    states: FxHashMap<TraceId, String>,
    saves: u64,
}

impl MemoryStateBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateBackend for MemoryStateBackend {
    fn load_state(&self, trace: &TraceId) -> Result<Option<ComputationState>> {
        self.states
            .get(trace)
            .map(|json| ComputationState::from_json(json))
            .transpose()
    }

    fn save_state(&mut self, trace: &TraceId, state: &ComputationState) -> Result<()> {
        let json = state.to_json()?;
        self.states.insert(trace.clone(), json);
        self.saves += 1;
        Ok(())
    }

    fn remove_state(&mut self, trace: &TraceId) -> Result<()> {
        self.states.remove(trace);
        Ok(())
    }

    fn stats(&self) -> StateStats {
        StateStats {
            entries: self.states.len(),
            saves: self.saves,
            size_bytes: self.states.values().map(String::len).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ComputationState {
        ComputationState {
            method: "fsa".to_string(),
            fingerprint: 42,
            generation: 3,
            cursors: vec![Some(ObselKey { begin: 10, seq: 2 }), None],
            custom: serde_json::json!({"next_process": 4}),
        }
    }

    #[test]
    fn test_memory_backend_roundtrip() {
        let mut backend = MemoryStateBackend::new();
        let trace = TraceId::from("ctr/");
        assert_eq!(backend.load_state(&trace).unwrap(), None);

        backend.save_state(&trace, &state()).unwrap();
        assert_eq!(backend.load_state(&trace).unwrap(), Some(state()));
        assert_eq!(backend.stats().entries, 1);
        assert_eq!(backend.stats().saves, 1);

        backend.remove_state(&trace).unwrap();
        assert_eq!(backend.load_state(&trace).unwrap(), None);
    }

    #[test]
    fn test_custom_field_lookup() {
        let state = state();
        assert_eq!(state.custom_field("next_process"), Some(&serde_json::json!(4)));
        assert_eq!(state.custom_field("absent"), None);
    }
}
