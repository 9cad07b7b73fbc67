//! Base builder for flexible configuration
//!
//! This module provides a builder pattern for assembling a [`TraceBase`] with
//! a custom engine configuration, computation state storage and method set.

use crate::base::TraceBase;
use crate::config::EngineConfig;
use crate::error::{Result, TraceError};
use crate::method::{MethodFactory, MethodRegistry};
#[cfg(feature = "snapshot")]
use crate::storage::SnapshotStateBackend;
use crate::storage::{MemoryStateBackend, StateBackend};
#[cfg(feature = "snapshot")]
use std::path::PathBuf;

/// Builder for a trace base.
///
/// ```rust
/// use tracekit::{BaseBuilder, EngineConfig};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let base = BaseBuilder::new()
///     .config(EngineConfig::default().with_verify_incremental(true))
///     .build()?;
/// assert!(base.config().verify_incremental);
/// # Ok(())
/// # }
/// ```
pub struct BaseBuilder {
    config: EngineConfig,
    registry: MethodRegistry,
    state_backend: Option<Box<dyn StateBackend>>,
    #[cfg(feature = "snapshot")]
    snapshot_path: Option<PathBuf>,
}

impl std::fmt::Debug for BaseBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("BaseBuilder");
        debug
            .field("config", &self.config)
            .field("methods", &self.registry.names())
            .field("custom_state_backend", &self.state_backend.is_some());
        #[cfg(feature = "snapshot")]
        debug.field("snapshot_path", &self.snapshot_path);
        debug.finish()
    }
}

impl BaseBuilder {
    /// Create a new builder: default configuration, built-in methods and
    /// in-memory computation state.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            registry: MethodRegistry::default(),
            state_backend: None,
            #[cfg(feature = "snapshot")]
            snapshot_path: None,
        }
    }

    /// Set the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an additional method (or replace a built-in one).
    pub fn method(mut self, name: impl Into<String>, factory: MethodFactory) -> Self {
        self.registry.register(name, factory);
        self
    }

    /// Store computation state in a custom backend.
    pub fn state_backend(mut self, backend: Box<dyn StateBackend>) -> Self {
        self.state_backend = Some(backend);
        self
    }

    /// Keep computation state in a snapshot file, loaded on build.
    #[cfg(feature = "snapshot")]
    pub fn snapshot_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }

    /// Build the base. Validates the configuration and opens the snapshot
    /// file if one is configured.
    pub fn build(self) -> Result<TraceBase> {
        self.config.validate().map_err(TraceError::InvalidConfig)?;

        let states: Box<dyn StateBackend> = match self.state_backend {
            Some(backend) => backend,
            None => {
                #[cfg(feature = "snapshot")]
                {
                    match self.snapshot_path {
                        Some(path) => Box::new(SnapshotStateBackend::open(path)?),
                        None => Box::new(MemoryStateBackend::new()),
                    }
                }
                #[cfg(not(feature = "snapshot"))]
                {
                    Box::new(MemoryStateBackend::new())
                }
            }
        };

        Ok(TraceBase::with_parts(self.config, self.registry, states))
    }
}

impl Default for BaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}
