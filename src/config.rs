//! Engine configuration.
//!
//! Configuration is kept small and serializable so it can be loaded from JSON
//! or TOML alongside the rest of an application's settings.

use serde::de::Error;
use serde::{Deserialize, Serialize};

/// Engine-wide settings shared by every computed trace of a base.
///
/// # Example
///
/// ```rust
/// use tracekit::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert!(config.persist_state);
///
/// let json = r#"{
///     "partial_recompute": false,
///     "process_warn_threshold": 500
/// }"#;
/// let config = EngineConfig::from_json(json).unwrap();
/// assert!(!config.partial_recompute);
/// assert!(config.eager_overlap_pruning);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Save computation state after every run so the next notification can
    /// resume incrementally. When off, every notification recomputes fully.
    #[serde(default = "EngineConfig::default_true")]
    pub persist_state: bool,

    /// Allow methods to replay only the affected suffix on non-monotonic
    /// changes. When off, non-monotonic changes always recompute fully.
    #[serde(default = "EngineConfig::default_true")]
    pub partial_recompute: bool,

    /// Drop FSA match processes as soon as they overlap a committed match
    /// (only relevant when overlap is disallowed).
    #[serde(default = "EngineConfig::default_true")]
    pub eager_overlap_pruning: bool,

    /// Recompute from scratch after every incremental or partial run and
    /// compare. Divergences are logged and the full result is committed.
    #[serde(default)]
    pub verify_incremental: bool,

    /// Number of concurrently active FSA processes above which a warning is logged.
    #[serde(default = "EngineConfig::default_process_warn_threshold")]
    pub process_warn_threshold: usize,
}

impl EngineConfig {
    const fn default_true() -> bool {
        true
    }

    const fn default_process_warn_threshold() -> usize {
        10_000
    }

    pub fn with_persist_state(mut self, enabled: bool) -> Self {
        self.persist_state = enabled;
        self
    }

    pub fn with_partial_recompute(mut self, enabled: bool) -> Self {
        self.partial_recompute = enabled;
        self
    }

    pub fn with_eager_overlap_pruning(mut self, enabled: bool) -> Self {
        self.eager_overlap_pruning = enabled;
        self
    }

    pub fn with_verify_incremental(mut self, enabled: bool) -> Self {
        self.verify_incremental = enabled;
        self
    }

    /// A zero threshold is rejected by [`validate`](Self::validate).
    pub fn with_process_warn_threshold(mut self, threshold: usize) -> Self {
        self.process_warn_threshold = threshold;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.process_warn_threshold == 0 {
            return Err("Process warn threshold must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Load configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: EngineConfig = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(serde_json::Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load configuration from TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        let config: EngineConfig = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            persist_state: true,
            partial_recompute: true,
            eager_overlap_pruning: true,
            verify_incremental: false,
            process_warn_threshold: Self::default_process_warn_threshold(),
        }
    }
}
