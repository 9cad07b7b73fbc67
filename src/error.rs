//! Error types for tracekit.

use crate::types::{ObselError, ObselId, TraceId};
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TraceError>;

/// A method configuration that cannot be used.
///
/// Always fatal to the computed trace being configured or recomputed; the
/// derived trace is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("unknown method '{0}'")]
    UnknownMethod(String),

    #[error("missing parameter '{0}'")]
    MissingParameter(String),

    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("invalid value '{value}' for parameter '{name}': {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("method '{method}' expects {expected} source trace(s), got {actual}")]
    SourceCount {
        method: String,
        expected: String,
        actual: usize,
    },

    #[error("source trace '{0}' is listed more than once")]
    DuplicateSource(TraceId),

    #[error("invalid time bounds: after ({after}) is greater than before ({before})")]
    InvalidTimeBounds { after: i64, before: i64 },

    #[error("malformed FSA document: {0}")]
    MalformedDocument(String),

    #[error("FSA document has no 'start' state")]
    MissingStartState,

    #[error("state '{state}': transition target '{target}' is neither a state nor an obsel type")]
    DanglingTarget { state: String, target: String },

    #[error("cannot resolve obsel type '{0}'")]
    UnresolvableType(String),

    #[error("state '{state}': {reason}")]
    InvalidState { state: String, reason: String },
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// A configured source trace cannot be read. The computed trace is marked
    /// stale and retried on the next notification.
    #[error("source trace '{0}' is unavailable")]
    SourceUnavailable(TraceId),

    #[error("trace '{0}' not found")]
    TraceNotFound(TraceId),

    #[error("trace '{0}' already exists")]
    TraceExists(TraceId),

    #[error("model '{0}' not found")]
    ModelNotFound(String),

    #[error("model '{0}' already exists")]
    ModelExists(String),

    #[error("trace '{0}' is computed, its obsels cannot be edited directly")]
    ComputedTraceReadOnly(TraceId),

    #[error("trace '{0}' is not a computed trace")]
    NotComputed(TraceId),

    #[error("obsel '{obsel}' already exists in trace '{trace}'")]
    DuplicateObsel { trace: TraceId, obsel: ObselId },

    #[error("obsel '{obsel}' not found in trace '{trace}'")]
    ObselNotFound { trace: TraceId, obsel: ObselId },

    #[error("obsel type '{obsel_type}' is not defined in model '{model}'")]
    UnknownObselType { obsel_type: String, model: String },

    #[error("invalid obsel: {0}")]
    InvalidObsel(#[from] ObselError),

    /// Persisted computation state could not be decoded. The driver treats
    /// this as a cache miss and recomputes from scratch.
    #[error("computation state is corrupted: {0}")]
    StateCorrupted(String),

    /// A programming error detected during recomputation. Aborts the
    /// recomputation of the affected trace only.
    #[error("internal invariant violated: {0}")]
    Invariant(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid snapshot format")]
    InvalidFormat,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("serialization error: {0}")]
    SerializationWithContext(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TraceError {
    /// Whether this error came from the method configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(self, TraceError::Configuration(_))
    }
}
