//! Computed traces kept incrementally consistent with their source traces.
//!
//! A trace is an ordered collection of obsels (timestamped events). Computed
//! traces are derived from source traces by a transformation method and are
//! updated on every committed change of their sources: appends resume from
//! saved state, other changes replay the affected suffix or recompute.
//!
//! ```rust
//! use tracekit::{MethodParams, ObselDraft, TraceBase};
//! use serde_json::json;
//!
//! let mut base = TraceBase::new();
//! let model = base.create_model("http://localhost/b/m")?;
//! for ot in ["#click", "#scroll", "#drag"] {
//!     model.add_obsel_type(ot);
//! }
//! base.create_stored_trace("s/", "http://localhost/b/m", Some("alice"))?;
//!
//! let fsa = json!({"states": {
//!     "start": {"transitions": [{"condition": "#click", "target": "clicked"}]},
//!     "clicked": {"max_noise": 1, "transitions": [{"condition": "#scroll", "target": "#drag"}]},
//! }});
//! base.create_computed_trace("ctr/", "fsa", MethodParams::new().with("fsa", fsa.to_string()), ["s/"])?;
//!
//! base.create_obsel("s/", ObselDraft::new("#click", 0))?;
//! base.create_obsel("s/", ObselDraft::new("#click", 1))?;
//! base.create_obsel("s/", ObselDraft::new("#scroll", 2))?;
//! assert_eq!(base.obsel_count("ctr/")?, 1);
//! # Ok::<(), tracekit::TraceError>(())
//! ```

pub mod base;
pub mod builder;
pub mod change;
pub mod config;
pub mod driver;
pub mod error;
pub mod method;
pub mod storage;
pub mod store;

pub use tracekit_types as types;

pub use base::{BaseStats, ChangeReport, TraceBase};
#[cfg(feature = "sync")]
pub use base::SyncBase;
pub use builder::BaseBuilder;
pub use change::{ChangeDescriptor, ChangeKind};
pub use config::EngineConfig;
pub use driver::{Driver, Job, Outcome, RecomputeMode, Trigger, recompute};
pub use error::{ConfigurationError, Result, TraceError};
pub use method::{
    DerivedSet, FilterMethod, FsaMethod, FusionMethod, MethodContext, MethodParams, MethodRegistry,
    MethodSetup, Replay, TransformMethod, derived_id, derived_id_in_lineage,
};
pub use storage::{ComputationState, MemoryStateBackend, StateBackend, StateStats};
#[cfg(feature = "snapshot")]
pub use storage::SnapshotStateBackend;
pub use store::{ObselBatch, ObselDraft, ObselKey, ObselStore, StoreStats};

pub use types::{Obsel, ObselId, ObselType, Timestamp, TraceId, TraceKind, TraceModel};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{BaseBuilder, EngineConfig, Result, TraceBase, TraceError};

    pub use crate::{ChangeReport, MethodParams, ObselDraft, RecomputeMode};

    pub use crate::types::{Obsel, ObselId, ObselType, Timestamp, TraceId, TraceModel};

    #[cfg(feature = "sync")]
    pub use crate::SyncBase;

    pub use std::ops::Bound;
}
