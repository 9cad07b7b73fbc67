//! # tracekit-types
//!
//! Core data types shared by the tracekit transformation engine.
//!
//! This crate provides the vocabulary every trace is built from:
//!
//! - **Obsel types**: `Obsel`, `ObselId`, `ObselBuilder`, `ObselError`, `Timestamp`
//! - **Model types**: `TraceModel`, `ObselType`, `resolve_reference`
//! - **Trace types**: `TraceId`, `TraceKind`
//!
//! All types are serializable with Serde.
//!
//! ## Examples
//!
//! ```rust
//! use tracekit_types::model::TraceModel;
//! use tracekit_types::obsel::Obsel;
//!
//! let mut model = TraceModel::new("http://example.org/base/model");
//! let click = model.add_obsel_type("#click");
//!
//! let obsel = Obsel::builder("o1", click.clone(), 42)
//!     .subject("alice")
//!     .build()
//!     .unwrap();
//! assert_eq!(obsel.obsel_type(), &click);
//! assert_eq!(obsel.end(), 42);
//! ```

pub mod model;
pub mod obsel;
pub mod trace;

pub use model::{ObselType, TraceModel, resolve_reference};
pub use obsel::{Attributes, Obsel, ObselBuilder, ObselError, ObselId, Timestamp};
pub use trace::{TraceId, TraceKind};
