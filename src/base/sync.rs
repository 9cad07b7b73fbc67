//! Thread-safe wrapper for concurrent base access.
//!
//! `SyncBase` wraps a [`TraceBase`] in `Arc<RwLock<_>>`. Readers share the
//! lock; every mutation takes it exclusively, so notifications for a computed
//! trace are serialized and never interleave.
//!
//! ```rust
//! use tracekit::{MethodParams, ObselDraft, SyncBase};
//! use std::thread;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let base = SyncBase::new();
//! base.write(|b| -> tracekit::Result<()> {
//!     b.create_model("http://m")?.add_obsel_type("#ot");
//!     b.create_stored_trace("s/", "http://m", None)?;
//!     b.create_computed_trace("ctr/", "filter", MethodParams::new(), ["s/"])
//! })?;
//!
//! let writer = base.clone();
//! let handle = thread::spawn(move || {
//!     writer.create_obsel("s/", ObselDraft::new("#ot", 1)).unwrap();
//! });
//! handle.join().unwrap();
//!
//! assert_eq!(base.obsel_count("ctr/")?, 1);
//! # Ok(())
//! # }
//! ```

use super::{ChangeReport, TraceBase};
use crate::error::Result;
use crate::method::MethodParams;
use crate::store::{ObselBatch, ObselDraft};
use crate::types::{Obsel, ObselId, TraceId};
use parking_lot::RwLock;
use std::sync::Arc;

/// Thread-safe handle on a shared [`TraceBase`].
#[derive(Clone, Debug)]
pub struct SyncBase {
    inner: Arc<RwLock<TraceBase>>,
}

impl Default for SyncBase {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncBase {
    pub fn new() -> Self {
        Self::from_base(TraceBase::new())
    }

    pub fn from_base(base: TraceBase) -> Self {
        Self {
            inner: Arc::new(RwLock::new(base)),
        }
    }

    /// Run `f` with shared access.
    pub fn read<R>(&self, f: impl FnOnce(&TraceBase) -> R) -> R {
        f(&self.inner.read())
    }

    /// Run `f` with exclusive access.
    pub fn write<R>(&self, f: impl FnOnce(&mut TraceBase) -> R) -> R {
        f(&mut self.inner.write())
    }

    pub fn create_computed_trace(
        &self,
        id: impl Into<TraceId>,
        method: &str,
        params: MethodParams,
        sources: &[TraceId],
    ) -> Result<()> {
        self.inner
            .write()
            .create_computed_trace(id, method, params, sources)
    }

    pub fn create_obsel(&self, trace: impl AsRef<str>, draft: ObselDraft) -> Result<Obsel> {
        self.inner.write().create_obsel(trace, draft)
    }

    pub fn remove_obsel(&self, trace: impl AsRef<str>, id: impl Into<ObselId>) -> Result<ChangeReport> {
        self.inner.write().remove_obsel(trace, id)
    }

    pub fn edit<F>(&self, trace: impl AsRef<str>, fill: F) -> Result<ChangeReport>
    where
        F: FnOnce(&mut ObselBatch) -> Result<()>,
    {
        self.inner.write().edit(trace, fill)
    }

    pub fn refresh(&self, trace: impl AsRef<str>) -> Result<ChangeReport> {
        self.inner.write().refresh(trace)
    }

    /// Snapshot of the obsels of a trace.
    pub fn obsels(&self, trace: impl AsRef<str>) -> Result<Vec<Obsel>> {
        let base = self.inner.read();
        Ok(base.obsels(trace)?.into_iter().cloned().collect())
    }

    pub fn obsel_count(&self, trace: impl AsRef<str>) -> Result<usize> {
        self.inner.read().obsel_count(trace)
    }

    pub fn is_stale(&self, trace: impl AsRef<str>) -> Result<bool> {
        self.inner.read().is_stale(trace)
    }

    pub fn recompute_from_scratch(&self, trace: impl AsRef<str>) -> Result<Vec<Obsel>> {
        self.inner.read().recompute_from_scratch(trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_concurrent_producers_keep_computed_trace_consistent() {
        let base = SyncBase::new();
        base.write(|b| {
            b.create_model("http://m").unwrap().add_obsel_type("#ot");
            b.create_stored_trace("s1/", "http://m", None).unwrap();
            b.create_stored_trace("s2/", "http://m", None).unwrap();
        });
        base.create_computed_trace(
            "ctr/",
            "fusion",
            MethodParams::new(),
            &[TraceId::from("s1/"), TraceId::from("s2/")],
        )
        .unwrap();

        let handles: Vec<_> = ["s1/", "s2/"]
            .into_iter()
            .map(|trace| {
                let base = base.clone();
                thread::spawn(move || {
                    for begin in 0..50 {
                        base.create_obsel(trace, ObselDraft::new("#ot", begin)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(base.obsel_count("ctr/").unwrap(), 100);
        let expected = base.recompute_from_scratch("ctr/").unwrap();
        assert_eq!(base.obsels("ctr/").unwrap().len(), expected.len());
        assert!(!base.is_stale("ctr/").unwrap());
    }
}
