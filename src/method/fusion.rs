//! Fusion of several source traces into one.

use super::{
    DerivedSet, MethodContext, MethodParams, MethodSetup, Replay, TransformMethod, derived_id,
};
use crate::error::{ConfigurationError, Result};
use crate::store::ObselStore;
use crate::types::{Obsel, Timestamp};
use std::ops::Bound;

/// The derived trace is the union of all sources. Each derived obsel is a
/// copy of one source obsel, with that obsel as provenance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FusionMethod;

impl FusionMethod {
    pub const NAME: &'static str = "fusion";

    pub fn factory(
        params: &MethodParams,
        setup: &MethodSetup<'_>,
    ) -> std::result::Result<Box<dyn TransformMethod>, ConfigurationError> {
        params.check_known(&[])?;
        if setup.source_count == 0 {
            return Err(ConfigurationError::SourceCount {
                method: Self::NAME.to_string(),
                expected: "at least 1".to_string(),
                actual: 0,
            });
        }
        Ok(Box::new(FusionMethod))
    }

    fn derive(cx: &MethodContext<'_>, source: &ObselStore, obsel: &Obsel) -> Obsel {
        // the source trace is part of the tag: ids are only unique per trace
        let tag = format!("{} {}", source.trace(), obsel.obsel_type());
        let id = derived_id(cx.trace, &tag, std::slice::from_ref(obsel.id()));
        obsel.derive_copy(id)
    }
}

impl TransformMethod for FusionMethod {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn recompute(
        &self,
        cx: &MethodContext<'_>,
        _custom: &mut serde_json::Value,
        out: &mut DerivedSet,
    ) -> Result<()> {
        for source in cx.sources {
            for obsel in source.iter() {
                out.insert(Self::derive(cx, source, obsel));
            }
        }
        Ok(())
    }

    fn incremental_step(
        &self,
        cx: &MethodContext<'_>,
        source: usize,
        new_obsels: &[&Obsel],
        _custom: &mut serde_json::Value,
        out: &mut DerivedSet,
    ) -> Result<()> {
        if let Some(store) = cx.sources.get(source) {
            for obsel in new_obsels {
                out.insert(Self::derive(cx, store, obsel));
            }
        }
        Ok(())
    }

    fn partial_recompute(
        &self,
        cx: &MethodContext<'_>,
        from: Timestamp,
        _custom: &mut serde_json::Value,
        out: &mut DerivedSet,
    ) -> Result<Replay> {
        out.truncate_from(from);
        for source in cx.sources {
            for obsel in source.range(Bound::Included(from), Bound::Unbounded) {
                out.insert(Self::derive(cx, source, obsel));
            }
        }
        Ok(Replay::Done)
    }
}
