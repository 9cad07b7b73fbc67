//! Temporal window filter.
//!
//! The derived trace holds a copy of every obsel of the single source whose
//! begin lies in `[after, before)`, optionally restricted to some obsel types.
//! Membership depends only on the obsel itself, so appended obsels never
//! affect earlier results and a non-monotonic change at `P` only touches the
//! suffix starting at `P`.

use super::{
    DerivedSet, MethodContext, MethodParams, MethodSetup, Replay, TransformMethod, derived_id,
};
use crate::error::{ConfigurationError, Result, TraceError};
use crate::types::{Obsel, ObselType, Timestamp};
use std::collections::BTreeSet;
use std::ops::Bound;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterMethod {
    after: Option<Timestamp>,
    before: Option<Timestamp>,
    otypes: Option<BTreeSet<ObselType>>,
}

impl FilterMethod {
    pub const NAME: &'static str = "filter";
    const PARAMETERS: &'static [&'static str] = &["after", "before", "otypes"];

    pub fn new(after: Option<Timestamp>, before: Option<Timestamp>) -> std::result::Result<Self, ConfigurationError> {
        if let (Some(after), Some(before)) = (after, before)
            && after > before
        {
            return Err(ConfigurationError::InvalidTimeBounds { after, before });
        }
        Ok(Self {
            after,
            before,
            otypes: None,
        })
    }

    /// Only keep obsels of the given types.
    pub fn with_otypes<I>(mut self, otypes: I) -> Self
    where
        I: IntoIterator<Item = ObselType>,
    {
        self.otypes = Some(otypes.into_iter().collect());
        self
    }

    pub fn factory(
        params: &MethodParams,
        setup: &MethodSetup<'_>,
    ) -> std::result::Result<Box<dyn TransformMethod>, ConfigurationError> {
        params.check_known(Self::PARAMETERS)?;
        setup.expect_sources(Self::NAME, 1)?;

        let mut method = Self::new(params.timestamp("after")?, params.timestamp("before")?)?;

        if let Some(list) = params.get("otypes") {
            let otypes = list
                .split_whitespace()
                .map(|reference| {
                    setup
                        .model
                        .resolve(reference)
                        .ok_or_else(|| ConfigurationError::UnresolvableType(reference.to_string()))
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;
            method = method.with_otypes(otypes);
        }

        Ok(Box::new(method))
    }

    /// Window predicate: `after <= begin < before`, and a matching type.
    pub fn accepts(&self, obsel: &Obsel) -> bool {
        let begin = obsel.begin();
        self.after.is_none_or(|after| after <= begin)
            && self.before.is_none_or(|before| begin < before)
            && self
                .otypes
                .as_ref()
                .is_none_or(|otypes| otypes.contains(obsel.obsel_type()))
    }

    fn derive(&self, cx: &MethodContext<'_>, obsel: &Obsel) -> Obsel {
        let id = derived_id(cx.trace, obsel.obsel_type().as_str(), std::slice::from_ref(obsel.id()));
        obsel.derive_copy(id)
    }

    fn add_passing<'o>(
        &self,
        cx: &MethodContext<'_>,
        obsels: impl Iterator<Item = &'o Obsel>,
        out: &mut DerivedSet,
    ) -> usize {
        let mut added = 0;
        for obsel in obsels.filter(|obsel| self.accepts(obsel)) {
            out.insert(self.derive(cx, obsel));
            added += 1;
        }
        added
    }
}

impl TransformMethod for FilterMethod {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn recompute(
        &self,
        cx: &MethodContext<'_>,
        _custom: &mut serde_json::Value,
        out: &mut DerivedSet,
    ) -> Result<()> {
        let source = cx
            .primary()
            .ok_or_else(|| TraceError::Invariant("filter without a source".to_string()))?;
        let lower = self.after.map_or(Bound::Unbounded, Bound::Included);
        let upper = self.before.map_or(Bound::Unbounded, Bound::Excluded);
        self.add_passing(cx, source.range(lower, upper), out);
        Ok(())
    }

    fn incremental_step(
        &self,
        cx: &MethodContext<'_>,
        _source: usize,
        new_obsels: &[&Obsel],
        _custom: &mut serde_json::Value,
        out: &mut DerivedSet,
    ) -> Result<()> {
        let added = self.add_passing(cx, new_obsels.iter().copied(), out);
        log::debug!(
            "filter {}: {} of {} new obsel(s) in window",
            cx.trace,
            added,
            new_obsels.len()
        );
        Ok(())
    }

    fn partial_recompute(
        &self,
        cx: &MethodContext<'_>,
        from: Timestamp,
        _custom: &mut serde_json::Value,
        out: &mut DerivedSet,
    ) -> Result<Replay> {
        let source = cx
            .primary()
            .ok_or_else(|| TraceError::Invariant("filter without a source".to_string()))?;
        let dropped = out.truncate_from(from);
        let added = self.add_passing(cx, source.range(Bound::Included(from), Bound::Unbounded), out);
        log::debug!(
            "filter {}: replay from {} dropped {} and re-added {} obsel(s)",
            cx.trace,
            from,
            dropped,
            added
        );
        Ok(Replay::Done)
    }
}
