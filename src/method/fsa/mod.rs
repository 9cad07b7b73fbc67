//! Finite-state pattern matching.
//!
//! The derived trace holds one obsel per match of the automaton over the
//! single source trace. Active partial matches survive between notifications
//! in the computation state, so appended obsels are matched without
//! rescanning the source. Any non-monotonic change recomputes from scratch.

mod config;
mod matcher;

pub use config::{Automaton, START, State, StateId, StateKind, Transition};
pub use matcher::{Completion, Matcher, MatcherRecord, Process, ProcessId, ProcessRecord};

use super::{
    DerivedSet, MethodContext, MethodParams, MethodSetup, TransformMethod, derived_id_in_lineage,
};
use crate::error::{ConfigurationError, Result, TraceError};
use crate::types::{Obsel, TraceModel};

/// Pattern matcher method, parameter `fsa` holds the JSON document.
#[derive(Debug, Clone)]
pub struct FsaMethod {
    automaton: Automaton,
}

impl FsaMethod {
    pub const NAME: &'static str = "fsa";

    pub fn new(document: &str, model: &TraceModel) -> std::result::Result<Self, ConfigurationError> {
        Ok(Self {
            automaton: Automaton::from_json(document, model)?,
        })
    }

    pub fn factory(
        params: &MethodParams,
        setup: &MethodSetup<'_>,
    ) -> std::result::Result<Box<dyn TransformMethod>, ConfigurationError> {
        params.check_known(&["fsa"])?;
        setup.expect_sources(Self::NAME, 1)?;
        let document = params
            .get("fsa")
            .ok_or_else(|| ConfigurationError::MissingParameter("fsa".to_string()))?;
        Ok(Box::new(Self::new(document, setup.model)?))
    }

    pub fn automaton(&self) -> &Automaton {
        &self.automaton
    }

    fn load(&self, custom: &serde_json::Value) -> Result<Matcher> {
        if custom.is_null() {
            return Err(TraceError::StateCorrupted("no matcher state saved".to_string()));
        }
        let record: MatcherRecord = serde_json::from_value(custom.clone())
            .map_err(|e| TraceError::StateCorrupted(format!("unreadable matcher state: {e}")))?;
        Matcher::from_record(record, &self.automaton).map_err(|unknown| {
            TraceError::Invariant(format!("saved process is in unknown state '{}'", unknown.0))
        })
    }

    fn save(&self, matcher: &Matcher, custom: &mut serde_json::Value) -> Result<()> {
        *custom = serde_json::to_value(matcher.to_record(&self.automaton))?;
        Ok(())
    }

    fn feed<'o>(
        &self,
        cx: &MethodContext<'_>,
        matcher: &mut Matcher,
        obsels: impl Iterator<Item = &'o Obsel>,
        out: &mut DerivedSet,
    ) -> Result<usize> {
        let mut emitted = 0;
        let mut warned = false;
        for obsel in obsels {
            for completion in matcher.step(&self.automaton, obsel, cx.config.eager_overlap_pruning) {
                out.insert(Self::emit(cx, completion)?);
                emitted += 1;
            }

            if !warned && matcher.active() > cx.config.process_warn_threshold {
                log::warn!(
                    "fsa {}: {} active match processes (threshold {})",
                    cx.trace,
                    matcher.active(),
                    cx.config.process_warn_threshold
                );
                warned = true;
            }
        }
        Ok(emitted)
    }

    fn emit(cx: &MethodContext<'_>, completion: Completion) -> Result<Obsel> {
        let id = derived_id_in_lineage(
            cx.trace,
            completion.obsel_type.as_str(),
            completion.lineage,
            &completion.provenance,
        );
        Obsel::builder(id, completion.obsel_type, completion.begin)
            .end(completion.end)
            .maybe_subject(completion.subject)
            .source_obsels(completion.provenance)
            .build()
            .map_err(|e| TraceError::Invariant(e.to_string()))
    }
}

impl TransformMethod for FsaMethod {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn recompute(
        &self,
        cx: &MethodContext<'_>,
        custom: &mut serde_json::Value,
        out: &mut DerivedSet,
    ) -> Result<()> {
        let source = cx
            .primary()
            .ok_or_else(|| TraceError::Invariant("fsa without a source".to_string()))?;
        let mut matcher = Matcher::new();
        let emitted = self.feed(cx, &mut matcher, source.iter(), out)?;
        log::debug!(
            "fsa {}: full run over {} obsel(s) emitted {} match(es), {} process(es) active",
            cx.trace,
            source.len(),
            emitted,
            matcher.active()
        );
        self.save(&matcher, custom)
    }

    fn incremental_step(
        &self,
        cx: &MethodContext<'_>,
        _source: usize,
        new_obsels: &[&Obsel],
        custom: &mut serde_json::Value,
        out: &mut DerivedSet,
    ) -> Result<()> {
        let mut matcher = self.load(custom)?;
        self.feed(cx, &mut matcher, new_obsels.iter().copied(), out)?;
        self.save(&matcher, custom)
    }
}
