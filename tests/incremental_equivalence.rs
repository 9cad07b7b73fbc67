//! Property tests: whatever path a notification takes (incremental step,
//! partial replay or full recompute), the committed derived obsels equal
//! what a recomputation from scratch yields.

use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use tracekit::{EngineConfig, MethodParams, Obsel, ObselDraft, ObselId, RecomputeMode, TraceBase};

const MODEL: &str = "http://localhost/b/m";
const TYPES: [&str; 4] = ["#a", "#b", "#c", "#d"];
const SOURCES: [&str; 2] = ["s1/", "s2/"];
const COMPUTED: [&str; 5] = ["window/", "fused/", "pattern/", "overlapping/", "nested/"];

#[derive(Debug, Clone)]
enum Op {
    Add { source: usize, otype: usize, begin: i64 },
    Remove { source: usize, pick: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..2usize, 0..4usize, 0..40i64)
            .prop_map(|(source, otype, begin)| Op::Add { source, otype, begin }),
        1 => (0..2usize, any::<usize>()).prop_map(|(source, pick)| Op::Remove { source, pick }),
    ]
}

fn pattern(allow_overlap: bool) -> String {
    json!({
        "allow_overlap": allow_overlap,
        "states": {
            "start": {"transitions": [
                {"condition": "#a", "target": "seen_a"},
                {"condition": "#a", "target": "seen_a_again"},
                {"condition": "#c", "target": "seen_c"},
            ]},
            "seen_a": {"max_noise": 2, "transitions": [
                {"condition": "#b", "target": "seen_a"},
                {"condition": "#c", "target": "#d"},
            ]},
            "seen_a_again": {"max_noise": 1, "transitions": [
                {"condition": "#a", "target": "#b"},
            ]},
            "seen_c": {"transitions": [{"condition": "#d", "target": "#a"}]},
        }
    })
    .to_string()
}

fn setup(config: EngineConfig) -> TraceBase {
    let mut base = TraceBase::with_config(config);
    let model = base.create_model(MODEL).unwrap();
    for ot in TYPES {
        model.add_obsel_type(ot);
    }
    for source in SOURCES {
        base.create_stored_trace(source, MODEL, None).unwrap();
    }
    base.create_computed_trace(
        "window/",
        "filter",
        MethodParams::new()
            .with("after", "8")
            .with("before", "30")
            .with("otypes", "#a #b #c"),
        ["s1/"],
    )
    .unwrap();
    base.create_computed_trace("fused/", "fusion", MethodParams::new(), SOURCES)
        .unwrap();
    base.create_computed_trace(
        "pattern/",
        "fsa",
        MethodParams::new().with("fsa", pattern(false)),
        ["s1/"],
    )
    .unwrap();
    base.create_computed_trace(
        "overlapping/",
        "fsa",
        MethodParams::new().with("fsa", pattern(true)),
        ["s2/"],
    )
    .unwrap();
    base.create_computed_trace(
        "nested/",
        "fsa",
        MethodParams::new().with("fsa", pattern(false)),
        ["fused/"],
    )
    .unwrap();
    base
}

fn apply(base: &mut TraceBase, op: &Op) {
    match *op {
        Op::Add { source, otype, begin } => {
            base.create_obsel(SOURCES[source], ObselDraft::new(TYPES[otype], begin))
                .unwrap();
        }
        Op::Remove { source, pick } => {
            let ids: Vec<ObselId> = base
                .obsels(SOURCES[source])
                .unwrap()
                .into_iter()
                .map(|o| o.id().clone())
                .collect();
            if !ids.is_empty() {
                base.remove_obsel(SOURCES[source], ids[pick % ids.len()].clone())
                    .unwrap();
            }
        }
    }
}

fn by_id<'a>(obsels: impl IntoIterator<Item = &'a Obsel>) -> BTreeMap<ObselId, Obsel> {
    obsels
        .into_iter()
        .map(|o| (o.id().clone(), o.clone()))
        .collect()
}

fn check_all(base: &TraceBase) -> Result<(), TestCaseError> {
    for trace in COMPUTED {
        let committed = by_id(base.obsels(trace).unwrap());
        let expected = by_id(&base.recompute_from_scratch(trace).unwrap());
        let again = by_id(&base.recompute_from_scratch(trace).unwrap());
        prop_assert_eq!(&expected, &again, "{} is not deterministic", trace);
        prop_assert_eq!(committed, expected, "{} diverged", trace);
        prop_assert!(!base.is_stale(trace).unwrap());
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_mixed_edits_match_full_recompute(ops in prop::collection::vec(op(), 1..40)) {
        let mut base = setup(EngineConfig::default());
        for op in &ops {
            apply(&mut base, op);
            check_all(&base)?;
        }
    }

    #[test]
    fn prop_without_partial_replay(ops in prop::collection::vec(op(), 1..30)) {
        let mut base = setup(EngineConfig::default().with_partial_recompute(false));
        for op in &ops {
            apply(&mut base, op);
        }
        check_all(&base)?;
    }

    #[test]
    fn prop_lazy_overlap_pruning(ops in prop::collection::vec(op(), 1..30)) {
        let mut base = setup(EngineConfig::default().with_eager_overlap_pruning(false));
        for op in &ops {
            apply(&mut base, op);
        }
        check_all(&base)?;
    }

    #[test]
    fn prop_appends_only_run_incrementally(
        steps in prop::collection::vec((0..2usize, 0..4usize, 0..3i64), 1..40)
    ) {
        let mut base = setup(EngineConfig::default());
        // one clock for both sources keeps the fusion monotonic as well
        let mut clock = 0i64;
        for (source, otype, delta) in steps {
            clock += delta;
            let report = base
                .edit(SOURCES[source], |batch| {
                    batch.add(ObselDraft::new(TYPES[otype], clock));
                    Ok(())
                })
                .unwrap();
            for (trace, mode) in &report.refreshed {
                prop_assert!(
                    matches!(mode, RecomputeMode::Incremental | RecomputeMode::Unchanged),
                    "{} ran {:?}",
                    trace,
                    mode
                );
            }
        }
        check_all(&base)?;
    }
}
