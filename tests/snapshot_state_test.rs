use serde_json::json;
use tempfile::TempDir;
use tracekit::{
    BaseBuilder, MethodParams, ObselDraft, SnapshotStateBackend, StateBackend, TraceBase, TraceId,
};

const MODEL: &str = "http://localhost/b/m";
const SRC: &str = "http://localhost/b/s/";
const CTR: &str = "http://localhost/b/ctr/";

fn populate(base: &mut TraceBase) {
    let model = base.create_model(MODEL).unwrap();
    for ot in ["#open", "#edit", "#save", "#session"] {
        model.add_obsel_type(ot);
    }
    base.create_stored_trace(SRC, MODEL, Some("alice")).unwrap();
    let fsa = json!({"states": {
        "start": {"transitions": [{"condition": "#open", "target": "opened"}]},
        "opened": {"max_noise": 3, "transitions": [
            {"condition": "#edit", "target": "opened"},
            {"condition": "#save", "target": "#session"},
        ]},
    }});
    base.create_computed_trace(CTR, "fsa", MethodParams::new().with("fsa", fsa.to_string()), [SRC])
        .unwrap();
}

#[test]
fn test_state_survives_in_snapshot_file() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("states.snap");

    let mut base = BaseBuilder::new().snapshot_path(&path).build().unwrap();
    populate(&mut base);
    base.create_obsel(SRC, ObselDraft::new("#open", 1)).unwrap();
    base.create_obsel(SRC, ObselDraft::new("#edit", 2)).unwrap();

    let live = base.computation_state(CTR).unwrap().unwrap();
    assert_eq!(live.generation, 3);
    assert_eq!(live.custom_field("processes").unwrap().as_array().unwrap().len(), 1);

    let reopened = SnapshotStateBackend::open(&path).unwrap();
    let on_disk = reopened.load_state(&TraceId::from(CTR)).unwrap().unwrap();
    assert_eq!(on_disk, live);
    assert_eq!(reopened.stats().entries, 1);
}

#[test]
fn test_deleted_trace_state_is_dropped() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("states.snap");

    let mut base = BaseBuilder::new().snapshot_path(&path).build().unwrap();
    populate(&mut base);
    base.delete_trace(CTR).unwrap();

    let reopened = SnapshotStateBackend::open(&path).unwrap();
    assert_eq!(reopened.load_state(&TraceId::from(CTR)).unwrap(), None);
}

#[test]
fn test_stale_snapshot_state_is_not_trusted() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("states.snap");

    {
        let mut base = BaseBuilder::new().snapshot_path(&path).build().unwrap();
        populate(&mut base);
        for (otype, begin) in [("#open", 1), ("#edit", 2), ("#edit", 3)] {
            base.create_obsel(SRC, ObselDraft::new(otype, begin)).unwrap();
        }
    }

    // a fresh base reuses the file but starts its own generations
    let mut base = BaseBuilder::new().snapshot_path(&path).build().unwrap();
    populate(&mut base);
    assert_eq!(base.computation_state(CTR).unwrap().unwrap().generation, 1);

    base.create_obsel(SRC, ObselDraft::new("#save", 4)).unwrap();
    assert_eq!(base.obsel_count(CTR).unwrap(), 0);
    base.create_obsel(SRC, ObselDraft::new("#open", 5)).unwrap();
    base.create_obsel(SRC, ObselDraft::new("#save", 6)).unwrap();
    assert_eq!(base.obsel_count(CTR).unwrap(), 1);
    assert_eq!(base.obsels(CTR).unwrap()[0].begin(), 5);
}

#[test]
fn test_deferred_writes_with_custom_backend() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("states.snap");

    let backend = SnapshotStateBackend::open(&path).unwrap().with_write_every(100);
    let mut base = BaseBuilder::new()
        .state_backend(Box::new(backend))
        .build()
        .unwrap();
    populate(&mut base);
    base.create_obsel(SRC, ObselDraft::new("#open", 1)).unwrap();

    assert!(base.computation_state(CTR).unwrap().is_some());
    assert!(!path.exists());
}
