mod common;

use common::*;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use tomo_prepper::core::project::ProjectLayout;
use tomo_prepper::processing::StageContext;
use tomo_prepper::training::choose_subset;
use tomo_prepper::{PipelineError, Stage, TiltSeries, TrainingConfigBuilder, TrainingParams};
use tomo_tools::{ExternalTools, Tool};

fn series(names: &[&str]) -> Vec<TiltSeries> {
    names
        .iter()
        .map(|name| TiltSeries {
            name: name.to_string(),
            metadata: PathBuf::from(format!("raw/{name}.mrc.mdoc")),
            frames: Vec::new(),
            stacks: None,
            volumes: None,
        })
        .collect()
}

fn read_json(path: &std::path::Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_subset_is_distinct_and_in_range() {
    for seed in 0..50 {
        let chosen = choose_subset(10, 4, Some(seed)).unwrap();
        assert_eq!(chosen.len(), 4);
        let unique: HashSet<_> = chosen.iter().collect();
        assert_eq!(unique.len(), 4, "duplicates in {:?}", chosen);
        assert!(chosen.iter().all(|&i| i < 10));
        assert!(chosen.windows(2).all(|w| w[0] < w[1]));
    }
}

#[test]
fn test_subset_seed_is_reproducible() {
    assert_eq!(choose_subset(20, 5, Some(42)).unwrap(), choose_subset(20, 5, Some(42)).unwrap());
    assert_eq!(choose_subset(3, 3, None).unwrap(), vec![0, 1, 2]);
}

#[test]
fn test_subset_bounds() {
    assert!(matches!(
        choose_subset(2, 3, Some(1)),
        Err(PipelineError::InvalidSubset { requested: 3, available: 2 })
    ));
    assert!(matches!(
        choose_subset(2, 0, Some(1)),
        Err(PipelineError::InvalidSubset { requested: 0, .. })
    ));
}

#[test]
fn test_documents_reference_subset_and_whole_directories() {
    let layout = ProjectLayout::new("/data/project");
    let mut params = TrainingParams::new("krios_lamellae", 2);
    params.seed = Some(3);
    params.epochs = 40;

    let all = series(&["a", "b", "c"]);
    let docs = TrainingConfigBuilder::new(&params).documents(&layout, &all, 1).unwrap();

    assert_eq!(docs.subset.len(), 2);
    for (i, name) in docs.subset.iter().enumerate() {
        assert_eq!(docs.extraction.even[i], PathBuf::from(format!("/data/project/tomograms/even/{name}.mrc")));
        assert_eq!(docs.extraction.odd[i], PathBuf::from(format!("/data/project/tomograms/odd/{name}.mrc")));
    }
    assert_eq!(docs.extraction.patch_shape, [72, 72, 72]);
    assert_eq!(docs.extraction.path, layout.model_dir);

    assert_eq!(docs.training.train_data, layout.model_dir);
    assert_eq!(docs.training.epochs, 40);
    assert_eq!(docs.training.model_name, "krios_lamellae");
    assert_eq!(docs.training.gpu_id, 1);

    assert_eq!(
        docs.prediction.path,
        PathBuf::from("/data/project/tomograms/cryocare_model/krios_lamellae.tar.gz")
    );
    assert_eq!(docs.prediction.even, PathBuf::from("/data/project/tomograms/even"));
    assert_eq!(docs.prediction.odd, PathBuf::from("/data/project/tomograms/odd"));
    assert_eq!(docs.prediction.output, PathBuf::from("/data/project/tomograms/denoised"));
    assert_eq!(docs.prediction.n_tiles, [2, 4, 2]);
}

#[test]
fn test_written_documents_match_cryocare_schema() {
    let dir = TempDir::new().unwrap();
    let layout = ProjectLayout::new(dir.path());
    let params = TrainingParams::new("m", 1);
    let builder = TrainingConfigBuilder::new(&params);
    let docs = builder.documents(&layout, &series(&["only"]), 0).unwrap();
    builder.write(&layout, &docs).unwrap();

    let extraction = read_json(&layout.train_data_config);
    let mut keys: Vec<&str> = extraction.as_object().unwrap().keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(
        keys,
        vec!["even", "n_normalization_samples", "num_slices", "odd", "overwrite", "patch_shape", "path", "split", "tilt_axis"]
    );
    assert_eq!(extraction["overwrite"], "True");
    assert_eq!(extraction["tilt_axis"], "Y");
    assert_eq!(extraction["split"], 0.9);
    assert_eq!(extraction["num_slices"], 1200);

    let training = read_json(&layout.train_config);
    assert_eq!(training["learning_rate"], 0.0004);
    assert_eq!(training["unet_n_first"], 16);
    assert_eq!(training["batch_size"], 16);
    assert_eq!(training["overwrite"], "True");
    assert_eq!(training["gpu_id"], 0);

    let prediction = read_json(&layout.predict_config);
    assert_eq!(prediction["n_tiles"], serde_json::json!([2, 4, 2]));
    assert_eq!(prediction["even"], layout.volume_dirs.even.to_str().unwrap());
}

#[test]
fn test_unwritable_document_is_config_write_error() {
    let dir = TempDir::new().unwrap();
    let layout = ProjectLayout::new(dir.path().join("does/not/exist"));
    let params = TrainingParams::new("m", 1);
    let builder = TrainingConfigBuilder::new(&params);
    let docs = builder.documents(&layout, &series(&["a"]), 0).unwrap();

    match builder.write(&layout, &docs) {
        Err(PipelineError::ConfigWrite { path, .. }) => assert_eq!(path, layout.train_data_config),
        other => panic!("expected ConfigWrite, got {:?}", other),
    }
}

#[test]
fn test_projection_files_are_moved_aside() {
    let dir = TempDir::new().unwrap();
    let layout = ProjectLayout::new(dir.path());
    ProjectLayout::ensure_dirs(&[&layout.volume_dirs.even, &layout.volume_dirs.odd]).unwrap();
    for name in ["a.mrc", "a_projXY.mrc", "a_projXZ.mrc"] {
        fs::write(layout.volume_dirs.even.join(name), b"x").unwrap();
    }
    fs::write(layout.volume_dirs.odd.join("a_projXZ.mrc"), b"x").unwrap();

    let moved = TrainingConfigBuilder::stash_projections(&layout, &series(&["a"])).unwrap();
    assert_eq!(moved, 3);
    assert!(layout.volume_dirs.even.join("a.mrc").is_file());
    assert!(layout.volume_dirs.even.join("proj/a_projXY.mrc").is_file());
    assert!(layout.volume_dirs.odd.join("proj/a_projXZ.mrc").is_file());
    assert!(!layout.volume_dirs.odd.join("a_projXZ.mrc").exists());

    // Nothing left to move the second time.
    assert_eq!(TrainingConfigBuilder::stash_projections(&layout, &series(&["a"])).unwrap(), 0);
}

#[test]
fn test_series_named_like_a_projection_keeps_its_volume() {
    let dir = TempDir::new().unwrap();
    let layout = ProjectLayout::new(dir.path());
    ProjectLayout::ensure_dirs(&[&layout.volume_dirs.even, &layout.volume_dirs.odd]).unwrap();
    let even = &layout.volume_dirs.even;
    for name in ["a.mrc", "a_projXZ.mrc", "a_projXZ_projXY.mrc", "notes_projXY.txt"] {
        fs::write(even.join(name), b"x").unwrap();
    }

    let all = series(&["a", "a_projXZ"]);
    let moved = TrainingConfigBuilder::stash_projections(&layout, &all).unwrap();

    assert_eq!(moved, 1);
    assert!(even.join("a.mrc").is_file());
    assert!(even.join("a_projXZ.mrc").is_file());
    assert!(even.join("proj/a_projXZ_projXY.mrc").is_file());
    assert!(even.join("notes_projXY.txt").is_file());
}

#[test]
fn test_training_failure_stops_before_prediction() {
    let dir = TempDir::new().unwrap();
    let layout = ProjectLayout::new(dir.path());
    let tools = ExternalTools::default();
    let runner = ScriptedRunner::failing(Tool::CryoCareTrain);
    let ctx = StageContext {
        layout: &layout,
        tools: &tools,
        runner: &runner,
        pixel_size: PIXEL_SIZE,
        gpu_id: 0,
        gain: None,
    };

    let params = TrainingParams::new("m", 1);
    let err = TrainingConfigBuilder::new(&params).run(&ctx, &series(&["a", "b"])).unwrap_err();
    match err {
        PipelineError::ExternalToolFailure { stage, .. } => assert_eq!(stage, Stage::Train),
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(runner.calls_to(Tool::CryoCareExtract).len(), 1);
    assert!(runner.calls_to(Tool::CryoCarePredict).is_empty());

    // Documents were already on disk when the tools ran.
    assert!(layout.train_data_config.is_file());
    let extract = &runner.calls_to(Tool::CryoCareExtract)[0];
    assert_eq!(extract.value_of("--conf").unwrap(), layout.train_data_config.as_os_str());
}
