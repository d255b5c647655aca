mod common;

use common::*;
use nalgebra::DMatrix;
use std::path::Path;
use tempfile::TempDir;
use tomo_prepper::core::project::ProjectLayout;
use tomo_prepper::core::series::CorrectedSums;
use tomo_prepper::io::rawtlt;
use tomo_prepper::processing::integrated::relative_path;
use tomo_prepper::processing::normalise::normalise_volume;
use tomo_prepper::{MrcFile, PipelineError, StackAssembler, TiltSeries};

#[test]
fn test_build_stack_keeps_given_order() {
    let dir = TempDir::new().unwrap();
    let paths: Vec<_> = [5.0, -1.0, 2.0]
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let p = dir.path().join(format!("img{i}.mrc"));
            write_image(&p, *v);
            p
        })
        .collect();
    let refs: Vec<&Path> = paths.iter().map(|p| p.as_path()).collect();

    let stack = StackAssembler::new(1.35).build_stack(&refs).unwrap();
    assert_eq!(stack.shape(), (3, 4, 6));
    let corners: Vec<f32> = stack.sections.iter().map(|s| s[(3, 5)]).collect();
    assert_eq!(corners, vec![5.0, -1.0, 2.0]);
    let voxel = stack.voxel_size();
    assert!((voxel[0] - 1.35).abs() < 1e-6 && (voxel[2] - 1.35).abs() < 1e-6);
}

#[test]
fn test_build_stack_rejects_mismatched_shapes() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.mrc");
    let b = dir.path().join("b.mrc");
    write_image(&a, 0.0);
    MrcFile::new(vec![DMatrix::zeros(5, 6)], 1.0).write(&b).unwrap();

    let err = StackAssembler::new(1.0).build_stack(&[&a, &b]).unwrap_err();
    assert!(matches!(err, PipelineError::Mrc { ref path, .. } if path == &b), "{err}");
}

#[test]
fn test_build_stack_rejects_volumes() {
    let dir = TempDir::new().unwrap();
    let vol = dir.path().join("vol.mrc");
    write_volume(&vol, 2);
    let err = StackAssembler::new(1.0).build_stack(&[&vol]).unwrap_err();
    assert!(matches!(err, PipelineError::Mrc { .. }));
}

#[test]
fn test_assemble_writes_sorted_triple() {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write_project(root, &[("lam", &[3.0, -3.0, 0.0])]);
    let layout = ProjectLayout::new(root);
    ProjectLayout::ensure_dirs(&[&layout.stacks]).unwrap();

    let mut series = TiltSeries::from_metadata(&root.join("raw/lam.mrc.mdoc")).unwrap();
    // Stand in for motion correction: each sum is the raw movie itself,
    // with the odd sum offset so the kinds can be told apart.
    for frame in series.frames.iter_mut() {
        let sums = CorrectedSums::for_movie(&frame.raw);
        write_image(&sums.0.full, frame.tilt_angle as f32);
        write_image(&sums.0.even, frame.tilt_angle as f32);
        write_image(&sums.0.odd, frame.tilt_angle as f32 + 100.0);
        frame.corrected = Some(sums);
    }

    let set = StackAssembler::new(PIXEL_SIZE).assemble(&layout, &mut series).unwrap();

    assert_eq!(set.stacks.full, root.join("stacks/lam.st"));
    assert_eq!(set.angle_file, root.join("stacks/lam.rawtlt"));
    assert_eq!(corner_values(&set.stacks.full), vec![-3.0, 0.0, 3.0]);
    assert_eq!(corner_values(&set.stacks.odd), vec![97.0, 100.0, 103.0]);
    assert_eq!(rawtlt::read_angles(&set.angle_file).unwrap(), vec![-3.0, 0.0, 3.0]);
    assert_eq!(series.stacks.as_ref(), Some(&set));
}

#[test]
fn test_assemble_requires_corrected_frames() {
    let dir = TempDir::new().unwrap();
    write_project(dir.path(), &[("lam", &[0.0])]);
    let layout = ProjectLayout::new(dir.path());
    let mut series = TiltSeries::from_metadata(&dir.path().join("raw/lam.mrc.mdoc")).unwrap();

    let err = StackAssembler::new(1.0).assemble(&layout, &mut series).unwrap_err();
    assert!(matches!(err, PipelineError::MissingInput(_)));
}

#[test]
fn test_rawtlt_format() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.rawtlt");
    rawtlt::write_angles(&path, &[-60.0, -1.5, 0.0, 2.25]).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "-60.0\n-1.5\n0.0\n2.25\n");
}

#[test]
fn test_normalise_to_unit_std() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tomo.mrc");
    write_volume(&path, 4);
    let before = MrcFile::read(&path).unwrap();

    let std = normalise_volume(&path).unwrap().expect("has variance");
    assert!((std - before.stats().std).abs() < 1e-9);

    let after = MrcFile::read(&path).unwrap();
    let stats = after.stats();
    assert!((stats.std - 1.0).abs() < 1e-5, "std = {}", stats.std);
    assert!((stats.mean - before.stats().mean / std).abs() < 1e-4);
    assert_eq!(after.shape(), before.shape());
    assert_eq!(after.voxel_size(), before.voxel_size());
    assert!(!after.header.labels.is_empty());
}

#[test]
fn test_normalise_leaves_flat_volume_alone() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("flat.mrc");
    MrcFile::new(vec![DMatrix::from_element(3, 3, 7.0); 2], 1.0).write(&path).unwrap();
    let bytes = std::fs::read(&path).unwrap();

    assert_eq!(normalise_volume(&path).unwrap(), None);
    assert_eq!(std::fs::read(&path).unwrap(), bytes);
}

#[test]
fn test_mrc_header_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("v.mrc");
    let mut vol = MrcFile::new(
        vec![DMatrix::from_fn(2, 3, |r, c| (r * 3 + c) as f32); 2],
        4.5,
    );
    for i in 0..12 {
        vol.add_label(&format!("label {i}"));
    }
    vol.write(&path).unwrap();

    let back = MrcFile::read(&path).unwrap();
    assert_eq!(back.sections, vol.sections);
    assert_eq!(back.header.labels.len(), 10);
    assert_eq!(back.header.labels[0], "label 2");
    assert_eq!(back.voxel_size(), [4.5, 4.5, 4.5]);
    let stats = back.stats();
    assert_eq!((stats.min, stats.max), (0.0, 5.0));
}

#[test]
fn test_truncated_mrc_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("short.mrc");
    write_volume(&path, 2);
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 8]).unwrap();

    assert!(matches!(MrcFile::read(&path), Err(PipelineError::Mrc { .. })));
}

#[test]
fn test_relative_path() {
    assert_eq!(
        relative_path(Path::new("/p/tomograms/even"), Path::new("/p/AreTomo3Output/a_EVN_Vol.mrc")),
        Path::new("../../AreTomo3Output/a_EVN_Vol.mrc")
    );
    assert_eq!(relative_path(Path::new("/p"), Path::new("/p/x.mrc")), Path::new("x.mrc"));
}
