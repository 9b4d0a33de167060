//! Alignment-and-fusion loop on synthetic phantoms, in-process and through the binary

mod common;

use std::process::Command;

use common::*;
use nii_superres::brain_mask::OtsuMask;
use nii_superres::fusion::{FbaParams, FusionMethod};
use nii_superres::nifti_io::read_nifti_file;
use nii_superres::pipeline::{AlignCombine, AlignCombineParams};
use nii_superres::registration::IdentityRegistrar;
use nii_superres::resample::{GridResampler, Interpolation, Resampler};
use nii_superres::transform::RigidTransform;
use nii_superres::Mask;

const N: usize = 20;

/// Displaced copies of the phantom and the transforms that undo the displacement
fn displaced_inputs() -> (Vec<nii_superres::Volume>, Vec<RigidTransform>) {
    let truth = phantom(N);
    let shifts = [[1.0, 0.0, 0.0], [0.0, -2.0, 0.0], [0.0, 0.0, 1.0]];
    let mut inputs = Vec::new();
    let mut undo = Vec::new();
    for s in shifts {
        let displace = RigidTransform::from_euler_translation(0.0, 0.0, 0.0, s);
        inputs.push(
            GridResampler
                .resample(&truth, &displace, &truth.grid, Interpolation::Linear)
                .unwrap(),
        );
        undo.push(displace.inverse());
    }
    (inputs, undo)
}

#[test]
fn test_known_transforms_recover_phantom() {
    let truth = phantom(N);
    let (inputs, undo) = displaced_inputs();
    let everywhere = vec![1u8; truth.data.len()];

    let oracle = OracleRegistrar::new(undo);
    let params = AlignCombineParams {
        iterations: 2,
        interpolation: Interpolation::Linear,
        ..Default::default()
    };
    let pipeline = AlignCombine::new(&oracle, GridResampler, OtsuMask::default(), params);
    let fused = pipeline.run(&inputs, None, &truth).unwrap();
    let aligned = TestResult::new("oracle", &fused.data, &truth.data, &everywhere);
    aligned.print();

    let params = AlignCombineParams {
        iterations: 2,
        interpolation: Interpolation::Linear,
        ..Default::default()
    };
    let naive = AlignCombine::new(IdentityRegistrar, GridResampler, OtsuMask::default(), params);
    let unaligned = naive.run(&inputs, None, &truth).unwrap();
    let unaligned = TestResult::new("identity", &unaligned.data, &truth.data, &everywhere);
    unaligned.print();

    assert!(aligned.nrmse < 1e-3, "aligned NRMSE {}", aligned.nrmse);
    assert!(unaligned.nrmse > 10.0 * aligned.nrmse);
    assert_eq!(*oracle.calls.borrow(), vec![0, 1, 2, 0, 1, 2]);
}

#[test]
fn test_fba_loop_with_masks() {
    let truth = phantom(N);
    let (inputs, undo) = displaced_inputs();
    let masks: Vec<Mask> = inputs.iter().map(|v| Mask::from_volume(v, 10.0)).collect();

    let oracle = OracleRegistrar::new(undo);
    let params = AlignCombineParams {
        iterations: 3,
        interpolation: Interpolation::Cubic,
        fusion: FusionMethod::Fba(FbaParams::default()),
        ..Default::default()
    };
    let pipeline = AlignCombine::new(&oracle, GridResampler, OtsuMask::default(), params);
    let state = pipeline.run_with_state(&inputs, Some(&masks), &truth).unwrap();

    assert!(state.reference.data.iter().all(|v| v.is_finite() && *v >= 0.0));
    assert_eq!(state.transforms.len(), 3);
    let brain: Vec<u8> = truth.data.iter().map(|&v| (v > 10.0) as u8).collect();
    let result = TestResult::new("fba", &state.reference.data, &truth.data, &brain);
    result.print();
    assert!(result.nrmse < 0.05, "FBA NRMSE {}", result.nrmse);
}

#[test]
fn test_binary_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let truth = phantom(N);
    let a = write_volume(dir.path(), "a.nii", &truth);
    let b = write_volume(dir.path(), "b.nii.gz", &truth);
    let grid = write_volume(dir.path(), "grid.nii", &truth);
    let mask = Mask::from_volume(&truth, 10.0);
    let ma = write_mask(dir.path(), "ma.nii", &mask);
    let mb = write_mask(dir.path(), "mb.nii", &mask);
    let output = dir.path().join("out.nii.gz");

    let status = Command::new(env!("CARGO_BIN_EXE_align_combine"))
        .arg(&a)
        .arg(&b)
        .arg(&grid)
        .arg(&output)
        .arg("--masks")
        .arg(&ma)
        .arg(&mb)
        .args(["--registration", "none", "--resampling", "internal", "--brain-mask", "otsu"])
        .args(["--iter", "2", "--interp", "linear"])
        .status()
        .unwrap();
    assert!(status.success());

    let fused = read_nifti_file(&output).unwrap();
    assert_eq!(fused.dims(), truth.dims());
    for (f, t) in fused.data.iter().zip(&truth.data) {
        assert!((f - t).abs() < 1e-3 * (1.0 + t.abs()), "{} vs {}", f, t);
    }
}

#[test]
fn test_binary_missing_grid_fails_before_any_tool() {
    let dir = tempfile::tempdir().unwrap();
    let truth = phantom(8);
    let a = write_volume(dir.path(), "a.nii", &truth);
    let output = dir.path().join("out.nii");

    // Default mrtrix backends: nothing may be launched before the check fails
    let out = Command::new(env!("CARGO_BIN_EXE_align_combine"))
        .arg(&a)
        .arg(dir.path().join("missing_grid.nii"))
        .arg(&output)
        .args(["--mrregister", "/nonexistent/mrregister"])
        .output()
        .unwrap();
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("grid image"), "stderr: {}", stderr);
    assert!(!stderr.contains("mrregister"), "stderr: {}", stderr);
    assert!(!output.exists());
}

#[test]
fn test_binary_mask_count_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let truth = phantom(8);
    let a = write_volume(dir.path(), "a.nii", &truth);
    let b = write_volume(dir.path(), "b.nii", &truth);
    let ma = write_mask(dir.path(), "ma.nii", &Mask::from_volume(&truth, 10.0));

    let out = Command::new(env!("CARGO_BIN_EXE_align_combine"))
        .arg(&a)
        .arg(&b)
        .arg(&a)
        .arg(dir.path().join("out.nii"))
        .arg("--masks")
        .arg(&ma)
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("1 masks given for 2 input images"));
}

#[test]
fn test_binary_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let truth = phantom(8);
    let a = write_volume(dir.path(), "a.nii", &truth);
    let output = write_volume(dir.path(), "out.nii", &truth);

    let out = Command::new(env!("CARGO_BIN_EXE_align_combine"))
        .arg(&a)
        .arg(&a)
        .arg(&output)
        .args(["--registration", "none", "--resampling", "internal"])
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("--force"));
}
