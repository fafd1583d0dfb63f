//! End-to-end checks: exported artifacts reproduce the golden vectors.

use candle_core::{Device, Tensor};
use sample_models_core::config::HarnessConfig;
use sample_models_core::golden::{run_artifact, GoldenCase, GoldenTestHarness};
use sample_models_core::graph::{Dim, DynamicAxes, ExportTarget};
use sample_models_core::model::{ModelKind, BATCH_AXIS, SEQ_AXIS};
use sample_models_core::pipeline::{export, export_declared, verify};
use sample_models_core::runtime::Interpreter;
use sample_models_core::synth::{self, sample_input, SampleMode};
use sample_models_core::HarnessError;
use std::path::{Path, PathBuf};

fn export_kind(kind: ModelKind, config: &HarnessConfig, dir: &Path) -> PathBuf {
    let model = kind.build(config, &Device::Cpu).unwrap();
    let sample = sample_input(kind, SampleMode::Export, config, &Device::Cpu).unwrap();
    let path = dir.join(format!("{}.onnx", kind.name()));
    export_declared(
        model.as_ref(),
        &sample,
        &path,
        &ExportTarget::from_config(config),
    )
    .unwrap();
    path
}

#[test]
fn artifacts_reproduce_verify_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let config = HarnessConfig::default();

    let mut harness = GoldenTestHarness::new();
    let mut paths = Vec::new();
    for kind in ModelKind::ALL {
        paths.push(export_kind(kind, &config, dir.path()));

        let model = kind.build(&config, &Device::Cpu).unwrap();
        let sample = sample_input(kind, SampleMode::Verify, &config, &Device::Cpu).unwrap();
        let transcript = verify(model.as_ref(), &sample).unwrap();
        harness.add_case(GoldenCase::from_transcript(kind.name(), &transcript));
    }

    let summary = harness.run_with(|case| {
        let path = dir.path().join(format!("{}.onnx", case.name));
        let interp = Interpreter::from_file(&path, &Device::Cpu).map_err(|e| e.to_string())?;
        run_artifact(&interp, &case.inputs, &Device::Cpu).map_err(|e| e.to_string())
    });

    assert_eq!(summary.total, 3);
    assert!(summary.all_passed(), "{summary}");
    assert!(paths.iter().all(|p| p.exists()));
}

#[test]
fn gru_artifact_runs_at_other_batch_and_length() {
    let dir = tempfile::tempdir().unwrap();
    let config = HarnessConfig::default();
    let path = export_kind(ModelKind::Gru, &config, dir.path());

    let interp = Interpreter::from_file(&path, &Device::Cpu).unwrap();
    assert_eq!(
        interp.inputs()[0].dims,
        vec![
            Dim::Dynamic(BATCH_AXIS.into()),
            Dim::Dynamic(SEQ_AXIS.into()),
            Dim::Fixed(3)
        ]
    );

    let model = ModelKind::Gru.build(&config, &Device::Cpu).unwrap();
    let x = synth::seeded_uniform(&[3, 4, 3], 11, &Device::Cpu).unwrap();
    let h0 = synth::seeded_uniform(&[1, 3, 5], 12, &Device::Cpu).unwrap();
    let direct = model.forward(&[x.clone(), h0.clone()]).unwrap();

    let out = interp.run(&[("data_input", &x), ("init_hidden", &h0)]).unwrap();

    assert_eq!(out[0].0, "preds");
    assert_eq!(out[0].1.dims(), &[3, 4, 5]);
    assert_eq!(out[1].1.dims(), &[1, 3, 5]);
    for (got, want) in out.iter().map(|(_, t)| t).zip(&direct) {
        let diff: f32 = got
            .sub(want)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-5, "max abs diff {diff}");
    }
}

#[test]
fn mlp_and_scaler_artifacts_accept_new_batch() {
    let dir = tempfile::tempdir().unwrap();
    let config = HarnessConfig {
        mlp_batch_size: 1,
        ..HarnessConfig::default()
    };

    let mlp_path = export_kind(ModelKind::Mlp, &config, dir.path());
    let mlp = Interpreter::from_file(&mlp_path, &Device::Cpu).unwrap();
    let x = synth::arange(&[5, 3], &Device::Cpu).unwrap();
    let out = mlp.run(&[("data_input", &x)]).unwrap();
    assert_eq!(out[0].1.dims(), &[5, 2]);

    let scaler_path = export_kind(ModelKind::Scaler, &config, dir.path());
    let scaler = Interpreter::from_file(&scaler_path, &Device::Cpu).unwrap();
    let x = synth::arange(&[1, 3], &Device::Cpu).unwrap();
    let out = scaler.run(&[("X", &x)]).unwrap();
    assert_eq!(out[0].0, "variable");
    assert_eq!(out[0].1.dims(), &[1, 3]);
}

#[test]
fn fixed_axes_reject_other_batch() {
    let dir = tempfile::tempdir().unwrap();
    let config = HarnessConfig::default();
    let model = ModelKind::Mlp.build(&config, &Device::Cpu).unwrap();
    let sample = sample_input(ModelKind::Mlp, SampleMode::Export, &config, &Device::Cpu).unwrap();
    let path = dir.path().join("fixed.onnx");

    export(
        model.as_ref(),
        &sample,
        &path,
        &["data_input"],
        &["preds"],
        &DynamicAxes::new(),
        &ExportTarget::default(),
    )
    .unwrap();

    let interp = Interpreter::from_file(&path, &Device::Cpu).unwrap();
    let x = synth::arange(&[3, 3], &Device::Cpu).unwrap();
    assert!(matches!(
        interp.run(&[("data_input", &x)]),
        Err(HarnessError::ShapeMismatch(_))
    ));

    let x = synth::arange(&[2, 3], &Device::Cpu).unwrap();
    assert!(interp.run(&[("data_input", &x)]).is_ok());
}

#[test]
fn missing_output_dir_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("onnx_models");
    let config = HarnessConfig::default();
    let model = ModelKind::Mlp.build(&config, &Device::Cpu).unwrap();
    let sample = sample_input(ModelKind::Mlp, SampleMode::Export, &config, &Device::Cpu).unwrap();

    let result = export_declared(
        model.as_ref(),
        &sample,
        &missing.join("mlp.onnx"),
        &ExportTarget::default(),
    );

    assert!(matches!(result, Err(HarnessError::IoError(_))));
    assert!(!missing.exists());
}

#[test]
fn export_overwrites_existing_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mlp.onnx");
    std::fs::write(&path, b"stale").unwrap();

    let config = HarnessConfig::default();
    export_kind(ModelKind::Mlp, &config, dir.path());

    let bytes = std::fs::read(&path).unwrap();
    assert_ne!(bytes, b"stale");
    assert!(Interpreter::from_bytes(&bytes, &Device::Cpu).is_ok());

    // no temporary files left behind
    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

#[test]
fn repeated_exports_are_byte_identical() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    let config = HarnessConfig::default();

    for kind in ModelKind::ALL {
        let first = std::fs::read(export_kind(kind, &config, a.path())).unwrap();
        let second = std::fs::read(export_kind(kind, &config, b.path())).unwrap();
        assert_eq!(first, second, "{kind}");
    }
}

#[test]
fn scaler_first_rows_standardized() {
    let config = HarnessConfig::default();
    let model = ModelKind::Scaler.build(&config, &Device::Cpu).unwrap();
    let sample =
        sample_input(ModelKind::Scaler, SampleMode::Verify, &config, &Device::Cpu).unwrap();
    let transcript = verify(model.as_ref(), &sample).unwrap();

    let y = Tensor::from_slice(
        &transcript.outputs[0].data,
        transcript.outputs[0].shape.as_slice(),
        &Device::Cpu,
    )
    .unwrap();
    let rows: Vec<Vec<f32>> = y.to_vec2().unwrap();

    let mean = [1.0285714f32, 10.285714, 105.57143];
    let std = [0.28139593f32, 1.8294641, 7.5376605];
    let table = [[1.0f32, 10.0, 100.0], [1.5, 13.0, 120.0]];
    for (row, x) in rows.iter().zip(table) {
        for c in 0..3 {
            let expected = (x[c] - mean[c]) / std[c];
            assert!((row[c] - expected).abs() < 1e-5, "{} vs {expected}", row[c]);
        }
    }
}
