//! Export pipeline.
//!
//! Trace a model once over a sample input, build its graph description,
//! apply the declared interface and write a single ONNX artifact.

use crate::error::{HarnessError, Result};
use crate::graph::{self, opset, DynamicAxes, ExportTarget, ValueSpec};
use crate::model::SampleModel;
use crate::synth::SampleInput;
use prost::Message;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// What an export wrote.
#[derive(Debug, Clone)]
pub struct ExportReport {
    /// Artifact path.
    pub path: PathBuf,
    /// Artifact size in bytes.
    pub bytes: usize,
    /// Number of graph nodes.
    pub node_count: usize,
    /// Number of stored parameter values.
    pub parameter_count: usize,
    /// Declared inputs.
    pub inputs: Vec<ValueSpec>,
    /// Declared outputs.
    pub outputs: Vec<ValueSpec>,
}

impl fmt::Display for ExportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} ({} bytes, {} nodes, {} parameters)",
            self.path.display(),
            self.bytes,
            self.node_count,
            self.parameter_count
        )?;
        for spec in &self.inputs {
            writeln!(f, "  in  {spec}")?;
        }
        for (i, spec) in self.outputs.iter().enumerate() {
            if i + 1 == self.outputs.len() {
                write!(f, "  out {spec}")?;
            } else {
                writeln!(f, "  out {spec}")?;
            }
        }
        Ok(())
    }
}

/// Export `model` to `path`.
///
/// `input_names` and `output_names` correspond positionally to the forward
/// signature. `dynamic_axes` maps those names to the axes left variable.
/// The parent directory must exist; the artifact is replaced atomically.
pub fn export(
    model: &dyn SampleModel,
    sample: &SampleInput,
    path: &Path,
    input_names: &[&str],
    output_names: &[&str],
    dynamic_axes: &DynamicAxes,
    target: &ExportTarget,
) -> Result<ExportReport> {
    let inputs = sample.tensors();
    let outputs = model.forward(inputs)?;

    let mut graph = model.build_graph(inputs, &outputs)?;
    graph.rename_inputs(input_names)?;
    graph.rename_outputs(output_names)?;
    graph.apply_dynamic_axes(dynamic_axes)?;
    opset::check_representable(&graph, |domain| target.opset_for(domain))?;

    tracing::debug!(
        model = model.kind().name(),
        nodes = graph.nodes.len(),
        parameters = graph.parameter_count(),
        "graph built"
    );

    let bytes = graph::encode_model(&graph, target).encode_to_vec();
    write_atomic(path, &bytes)?;

    tracing::info!(
        "Exported {} to {} ({} bytes)",
        model.kind().title(),
        path.display(),
        bytes.len()
    );

    Ok(ExportReport {
        path: path.to_path_buf(),
        bytes: bytes.len(),
        node_count: graph.nodes.len(),
        parameter_count: graph.parameter_count(),
        inputs: graph.inputs,
        outputs: graph.outputs,
    })
}

/// Export with the names and dynamic axes the model declares.
pub fn export_declared(
    model: &dyn SampleModel,
    sample: &SampleInput,
    path: &Path,
    target: &ExportTarget,
) -> Result<ExportReport> {
    export(
        model,
        sample,
        path,
        &model.input_names(),
        &model.output_names(),
        &model.dynamic_axes(),
        target,
    )
}

/// Write `bytes` to a temporary file next to `path`, then rename over it.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if path.file_name().is_none() {
        return Err(HarnessError::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("artifact path {} has no file name", path.display()),
        )));
    }

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tracing::debug!("renaming {} to {}", tmp.path().display(), path.display());
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use crate::graph::{proto::ModelProto, Dim};
    use crate::model::ModelKind;
    use crate::synth::{sample_input, SampleMode};
    use candle_core::Device;

    fn build(kind: ModelKind) -> (Box<dyn SampleModel>, SampleInput) {
        let config = HarnessConfig::default();
        let model = kind.build(&config, &Device::Cpu).unwrap();
        let sample = sample_input(kind, SampleMode::Export, &config, &Device::Cpu).unwrap();
        (model, sample)
    }

    #[test]
    fn writes_declared_interface() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mlp.onnx");
        let (model, sample) = build(ModelKind::Mlp);

        let report =
            export_declared(model.as_ref(), &sample, &path, &ExportTarget::default()).unwrap();

        assert_eq!(report.bytes, std::fs::metadata(&path).unwrap().len() as usize);
        assert_eq!(report.inputs[0].name, "data_input");
        assert_eq!(
            report.outputs[0].dims,
            vec![Dim::Dynamic("batch_size".into()), Dim::Fixed(2)]
        );

        let proto = ModelProto::decode(std::fs::read(&path).unwrap().as_slice()).unwrap();
        assert_eq!(proto.ir_version, 7);
        assert_eq!(proto.opset_import[0].version, 13);
    }

    #[test]
    fn scaler_imports_ml_domain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scaler.onnx");
        let (model, sample) = build(ModelKind::Scaler);

        export_declared(model.as_ref(), &sample, &path, &ExportTarget::default()).unwrap();

        let proto = ModelProto::decode(std::fs::read(&path).unwrap().as_slice()).unwrap();
        let ml = proto
            .opset_import
            .iter()
            .find(|o| o.domain == graph::ML_DOMAIN)
            .unwrap();
        assert_eq!(ml.version, graph::ML_OPSET_VERSION);
    }

    #[test]
    fn wrong_name_count_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gru.onnx");
        let (model, sample) = build(ModelKind::Gru);

        let result = export(
            model.as_ref(),
            &sample,
            &path,
            &["data_input"],
            &["preds", "hidden_out"],
            &DynamicAxes::new(),
            &ExportTarget::default(),
        );

        assert!(matches!(result, Err(HarnessError::Declaration(_))));
        assert!(!path.exists());
    }

    #[test]
    fn unsupported_opset_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mlp.onnx");
        let (model, sample) = build(ModelKind::Mlp);
        let target = ExportTarget {
            opset_version: 9,
            ..ExportTarget::default()
        };

        let result = export_declared(model.as_ref(), &sample, &path, &target);

        match result {
            Err(HarnessError::UnsupportedOp { op, opset, .. }) => {
                assert_eq!(op, "Gemm");
                assert_eq!(opset, 9);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!path.exists());
    }

    #[test]
    fn report_display_lists_interface() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gru.onnx");
        let (model, sample) = build(ModelKind::Gru);

        let report =
            export_declared(model.as_ref(), &sample, &path, &ExportTarget::default()).unwrap();
        let text = report.to_string();

        assert!(text.contains("in  data_input: [batch_size, seq_length, 3]"));
        assert!(text.contains("out hidden_out: [1, batch_size, 5]"));
    }
}
