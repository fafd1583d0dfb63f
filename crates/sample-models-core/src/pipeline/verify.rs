//! Verification pipeline.
//!
//! Runs a model directly on its sample input and records every input and
//! output tensor as a golden vector. Nothing is serialized to disk here;
//! the caller decides where the transcript goes.

use crate::error::{HarnessError, Result};
use crate::model::{SampleModel, TensorContract};
use crate::synth::SampleInput;
use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of the separator line opening a transcript block.
const RULE_WIDTH: usize = 50;

/// A tensor with its declared name, flattened row-major.
///
/// Deserializing checks that `data` holds exactly one value per element of
/// `shape`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNamedTensor")]
pub struct NamedTensor {
    /// Declared tensor name.
    pub name: String,
    /// Shape.
    pub shape: Vec<usize>,
    /// Element type, e.g. `f32`.
    pub dtype: String,
    /// Values in row-major order.
    pub data: Vec<f32>,
}

#[derive(Deserialize)]
struct RawNamedTensor {
    name: String,
    shape: Vec<usize>,
    dtype: String,
    data: Vec<f32>,
}

impl TryFrom<RawNamedTensor> for NamedTensor {
    type Error = HarnessError;

    fn try_from(raw: RawNamedTensor) -> Result<Self> {
        let tensor = Self {
            name: raw.name,
            shape: raw.shape,
            dtype: raw.dtype,
            data: raw.data,
        };
        tensor.check_len()?;
        Ok(tensor)
    }
}

impl NamedTensor {
    /// Check that `data` matches the element count of `shape`.
    pub fn check_len(&self) -> Result<()> {
        let expected: usize = self.shape.iter().product();
        if self.data.len() != expected {
            return Err(HarnessError::ShapeMismatch(format!(
                "'{}' has {} values for shape {:?}",
                self.name,
                self.data.len(),
                self.shape
            )));
        }
        Ok(())
    }

    /// Capture a tensor's shape and values.
    pub fn from_tensor(name: impl Into<String>, tensor: &Tensor) -> Result<Self> {
        let data: Vec<f32> = tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?;
        Ok(Self {
            name: name.into(),
            shape: tensor.dims().to_vec(),
            dtype: tensor.dtype().as_str().to_string(),
            data,
        })
    }

    /// Rebuild the tensor.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_slice(&self.data, self.shape.as_slice(), device)?)
    }
}

impl fmt::Display for NamedTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
        writeln!(f, "{}: [{}] {}", self.name, dims.join(", "), self.dtype)?;
        if self.check_len().is_err() {
            return write!(f, "<{} values>", self.data.len());
        }
        write_nested(f, &self.shape, &self.data, 0)
    }
}

/// Dump `data` as nested brackets following `shape`.
///
/// Rows of the innermost axis go on one line; outer axes break lines and
/// indent one column per nesting level.
fn write_nested(
    f: &mut fmt::Formatter<'_>,
    shape: &[usize],
    data: &[f32],
    depth: usize,
) -> fmt::Result {
    match shape {
        [] => write!(f, "{:?}", data.first().copied().unwrap_or_default()),
        [_] => {
            write!(f, "[")?;
            for (i, v) in data.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{v:?}")?;
            }
            write!(f, "]")
        }
        [outer, inner @ ..] => {
            let stride: usize = inner.iter().product();
            write!(f, "[")?;
            for i in 0..*outer {
                if i > 0 {
                    write!(f, ",\n{:width$}", "", width = depth + 1)?;
                }
                write_nested(f, inner, &data[i * stride..(i + 1) * stride], depth + 1)?;
            }
            write!(f, "]")
        }
    }
}

/// Golden vectors of one model: named inputs and the outputs they produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    /// Model heading, e.g. `GRU`.
    pub model: String,
    /// Inputs in forward order.
    pub inputs: Vec<NamedTensor>,
    /// Outputs in forward order.
    pub outputs: Vec<NamedTensor>,
}

impl Transcript {
    /// Look up an output by name.
    pub fn output(&self, name: &str) -> Option<&NamedTensor> {
        self.outputs.iter().find(|t| t.name == name)
    }

    /// Load a transcript from JSON, rejecting tensors whose data does not
    /// fill their shape.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "-".repeat(RULE_WIDTH))?;
        writeln!(f, "{} sample:", self.model)?;
        writeln!(f)?;
        writeln!(f, "---INPUTS---")?;
        for tensor in &self.inputs {
            writeln!(f, "{tensor}")?;
            writeln!(f)?;
        }
        writeln!(f, "---OUTPUTS---")?;
        for tensor in &self.outputs {
            writeln!(f, "{tensor}")?;
            writeln!(f)?;
        }
        Ok(())
    }
}

fn name_tensors(contracts: &[TensorContract], tensors: &[Tensor]) -> Result<Vec<NamedTensor>> {
    if contracts.len() != tensors.len() {
        return Err(HarnessError::ShapeMismatch(format!(
            "{} tensors for {} declared names",
            tensors.len(),
            contracts.len()
        )));
    }
    contracts
        .iter()
        .zip(tensors)
        .map(|(contract, tensor)| NamedTensor::from_tensor(contract.name, tensor))
        .collect()
}

/// Run `model` directly on `sample` and record the golden vectors.
pub fn verify(model: &dyn SampleModel, sample: &SampleInput) -> Result<Transcript> {
    let signature = model.signature();
    let outputs = model.forward(sample.tensors())?;

    let transcript = Transcript {
        model: model.kind().title().to_string(),
        inputs: name_tensors(signature.inputs, sample.tensors())?,
        outputs: name_tensors(signature.outputs, &outputs)?,
    };
    tracing::info!(
        "Verified {} ({} inputs, {} outputs)",
        transcript.model,
        transcript.inputs.len(),
        transcript.outputs.len()
    );
    Ok(transcript)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use crate::model::ModelKind;
    use crate::synth::{sample_input, SampleMode};

    fn transcript(kind: ModelKind) -> Transcript {
        let config = HarnessConfig::default();
        let model = kind.build(&config, &Device::Cpu).unwrap();
        let sample = sample_input(kind, SampleMode::Verify, &config, &Device::Cpu).unwrap();
        verify(model.as_ref(), &sample).unwrap()
    }

    #[test]
    fn mlp_transcript_block() {
        let t = transcript(ModelKind::Mlp);
        let text = t.to_string();

        assert!(text.starts_with(&"-".repeat(RULE_WIDTH)));
        assert!(text.contains("MLP sample:"));
        assert!(text.contains("data_input: [2, 3] f32\n[[0.0, 1.0, 2.0],\n [3.0, 4.0, 5.0]]"));
        assert!(text.contains("---OUTPUTS---\npreds: [2, 2] f32"));
    }

    #[test]
    fn repeated_runs_identical() {
        assert_eq!(transcript(ModelKind::Gru), transcript(ModelKind::Gru));
    }

    #[test]
    fn gru_names_and_shapes() {
        let t = transcript(ModelKind::Gru);

        let names: Vec<&str> = t.outputs.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["preds", "hidden_out"]);
        assert_eq!(t.output("preds").unwrap().shape, vec![1, 30, 5]);
        assert_eq!(t.output("hidden_out").unwrap().shape, vec![1, 1, 5]);
    }

    #[test]
    fn scaler_rows_standardized() {
        let t = transcript(ModelKind::Scaler);
        let y = &t.output("variable").unwrap().data;

        // first row, first column: (1.0 - mean) / std
        let expected = (1.0 - 1.0285714) / 0.2813959;
        assert!((y[0] as f64 - expected).abs() < 1e-5);
        assert_eq!(t.inputs[0].name, "X");
        assert_eq!(t.inputs[0].shape, vec![2, 3]);
    }

    #[test]
    fn json_carries_flat_data() {
        let t = transcript(ModelKind::Mlp);
        let json = t.to_json().unwrap();
        let back: Transcript = serde_json::from_str(&json).unwrap();

        assert_eq!(back, t);
        assert!(json.contains("\"dtype\": \"f32\""));
    }

    #[test]
    fn nested_dump_of_rank3() {
        let tensor = NamedTensor {
            name: "x".into(),
            shape: vec![2, 1, 2],
            dtype: "f32".into(),
            data: vec![0.0, 1.0, 2.0, 3.0],
        };
        assert_eq!(tensor.to_string(), "x: [2, 1, 2] f32\n[[[0.0, 1.0]],\n [[2.0, 3.0]]]");
    }

    #[test]
    fn short_data_rejected_on_load() {
        let json = r#"{"name":"x","shape":[2,3],"dtype":"f32","data":[1.0]}"#;

        assert!(serde_json::from_str::<NamedTensor>(json).is_err());

        let transcript = format!(r#"{{"model":"MLP","inputs":[{json}],"outputs":[]}}"#);
        assert!(matches!(
            Transcript::from_json(&transcript),
            Err(HarnessError::SerdeError(_))
        ));
    }

    #[test]
    fn short_data_displayed_without_dump() {
        let tensor = NamedTensor {
            name: "x".into(),
            shape: vec![2, 3],
            dtype: "f32".into(),
            data: vec![1.0],
        };

        assert!(tensor.check_len().is_err());
        assert_eq!(tensor.to_string(), "x: [2, 3] f32\n<1 values>");
    }

    #[test]
    fn json_round_trip_through_loader() {
        let t = transcript(ModelKind::Scaler);
        assert_eq!(Transcript::from_json(&t.to_json().unwrap()).unwrap(), t);
    }
}
