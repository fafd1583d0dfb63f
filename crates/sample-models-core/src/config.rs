//! Harness configuration.

use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration shared by every model pipeline.
///
/// The seed is consumed once per model construction; no pipeline touches
/// global RNG state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Seed for parameter initialisation and random sample fills.
    pub seed: u64,
    /// Directory the artifacts are written to. Must already exist.
    pub output_dir: PathBuf,
    /// Default-domain opset the artifacts target.
    pub opset_version: i64,
    /// ONNX IR version stamped on the artifacts.
    pub ir_version: i64,
    /// Producer name stamped on the artifacts.
    pub producer_name: String,
    /// Batch size of the MLP sample inputs.
    pub mlp_batch_size: usize,
    /// Batch size of the GRU sample inputs.
    pub gru_batch_size: usize,
    /// Sequence length of the GRU sample inputs.
    pub gru_seq_length: usize,
    /// Number of fit-table rows transformed in verification mode.
    pub scaler_sample_rows: usize,
}

impl HarnessConfig {
    /// Load from JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every sample dimension is usable as a dynamic axis.
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("mlp_batch_size", self.mlp_batch_size),
            ("gru_batch_size", self.gru_batch_size),
            ("gru_seq_length", self.gru_seq_length),
            ("scaler_sample_rows", self.scaler_sample_rows),
        ];
        for (name, size) in sizes {
            if size == 0 {
                return Err(HarnessError::Config(format!("{name} must be at least 1")));
            }
        }
        if self.scaler_sample_rows > crate::model::scaler::FIT_TABLE.len() {
            return Err(HarnessError::Config(format!(
                "scaler_sample_rows {} exceeds the {}-row fit table",
                self.scaler_sample_rows,
                crate::model::scaler::FIT_TABLE.len()
            )));
        }
        if self.opset_version < 1 || self.ir_version < 1 {
            return Err(HarnessError::Config(
                "opset_version and ir_version must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the artifact for a model, e.g. `onnx_models/mlp.onnx`.
    pub fn artifact_path(&self, model_name: &str) -> PathBuf {
        self.output_dir.join(format!("{model_name}.{ARTIFACT_EXTENSION}"))
    }
}

/// File extension of exported artifacts.
pub const ARTIFACT_EXTENSION: &str = "onnx";

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            output_dir: PathBuf::from("onnx_models"),
            opset_version: 13,
            ir_version: 7,
            producer_name: "sample-models".to_string(),
            mlp_batch_size: 2,
            gru_batch_size: 1,
            gru_seq_length: 30,
            scaler_sample_rows: 2,
        }
    }
}
