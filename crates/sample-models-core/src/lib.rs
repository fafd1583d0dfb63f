//! # Sample Models Core
//!
//! Seed-deterministic sample models, ONNX export and golden vectors.
//!
//! This crate provides:
//! - **Sample models**: an MLP, a batch-first GRU and a standard scaler with
//!   bit-reproducible parameters
//! - **Export pipeline**: trace, describe and atomically write opset-13 ONNX
//!   artifacts with named inputs, outputs and dynamic axes
//! - **Verification pipeline**: direct forward runs recorded as golden vectors
//! - **Reference interpreter**: evaluates the exported artifacts so the golden
//!   vectors can be checked end to end

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod error;
pub mod golden;
pub mod graph;
pub mod init;
pub mod model;
pub mod pipeline;
pub mod runtime;
pub mod synth;

pub use error::{HarnessError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::HarnessConfig;
    pub use crate::error::{HarnessError, Result};
    pub use crate::golden::{GoldenCase, GoldenSummary, GoldenTestHarness};
    pub use crate::graph::{DynamicAxes, ExportTarget, GraphDescription};
    pub use crate::model::{Gru, Mlp, ModelKind, SampleModel, StandardScaler};
    pub use crate::pipeline::{export, verify, ExportReport, NamedTensor, Transcript};
    pub use crate::runtime::Interpreter;
    pub use crate::synth::{sample_input, SampleInput, SampleMode};
}
