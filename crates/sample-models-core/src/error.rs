//! Error types for the sample-model harness.

use thiserror::Error;

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Errors that can occur while building, exporting or verifying a model.
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Model parameters could not be created.
    #[error("construction error: {0}")]
    Construction(String),

    /// A tensor does not match a model's shape contract.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Export names or dynamic axes do not fit the traced graph.
    #[error("invalid declaration: {0}")]
    Declaration(String),

    /// The target opset cannot represent an operation.
    #[error("unsupported op '{op}' in domain '{domain}' (opset {opset})")]
    UnsupportedOp {
        /// Operator type, e.g. `Gemm`.
        op: String,
        /// Operator domain, empty for the default ONNX domain.
        domain: String,
        /// Opset version the operator was checked against.
        opset: i64,
    },

    /// An operator attribute the interpreter does not handle.
    #[error("unsupported attribute '{attribute}' on {op}")]
    UnsupportedAttribute {
        /// Operator type.
        op: String,
        /// Attribute name.
        attribute: String,
    },

    /// Graph evaluation failed.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Invalid harness configuration.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// Artifact could not be decoded.
    #[error("decode error: {0}")]
    DecodeError(#[from] prost::DecodeError),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    TensorError(#[from] candle_core::Error),
}
