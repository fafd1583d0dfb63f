//! Operator support of the export target.
//!
//! Artifacts are consumed by an opset-13 inference engine. An exported graph
//! may only use operators that engine implements; anything else is rejected
//! at export time instead of producing an artifact the consumer cannot load.

use super::{GraphDescription, DEFAULT_DOMAIN, ML_DOMAIN};
use crate::error::{HarnessError, Result};

/// Default-domain operators available at opset 13.
pub const OPSET13_OPS: &[&str] = &[
    "Abs",
    "Acos",
    "Acosh",
    "Add",
    "And",
    "ArgMax",
    "Asin",
    "Asinh",
    "Atan",
    "Atanh",
    "BatchNormalization",
    "Cast",
    "Concat",
    "Constant",
    "ConstantOfShape",
    "Conv",
    "Cos",
    "Cosh",
    "Div",
    "Equal",
    "Expand",
    "Flatten",
    "Gather",
    "Gemm",
    "Greater",
    "GreaterOrEqual",
    "GRU",
    "Less",
    "LessOrEqual",
    "LogSoftmax",
    "LSTM",
    "MatMul",
    "Mul",
    "Not",
    "Or",
    "PRelu",
    "ReduceMax",
    "ReduceMin",
    "Relu",
    "Reshape",
    "RNN",
    "Shape",
    "Sigmoid",
    "Sin",
    "Sinh",
    "Slice",
    "Softmax",
    "Squeeze",
    "Sub",
    "Tan",
    "Tanh",
    "Transpose",
    "Unsqueeze",
    "Xor",
];

/// `ai.onnx.ml` operators available at ML opset 1.
pub const ML_OPSET1_OPS: &[&str] = &["LinearRegressor", "Scaler"];

/// Check whether `op_type` in `domain` is representable at `opset`.
pub fn is_supported(domain: &str, op_type: &str, opset: i64) -> bool {
    match domain {
        DEFAULT_DOMAIN | "ai.onnx" => opset == 13 && OPSET13_OPS.contains(&op_type),
        ML_DOMAIN => opset == 1 && ML_OPSET1_OPS.contains(&op_type),
        _ => false,
    }
}

/// Reject graphs using operators the target cannot represent.
///
/// The first offending node is reported.
pub fn check_representable(
    graph: &GraphDescription,
    opset_for: impl Fn(&str) -> i64,
) -> Result<()> {
    for node in &graph.nodes {
        let opset = opset_for(&node.domain);
        if !is_supported(&node.domain, &node.op_type, opset) {
            return Err(HarnessError::UnsupportedOp {
                op: node.op_type.clone(),
                domain: node.domain.clone(),
                opset,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;

    #[test]
    fn sample_model_ops_supported() {
        for op in ["Gemm", "Relu", "Transpose", "GRU", "Squeeze"] {
            assert!(is_supported("", op, 13), "{op}");
        }
        assert!(is_supported(ML_DOMAIN, "Scaler", 1));
    }

    #[test]
    fn unknown_op_rejected() {
        assert!(!is_supported("", "Gelu", 13));
        assert!(!is_supported("", "Scaler", 13));
        assert!(!is_supported("com.example", "Gemm", 13));
    }

    #[test]
    fn other_opset_rejected() {
        assert!(!is_supported("", "Gemm", 17));
    }

    #[test]
    fn check_names_offending_node() {
        let graph = GraphDescription {
            name: "g".into(),
            nodes: vec![
                Node::new("/Relu", "Relu", &["x"], &["y"]),
                Node::new("/Gelu", "Gelu", &["y"], &["z"]),
            ],
            initializers: vec![],
            inputs: vec![],
            outputs: vec![],
        };

        let err = check_representable(&graph, |_| 13).unwrap_err();
        match err {
            HarnessError::UnsupportedOp { op, opset, .. } => {
                assert_eq!(op, "Gelu");
                assert_eq!(opset, 13);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
