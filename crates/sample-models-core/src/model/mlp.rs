//! Multilayer perceptron.
//!
//! A two-layer feed-forward classifier:
//!
//! ```text
//! MLP(
//!   (layer1): Linear(in_features=3, out_features=5, bias=True)
//!   (relu): ReLU()
//!   (layer2): Linear(in_features=5, out_features=2, bias=True)
//! )
//! ```
//!
//! # Formula
//!
//! `MLP(x) = relu(x @ W1^T + b1) @ W2^T + b2`
//!
//! Exported as `Gemm(transB=1) -> Relu -> Gemm(transB=1)`.

use super::{check_tensors, Axis, ModelKind, SampleModel, Signature, TensorContract};
use crate::error::{HarnessError, Result};
use crate::graph::{AttributeValue, GraphDescription, Initializer, Node};
use crate::init::ParamInit;
use candle_core::{Device, Tensor};
use std::fmt;

/// Input feature width.
pub const INPUT_SIZE: usize = 3;
/// Hidden layer width.
pub const HIDDEN_SIZE: usize = 5;
/// Output width.
pub const OUTPUT_SIZE: usize = 2;

const INPUTS: &[TensorContract] = &[TensorContract {
    name: "data_input",
    axes: &[Axis::Batch, Axis::Fixed(INPUT_SIZE)],
}];

const OUTPUTS: &[TensorContract] = &[TensorContract {
    name: "preds",
    axes: &[Axis::Batch, Axis::Fixed(OUTPUT_SIZE)],
}];

/// Two-layer perceptron with ReLU.
#[derive(Debug, Clone)]
pub struct Mlp {
    /// First layer weight: [hidden, input]
    layer1_weight: Tensor,
    /// First layer bias: [hidden]
    layer1_bias: Tensor,
    /// Second layer weight: [output, hidden]
    layer2_weight: Tensor,
    /// Second layer bias: [output]
    layer2_bias: Tensor,
}

impl Mlp {
    /// Create with parameters drawn from `seed`.
    ///
    /// Weights and biases are uniform in `[-1/sqrt(fan_in), 1/sqrt(fan_in)]`,
    /// drawn in the order layer1.weight, layer1.bias, layer2.weight,
    /// layer2.bias.
    pub fn new(seed: u64, device: &Device) -> Result<Self> {
        let mut init = ParamInit::new(seed, device);
        let layer1_weight = init.fan_in_uniform(&[HIDDEN_SIZE, INPUT_SIZE], INPUT_SIZE)?;
        let layer1_bias = init.fan_in_uniform(&[HIDDEN_SIZE], INPUT_SIZE)?;
        let layer2_weight = init.fan_in_uniform(&[OUTPUT_SIZE, HIDDEN_SIZE], HIDDEN_SIZE)?;
        let layer2_bias = init.fan_in_uniform(&[OUTPUT_SIZE], HIDDEN_SIZE)?;

        Ok(Self {
            layer1_weight,
            layer1_bias,
            layer2_weight,
            layer2_bias,
        })
    }

    /// Create from explicit weights.
    pub fn from_weights(
        layer1_weight: Tensor,
        layer1_bias: Tensor,
        layer2_weight: Tensor,
        layer2_bias: Tensor,
    ) -> Result<Self> {
        let expected: [(&str, &Tensor, &[usize]); 4] = [
            ("layer1.weight", &layer1_weight, &[HIDDEN_SIZE, INPUT_SIZE]),
            ("layer1.bias", &layer1_bias, &[HIDDEN_SIZE]),
            ("layer2.weight", &layer2_weight, &[OUTPUT_SIZE, HIDDEN_SIZE]),
            ("layer2.bias", &layer2_bias, &[OUTPUT_SIZE]),
        ];
        for (name, tensor, dims) in expected {
            if tensor.dims() != dims {
                return Err(HarnessError::ShapeMismatch(format!(
                    "{name}: expected {dims:?}, got {:?}",
                    tensor.dims()
                )));
            }
        }

        Ok(Self {
            layer1_weight,
            layer1_bias,
            layer2_weight,
            layer2_bias,
        })
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor [batch, 3]
    pub fn forward_one(&self, x: &Tensor) -> Result<Tensor> {
        check_tensors("mlp", std::slice::from_ref(x), INPUTS)?;

        let hidden = linear(x, &self.layer1_weight, &self.layer1_bias)?.relu()?;
        linear(&hidden, &self.layer2_weight, &self.layer2_bias)
    }

    /// Named parameters in export order.
    pub fn parameters(&self) -> [(&'static str, &Tensor); 4] {
        [
            ("layer1.weight", &self.layer1_weight),
            ("layer1.bias", &self.layer1_bias),
            ("layer2.weight", &self.layer2_weight),
            ("layer2.bias", &self.layer2_bias),
        ]
    }
}

/// `x @ w^T + b`, the same computation as `Gemm(transB=1)`.
fn linear(x: &Tensor, w: &Tensor, b: &Tensor) -> Result<Tensor> {
    Ok(x.matmul(&w.t()?)?.broadcast_add(b)?)
}

fn gemm_node(name: &str, inputs: &[&str], output: &str) -> Node {
    Node::new(name, "Gemm", inputs, &[output])
        .with_attr("alpha", AttributeValue::Float(1.0))
        .with_attr("beta", AttributeValue::Float(1.0))
        .with_attr("transB", AttributeValue::Int(1))
}

impl SampleModel for Mlp {
    fn kind(&self) -> ModelKind {
        ModelKind::Mlp
    }

    fn signature(&self) -> Signature {
        Signature {
            inputs: INPUTS,
            outputs: OUTPUTS,
        }
    }

    fn forward(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        check_tensors("mlp", inputs, INPUTS)?;
        Ok(vec![self.forward_one(&inputs[0])?])
    }

    fn build_graph(&self, inputs: &[Tensor], outputs: &[Tensor]) -> Result<GraphDescription> {
        let mut graph = GraphDescription::traced("main_graph", inputs, outputs)?;
        for (name, tensor) in self.parameters() {
            graph.initializers.push(Initializer::from_tensor(name, tensor)?);
        }

        let input = GraphDescription::traced_input_name(0);
        let output = GraphDescription::traced_output_name(0);
        graph.nodes = vec![
            gemm_node(
                "/layer1/Gemm",
                &[&input, "layer1.weight", "layer1.bias"],
                "/layer1/Gemm_output_0",
            ),
            Node::new("/relu/Relu", "Relu", &["/layer1/Gemm_output_0"], &["/relu/Relu_output_0"]),
            gemm_node(
                "/layer2/Gemm",
                &["/relu/Relu_output_0", "layer2.weight", "layer2.bias"],
                &output,
            ),
        ];
        Ok(graph)
    }
}

impl fmt::Display for Mlp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MLP(")?;
        writeln!(
            f,
            "  (layer1): Linear(in_features={INPUT_SIZE}, out_features={HIDDEN_SIZE}, bias=True)"
        )?;
        writeln!(f, "  (relu): ReLU()")?;
        writeln!(
            f,
            "  (layer2): Linear(in_features={HIDDEN_SIZE}, out_features={OUTPUT_SIZE}, bias=True)"
        )?;
        write!(f, ")")
    }
}
