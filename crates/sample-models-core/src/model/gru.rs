//! Gated recurrent unit.
//!
//! Single-layer, unidirectional, batch-first GRU with input size 3 and
//! hidden size 5. Parameters are stored in `(r, z, n)` gate order:
//!
//! ```text
//! r_t = sigmoid(x_t W_ir^T + b_ir + h W_hr^T + b_hr)
//! z_t = sigmoid(x_t W_iz^T + b_iz + h W_hz^T + b_hz)
//! n_t = tanh(x_t W_in^T + b_in + r_t * (h W_hn^T + b_hn))
//! h_t = (1 - z_t) * n_t + z_t * h
//! ```
//!
//! The reset gate is applied after the recurrent linear transform, which
//! the exported ONNX `GRU` node expresses as `linear_before_reset=1`.

use super::{check_tensors, Axis, ModelKind, SampleModel, Signature, TensorContract};
use crate::error::{HarnessError, Result};
use crate::graph::{AttributeValue, GraphDescription, Initializer, Node};
use crate::init::ParamInit;
use candle_core::{Device, Tensor, D};
use std::fmt;

/// Input feature width.
pub const INPUT_SIZE: usize = 3;
/// Hidden state width.
pub const HIDDEN_SIZE: usize = 5;
/// Stacked gate rows.
const GATES: usize = 3 * HIDDEN_SIZE;

const INPUTS: &[TensorContract] = &[
    TensorContract {
        name: "data_input",
        axes: &[Axis::Batch, Axis::Sequence, Axis::Fixed(INPUT_SIZE)],
    },
    TensorContract {
        name: "init_hidden",
        axes: &[Axis::Fixed(1), Axis::Batch, Axis::Fixed(HIDDEN_SIZE)],
    },
];

const OUTPUTS: &[TensorContract] = &[
    TensorContract {
        name: "preds",
        axes: &[Axis::Batch, Axis::Sequence, Axis::Fixed(HIDDEN_SIZE)],
    },
    TensorContract {
        name: "hidden_out",
        axes: &[Axis::Fixed(1), Axis::Batch, Axis::Fixed(HIDDEN_SIZE)],
    },
];

/// Batch-first single-layer GRU.
#[derive(Debug, Clone)]
pub struct Gru {
    /// Input weights [3 * hidden, input], gates (r, z, n)
    weight_ih: Tensor,
    /// Recurrent weights [3 * hidden, hidden], gates (r, z, n)
    weight_hh: Tensor,
    /// Input bias [3 * hidden]
    bias_ih: Tensor,
    /// Recurrent bias [3 * hidden]
    bias_hh: Tensor,
    device: Device,
}

impl Gru {
    /// Create with parameters drawn from `seed`.
    ///
    /// All parameters are uniform in `[-1/sqrt(hidden), 1/sqrt(hidden)]`,
    /// drawn in the order weight_ih, weight_hh, bias_ih, bias_hh.
    pub fn new(seed: u64, device: &Device) -> Result<Self> {
        let mut init = ParamInit::new(seed, device);
        let weight_ih = init.fan_in_uniform(&[GATES, INPUT_SIZE], HIDDEN_SIZE)?;
        let weight_hh = init.fan_in_uniform(&[GATES, HIDDEN_SIZE], HIDDEN_SIZE)?;
        let bias_ih = init.fan_in_uniform(&[GATES], HIDDEN_SIZE)?;
        let bias_hh = init.fan_in_uniform(&[GATES], HIDDEN_SIZE)?;

        Ok(Self {
            weight_ih,
            weight_hh,
            bias_ih,
            bias_hh,
            device: device.clone(),
        })
    }

    /// Create from explicit weights in `(r, z, n)` gate order.
    pub fn from_weights(
        weight_ih: Tensor,
        weight_hh: Tensor,
        bias_ih: Tensor,
        bias_hh: Tensor,
    ) -> Result<Self> {
        let expected: [(&str, &Tensor, &[usize]); 4] = [
            ("weight_ih", &weight_ih, &[GATES, INPUT_SIZE]),
            ("weight_hh", &weight_hh, &[GATES, HIDDEN_SIZE]),
            ("bias_ih", &bias_ih, &[GATES]),
            ("bias_hh", &bias_hh, &[GATES]),
        ];
        for (name, tensor, dims) in expected {
            if tensor.dims() != dims {
                return Err(HarnessError::ShapeMismatch(format!(
                    "{name}: expected {dims:?}, got {:?}",
                    tensor.dims()
                )));
            }
        }

        let device = weight_ih.device().clone();
        Ok(Self {
            weight_ih,
            weight_hh,
            bias_ih,
            bias_hh,
            device,
        })
    }

    /// Zero initial hidden state [1, batch, hidden].
    pub fn init_state(&self, batch: usize) -> Result<Tensor> {
        crate::synth::zeros(&[1, batch, HIDDEN_SIZE], &self.device)
    }

    /// One recurrence step.
    ///
    /// # Arguments
    ///
    /// * `x` - Input at this timestep [batch, input]
    /// * `h` - Previous hidden state [batch, hidden]
    fn step(&self, x: &Tensor, h: &Tensor) -> Result<Tensor> {
        let gi = x
            .matmul(&self.weight_ih.t()?)?
            .broadcast_add(&self.bias_ih)?;
        let gh = h
            .matmul(&self.weight_hh.t()?)?
            .broadcast_add(&self.bias_hh)?;

        let gi = gi.chunk(3, D::Minus1)?;
        let gh = gh.chunk(3, D::Minus1)?;

        let r = candle_nn::ops::sigmoid(&gi[0].add(&gh[0])?)?;
        let z = candle_nn::ops::sigmoid(&gi[1].add(&gh[1])?)?;
        let n = gi[2].add(&r.mul(&gh[2])?)?.tanh()?;

        // (1 - z) * n + z * h
        Ok(n.add(&z.mul(&h.sub(&n)?)?)?)
    }

    /// Run the full sequence.
    ///
    /// # Arguments
    ///
    /// * `x` - Input sequence [batch, seq, input]
    /// * `h0` - Initial hidden state [1, batch, hidden]
    ///
    /// # Returns
    ///
    /// Per-timestep hidden states [batch, seq, hidden] and the final hidden
    /// state [1, batch, hidden].
    pub fn run(&self, x: &Tensor, h0: &Tensor) -> Result<(Tensor, Tensor)> {
        let bindings = check_tensors("gru", &[x.clone(), h0.clone()], INPUTS)?;
        let seq_len = bindings.seq.unwrap_or(0);

        let mut h = h0.squeeze(0)?.contiguous()?;
        let mut states = Vec::with_capacity(seq_len);
        for t in 0..seq_len {
            let x_t = x.narrow(1, t, 1)?.squeeze(1)?.contiguous()?;
            h = self.step(&x_t, &h)?;
            states.push(h.clone());
        }

        let preds = Tensor::stack(&states, 1)?;
        Ok((preds, h.unsqueeze(0)?))
    }

    /// Named parameters in storage order.
    pub fn parameters(&self) -> [(&'static str, &Tensor); 4] {
        [
            ("weight_ih_l0", &self.weight_ih),
            ("weight_hh_l0", &self.weight_hh),
            ("bias_ih_l0", &self.bias_ih),
            ("bias_hh_l0", &self.bias_hh),
        ]
    }
}

/// Reorder stacked gate rows from `(r, z, n)` to `(z, r, h)`.
fn to_onnx_gate_order(t: &Tensor) -> Result<Tensor> {
    let r = t.narrow(0, 0, HIDDEN_SIZE)?;
    let z = t.narrow(0, HIDDEN_SIZE, HIDDEN_SIZE)?;
    let n = t.narrow(0, 2 * HIDDEN_SIZE, HIDDEN_SIZE)?;
    Ok(Tensor::cat(&[z, r, n], 0)?)
}

impl SampleModel for Gru {
    fn kind(&self) -> ModelKind {
        ModelKind::Gru
    }

    fn signature(&self) -> Signature {
        Signature {
            inputs: INPUTS,
            outputs: OUTPUTS,
        }
    }

    fn forward(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        check_tensors("gru", inputs, INPUTS)?;
        let (preds, hidden) = self.run(&inputs[0], &inputs[1])?;
        Ok(vec![preds, hidden])
    }

    fn build_graph(&self, inputs: &[Tensor], outputs: &[Tensor]) -> Result<GraphDescription> {
        let mut graph = GraphDescription::traced("main_graph", inputs, outputs)?;

        let w = to_onnx_gate_order(&self.weight_ih)?.unsqueeze(0)?;
        let r = to_onnx_gate_order(&self.weight_hh)?.unsqueeze(0)?;
        let b = Tensor::cat(
            &[
                to_onnx_gate_order(&self.bias_ih)?,
                to_onnx_gate_order(&self.bias_hh)?,
            ],
            0,
        )?
        .unsqueeze(0)?;
        graph.initializers = vec![
            Initializer::from_tensor("onnx::GRU_W", &w)?,
            Initializer::from_tensor("onnx::GRU_R", &r)?,
            Initializer::from_tensor("onnx::GRU_B", &b)?,
            Initializer::int64s("onnx::Squeeze_axes", vec![1]),
        ];

        let data = GraphDescription::traced_input_name(0);
        let hidden = GraphDescription::traced_input_name(1);
        let preds = GraphDescription::traced_output_name(0);
        let hidden_out = GraphDescription::traced_output_name(1);

        // batch-first in and out, sequence-first inside the GRU node
        graph.nodes = vec![
            Node::new("/Transpose", "Transpose", &[&data], &["/Transpose_output_0"])
                .with_attr("perm", AttributeValue::Ints(vec![1, 0, 2])),
            Node::new(
                "/gru/GRU",
                "GRU",
                &[
                    "/Transpose_output_0",
                    "onnx::GRU_W",
                    "onnx::GRU_R",
                    "onnx::GRU_B",
                    "",
                    &hidden,
                ],
                &["/gru/GRU_output_0", &hidden_out],
            )
            .with_attr("hidden_size", AttributeValue::Int(HIDDEN_SIZE as i64))
            .with_attr("linear_before_reset", AttributeValue::Int(1)),
            Node::new(
                "/Squeeze",
                "Squeeze",
                &["/gru/GRU_output_0", "onnx::Squeeze_axes"],
                &["/Squeeze_output_0"],
            ),
            Node::new("/Transpose_1", "Transpose", &["/Squeeze_output_0"], &[&preds])
                .with_attr("perm", AttributeValue::Ints(vec![1, 0, 2])),
        ];
        Ok(graph)
    }
}

impl fmt::Display for Gru {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GRU(")?;
        writeln!(f, "  (gru): GRU({INPUT_SIZE}, {HIDDEN_SIZE}, batch_first=True)")?;
        write!(f, ")")
    }
}
