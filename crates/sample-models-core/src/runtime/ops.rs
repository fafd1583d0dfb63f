//! Operator kernels.
//!
//! Each kernel takes the node and its resolved inputs (`None` for an omitted
//! optional input) and returns outputs in node-output order.

use crate::error::{HarnessError, Result};
use crate::graph::{AttributeValue, Node, DEFAULT_DOMAIN, ML_DOMAIN};
use candle_core::{DType, Tensor, D};

/// Evaluate one node.
pub fn apply(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>> {
    let domain = match node.domain.as_str() {
        "ai.onnx" => DEFAULT_DOMAIN,
        other => other,
    };
    match (domain, node.op_type.as_str()) {
        (DEFAULT_DOMAIN, "Gemm") => gemm(node, inputs).map(|y| vec![y]),
        (DEFAULT_DOMAIN, "Relu") => {
            allow_attrs(node, &[])?;
            Ok(vec![required(node, inputs, 0)?.relu()?])
        }
        (DEFAULT_DOMAIN, "Transpose") => transpose(node, inputs).map(|y| vec![y]),
        (DEFAULT_DOMAIN, "Squeeze") => squeeze(node, inputs).map(|y| vec![y]),
        (DEFAULT_DOMAIN, "GRU") => gru(node, inputs),
        (ML_DOMAIN, "Scaler") => scaler(node, inputs).map(|y| vec![y]),
        _ => Err(HarnessError::UnsupportedOp {
            op: node.op_type.clone(),
            domain: node.domain.clone(),
            opset: 0,
        }),
    }
}

fn required<'a>(node: &Node, inputs: &[Option<&'a Tensor>], index: usize) -> Result<&'a Tensor> {
    inputs.get(index).copied().flatten().ok_or_else(|| {
        HarnessError::Runtime(format!(
            "{} '{}': missing required input {index}",
            node.op_type, node.name
        ))
    })
}

fn optional<'a>(inputs: &[Option<&'a Tensor>], index: usize) -> Option<&'a Tensor> {
    inputs.get(index).copied().flatten()
}

fn allow_attrs(node: &Node, known: &[&str]) -> Result<()> {
    match node.attributes.iter().find(|(name, _)| !known.contains(&name.as_str())) {
        Some((name, _)) => Err(HarnessError::UnsupportedAttribute {
            op: node.op_type.clone(),
            attribute: name.clone(),
        }),
        None => Ok(()),
    }
}

fn attr_int(node: &Node, name: &str, default: i64) -> Result<i64> {
    match node.attr(name) {
        None => Ok(default),
        Some(AttributeValue::Int(v)) => Ok(*v),
        Some(_) => Err(type_error(node, name, "int")),
    }
}

fn attr_float(node: &Node, name: &str, default: f32) -> Result<f32> {
    match node.attr(name) {
        None => Ok(default),
        Some(AttributeValue::Float(v)) => Ok(*v),
        Some(_) => Err(type_error(node, name, "float")),
    }
}

fn attr_floats<'a>(node: &'a Node, name: &str) -> Result<&'a [f32]> {
    match node.attr(name) {
        Some(AttributeValue::Floats(v)) => Ok(v),
        None => Err(HarnessError::Runtime(format!(
            "{} '{}': missing attribute '{name}'",
            node.op_type, node.name
        ))),
        Some(_) => Err(type_error(node, name, "floats")),
    }
}

fn type_error(node: &Node, name: &str, expected: &str) -> HarnessError {
    HarnessError::Runtime(format!(
        "{} '{}': attribute '{name}' is not {expected}",
        node.op_type, node.name
    ))
}

/// Resolve a possibly negative axis against `rank`.
fn normalize_axis(axis: i64, rank: usize) -> Result<usize> {
    let resolved = if axis < 0 { axis + rank as i64 } else { axis };
    if (0..rank as i64).contains(&resolved) {
        Ok(resolved as usize)
    } else {
        Err(HarnessError::Runtime(format!(
            "axis {axis} out of range for rank {rank}"
        )))
    }
}

/// `Y = alpha * A' @ B' + beta * C`
fn gemm(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Tensor> {
    allow_attrs(node, &["alpha", "beta", "transA", "transB"])?;
    let alpha = attr_float(node, "alpha", 1.0)?;
    let beta = attr_float(node, "beta", 1.0)?;

    let mut a = required(node, inputs, 0)?.clone();
    let mut b = required(node, inputs, 1)?.clone();
    if attr_int(node, "transA", 0)? != 0 {
        a = a.t()?;
    }
    if attr_int(node, "transB", 0)? != 0 {
        b = b.t()?;
    }

    let mut y = a.contiguous()?.matmul(&b.contiguous()?)?;
    if alpha != 1.0 {
        y = y.affine(alpha as f64, 0.0)?;
    }
    if let Some(c) = optional(inputs, 2) {
        let c = if beta != 1.0 {
            c.affine(beta as f64, 0.0)?
        } else {
            c.clone()
        };
        y = y.broadcast_add(&c)?;
    }
    Ok(y)
}

fn transpose(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Tensor> {
    allow_attrs(node, &["perm"])?;
    let x = required(node, inputs, 0)?;
    let rank = x.rank();

    let perm: Vec<usize> = match node.attr("perm") {
        None => (0..rank).rev().collect(),
        Some(AttributeValue::Ints(perm)) => perm
            .iter()
            .map(|&p| normalize_axis(p, rank))
            .collect::<Result<_>>()?,
        Some(_) => return Err(type_error(node, "perm", "ints")),
    };
    if perm.len() != rank {
        return Err(HarnessError::Runtime(format!(
            "Transpose '{}': perm {perm:?} for rank {rank}",
            node.name
        )));
    }
    Ok(x.permute(perm)?.contiguous()?)
}

/// Opset-13 `Squeeze`: axes come from the optional second input.
fn squeeze(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Tensor> {
    allow_attrs(node, &[])?;
    let x = required(node, inputs, 0)?;
    let rank = x.rank();

    let mut axes: Vec<usize> = match optional(inputs, 1) {
        Some(axes) => axes
            .to_dtype(DType::I64)?
            .flatten_all()?
            .to_vec1::<i64>()?
            .into_iter()
            .map(|a| normalize_axis(a, rank))
            .collect::<Result<_>>()?,
        None => (0..rank).filter(|&d| x.dims()[d] == 1).collect(),
    };
    axes.sort_unstable();
    axes.dedup();

    let mut y = x.clone();
    for &axis in axes.iter().rev() {
        if y.dims()[axis] != 1 {
            return Err(HarnessError::Runtime(format!(
                "Squeeze '{}': axis {axis} has size {}",
                node.name,
                y.dims()[axis]
            )));
        }
        y = y.squeeze(axis)?;
    }
    Ok(y)
}

/// Forward single-direction GRU with the default `Sigmoid`/`Tanh` pair.
///
/// Inputs: `X` [seq, batch, input], `W` [1, 3H, input], `R` [1, 3H, H],
/// optional `B` [1, 6H], `sequence_lens` (must be omitted), optional
/// `initial_h` [1, batch, H]. Gate blocks are ordered `(z, r, h)`.
/// Outputs `Y` [seq, 1, batch, H] and `Y_h` [1, batch, H].
fn gru(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Vec<Tensor>> {
    allow_attrs(
        node,
        &["hidden_size", "linear_before_reset", "direction", "layout"],
    )?;
    match node.attr("direction") {
        None => {}
        Some(AttributeValue::String(d)) if d == "forward" => {}
        Some(_) => {
            return Err(HarnessError::UnsupportedAttribute {
                op: node.op_type.clone(),
                attribute: "direction".into(),
            })
        }
    }
    if attr_int(node, "layout", 0)? != 0 {
        return Err(HarnessError::UnsupportedAttribute {
            op: node.op_type.clone(),
            attribute: "layout".into(),
        });
    }
    if optional(inputs, 4).is_some() {
        return Err(HarnessError::Runtime(format!(
            "GRU '{}': sequence_lens is not supported",
            node.name
        )));
    }

    let x = required(node, inputs, 0)?;
    let w = required(node, inputs, 1)?.squeeze(0)?;
    let r = required(node, inputs, 2)?.squeeze(0)?;
    let (seq_len, batch, _) = x.dims3()?;
    let hidden = r.dim(D::Minus1)?;
    let declared = attr_int(node, "hidden_size", hidden as i64)?;
    if declared != hidden as i64 || w.dim(0)? != 3 * hidden {
        return Err(HarnessError::Runtime(format!(
            "GRU '{}': hidden_size {declared} does not match weights {:?} / {:?}",
            node.name,
            w.dims(),
            r.dims()
        )));
    }
    let linear_before_reset = attr_int(node, "linear_before_reset", 0)? != 0;

    let (wb, rb) = match optional(inputs, 3) {
        Some(b) => {
            let b = b.squeeze(0)?;
            (b.narrow(0, 0, 3 * hidden)?, b.narrow(0, 3 * hidden, 3 * hidden)?)
        }
        None => {
            let zeros = Tensor::zeros(3 * hidden, x.dtype(), x.device())?;
            (zeros.clone(), zeros)
        }
    };
    let mut h = match optional(inputs, 5) {
        Some(h0) => h0.squeeze(0)?.contiguous()?,
        None => Tensor::zeros((batch, hidden), x.dtype(), x.device())?,
    };

    let r_zr = r.narrow(0, 0, 2 * hidden)?;
    let r_h = r.narrow(0, 2 * hidden, hidden)?;
    let rb_zr = rb.narrow(0, 0, 2 * hidden)?;
    let rb_h = rb.narrow(0, 2 * hidden, hidden)?;

    let mut states = Vec::with_capacity(seq_len);
    for t in 0..seq_len {
        let x_t = x.get(t)?.contiguous()?;
        let gx = x_t.matmul(&w.t()?)?.broadcast_add(&wb)?;
        let gh = h.matmul(&r_zr.t()?)?.broadcast_add(&rb_zr)?;

        let z_pre = gx.narrow(1, 0, hidden)?.add(&gh.narrow(1, 0, hidden)?)?;
        let r_pre = gx.narrow(1, hidden, hidden)?.add(&gh.narrow(1, hidden, hidden)?)?;
        let z = candle_nn::ops::sigmoid(&z_pre)?;
        let r_gate = candle_nn::ops::sigmoid(&r_pre)?;

        let recurrent = if linear_before_reset {
            r_gate.mul(&h.matmul(&r_h.t()?)?.broadcast_add(&rb_h)?)?
        } else {
            r_gate.mul(&h)?.matmul(&r_h.t()?)?.broadcast_add(&rb_h)?
        };
        let n = gx.narrow(1, 2 * hidden, hidden)?.add(&recurrent)?.tanh()?;

        h = n.add(&z.mul(&h.sub(&n)?)?)?;
        states.push(h.clone());
    }

    let y = Tensor::stack(&states, 0)?.unsqueeze(1)?;
    Ok(vec![y, h.unsqueeze(0)?])
}

/// `ai.onnx.ml` `Scaler`: `Y = (X - offset) * scale` per feature column.
fn scaler(node: &Node, inputs: &[Option<&Tensor>]) -> Result<Tensor> {
    allow_attrs(node, &["offset", "scale"])?;
    let x = required(node, inputs, 0)?.to_dtype(DType::F32)?;
    let columns = x.dim(D::Minus1)?;

    let expand = |name: &str| -> Result<Tensor> {
        let values = attr_floats(node, name)?;
        let values = match values.len() {
            1 => vec![values[0]; columns],
            n if n == columns => values.to_vec(),
            n => {
                return Err(HarnessError::Runtime(format!(
                    "Scaler '{}': {n} {name} values for {columns} columns",
                    node.name
                )))
            }
        };
        Ok(Tensor::from_vec(values, columns, x.device())?)
    };

    let offset = expand("offset")?;
    let scale = expand("scale")?;
    Ok(x.broadcast_sub(&offset)?.broadcast_mul(&scale)?)
}
