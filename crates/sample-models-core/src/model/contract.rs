//! Shape contracts of model forward signatures.

use crate::error::{HarnessError, Result};
use candle_core::Tensor;

/// Symbolic name of the batch axis in exported artifacts.
pub const BATCH_AXIS: &str = "batch_size";

/// Symbolic name of the sequence axis in exported artifacts.
pub const SEQ_AXIS: &str = "seq_length";

/// One axis of a tensor contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Batch dimension, variable and shared by every tensor of a call.
    Batch,
    /// Sequence dimension, variable and shared by every tensor of a call.
    Sequence,
    /// Fixed-size feature or direction axis.
    Fixed(usize),
}

/// Declared name and axes of one forward input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorContract {
    /// Name the tensor carries in artifacts and transcripts.
    pub name: &'static str,
    /// Axes in order.
    pub axes: &'static [Axis],
}

impl TensorContract {
    /// Concrete shape for the given batch size and sequence length.
    pub fn shape(&self, batch: usize, seq: usize) -> Vec<usize> {
        self.axes
            .iter()
            .map(|axis| match axis {
                Axis::Batch => batch,
                Axis::Sequence => seq,
                Axis::Fixed(size) => *size,
            })
            .collect()
    }

    /// Positions and symbols of the variable-size axes.
    pub fn dynamic_axes(&self) -> impl Iterator<Item = (usize, &'static str)> + '_ {
        self.axes
            .iter()
            .enumerate()
            .filter_map(|(i, axis)| match axis {
                Axis::Batch => Some((i, BATCH_AXIS)),
                Axis::Sequence => Some((i, SEQ_AXIS)),
                Axis::Fixed(_) => None,
            })
    }
}

/// Contracts for every input and output of a forward call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// Inputs in forward order.
    pub inputs: &'static [TensorContract],
    /// Outputs in forward order.
    pub outputs: &'static [TensorContract],
}

/// Sizes bound to the variable axes by a concrete call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bindings {
    /// Bound batch size.
    pub batch: Option<usize>,
    /// Bound sequence length.
    pub seq: Option<usize>,
}

/// Check tensors against contracts and bind the variable axes.
///
/// Variable axes must be non-zero and agree across all tensors.
pub fn check_tensors(
    model: &str,
    tensors: &[Tensor],
    contracts: &[TensorContract],
) -> Result<Bindings> {
    if tensors.len() != contracts.len() {
        return Err(HarnessError::ShapeMismatch(format!(
            "{model}: expected {} tensors, got {}",
            contracts.len(),
            tensors.len()
        )));
    }

    let mut bindings = Bindings::default();
    for (tensor, contract) in tensors.iter().zip(contracts) {
        let dims = tensor.dims();
        if dims.len() != contract.axes.len() {
            return Err(HarnessError::ShapeMismatch(format!(
                "{model}: '{}' expected rank {}, got shape {dims:?}",
                contract.name,
                contract.axes.len()
            )));
        }

        for (axis, (&size, kind)) in dims.iter().zip(contract.axes).enumerate() {
            let slot = match kind {
                Axis::Fixed(expected) if size == *expected => continue,
                Axis::Fixed(expected) => {
                    return Err(HarnessError::ShapeMismatch(format!(
                        "{model}: '{}' axis {axis} expected {expected}, got {size}",
                        contract.name
                    )))
                }
                Axis::Batch => &mut bindings.batch,
                Axis::Sequence => &mut bindings.seq,
            };
            if size == 0 {
                return Err(HarnessError::ShapeMismatch(format!(
                    "{model}: '{}' axis {axis} must be non-empty",
                    contract.name
                )));
            }
            if let Some(bound) = *slot {
                if bound != size {
                    return Err(HarnessError::ShapeMismatch(format!(
                        "{model}: '{}' axis {axis} is {size}, already bound to {bound}",
                        contract.name
                    )));
                }
            }
            *slot = Some(size);
        }
    }
    Ok(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    const SEQ_IN: &[TensorContract] = &[
        TensorContract {
            name: "data_input",
            axes: &[Axis::Batch, Axis::Sequence, Axis::Fixed(3)],
        },
        TensorContract {
            name: "init_hidden",
            axes: &[Axis::Fixed(1), Axis::Batch, Axis::Fixed(5)],
        },
    ];

    fn zeros(shape: &[usize]) -> Tensor {
        Tensor::zeros(shape, DType::F32, &Device::Cpu).unwrap()
    }

    #[test]
    fn binds_batch_and_seq() {
        let bindings =
            check_tensors("gru", &[zeros(&[2, 7, 3]), zeros(&[1, 2, 5])], SEQ_IN).unwrap();
        assert_eq!(bindings.batch, Some(2));
        assert_eq!(bindings.seq, Some(7));
    }

    #[test]
    fn inconsistent_batch_rejected() {
        let result = check_tensors("gru", &[zeros(&[2, 7, 3]), zeros(&[1, 3, 5])], SEQ_IN);
        assert!(matches!(result, Err(HarnessError::ShapeMismatch(_))));
    }

    #[test]
    fn wrong_feature_width_rejected() {
        let result = check_tensors("gru", &[zeros(&[2, 7, 4]), zeros(&[1, 2, 5])], SEQ_IN);
        assert!(result.is_err());
    }

    #[test]
    fn wrong_arity_rejected() {
        assert!(check_tensors("gru", &[zeros(&[2, 7, 3])], SEQ_IN).is_err());
    }

    #[test]
    fn contract_shape_and_axes() {
        assert_eq!(SEQ_IN[0].shape(4, 9), vec![4, 9, 3]);
        let axes: Vec<_> = SEQ_IN[1].dynamic_axes().collect();
        assert_eq!(axes, vec![(1, BATCH_AXIS)]);
    }
}
