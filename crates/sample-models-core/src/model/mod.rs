//! Sample model definitions.
//!
//! Three fixed architectures:
//! - [`Mlp`]: `Linear(3, 5) -> ReLU -> Linear(5, 2)`
//! - [`Gru`]: single-layer batch-first GRU, input 3, hidden 5
//! - [`StandardScaler`]: per-column standardization fitted on a literal table
//!
//! Every model exposes a pure forward pass over candle tensors and can
//! describe itself as a [`GraphDescription`] for export.

mod contract;
pub mod gru;
pub mod mlp;
pub mod scaler;

pub use contract::{check_tensors, Axis, Bindings, Signature, TensorContract, BATCH_AXIS, SEQ_AXIS};
pub use gru::Gru;
pub use mlp::Mlp;
pub use scaler::StandardScaler;

use crate::config::HarnessConfig;
use crate::error::Result;
use crate::graph::{DynamicAxes, GraphDescription};
use candle_core::{Device, Tensor};
use std::fmt;

/// A fixed-architecture model with deterministic parameters.
pub trait SampleModel: fmt::Display {
    /// Which sample model this is.
    fn kind(&self) -> ModelKind;

    /// Shape contract of the forward signature.
    fn signature(&self) -> Signature;

    /// Forward pass. Inputs and outputs are in signature order.
    fn forward(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>>;

    /// Describe the computation traced by `forward(inputs) == outputs`.
    ///
    /// Interface names are positional and every axis is fixed at its traced
    /// size.
    fn build_graph(&self, inputs: &[Tensor], outputs: &[Tensor]) -> Result<GraphDescription>;

    /// Declared input names, in signature order.
    fn input_names(&self) -> Vec<&'static str> {
        self.signature().inputs.iter().map(|c| c.name).collect()
    }

    /// Declared output names, in signature order.
    fn output_names(&self) -> Vec<&'static str> {
        self.signature().outputs.iter().map(|c| c.name).collect()
    }

    /// Dynamic axes implied by the signature's batch and sequence axes.
    fn dynamic_axes(&self) -> DynamicAxes {
        let signature = self.signature();
        signature
            .inputs
            .iter()
            .chain(signature.outputs.iter())
            .fold(DynamicAxes::new(), |axes, contract| {
                contract
                    .dynamic_axes()
                    .fold(axes, |axes, (axis, symbol)| axes.axis(contract.name, axis, symbol))
            })
    }
}

/// The sample models the harness produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    /// Feed-forward classifier.
    Mlp,
    /// Recurrent sequence model.
    Gru,
    /// Feature-scaling transform.
    Scaler,
}

impl ModelKind {
    /// All models in dispatch order.
    pub const ALL: [ModelKind; 3] = [ModelKind::Mlp, ModelKind::Gru, ModelKind::Scaler];

    /// Artifact stem, e.g. `mlp` for `mlp.onnx`.
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Mlp => "mlp",
            ModelKind::Gru => "gru",
            ModelKind::Scaler => "scaler",
        }
    }

    /// Heading used in transcripts.
    pub fn title(&self) -> &'static str {
        match self {
            ModelKind::Mlp => "MLP",
            ModelKind::Gru => "GRU",
            ModelKind::Scaler => "Scaler",
        }
    }

    /// Construct the model. The seed is consumed here and nowhere else.
    pub fn build(&self, config: &HarnessConfig, device: &Device) -> Result<Box<dyn SampleModel>> {
        let model: Box<dyn SampleModel> = match self {
            ModelKind::Mlp => Box::new(Mlp::new(config.seed, device)?),
            ModelKind::Gru => Box::new(Gru::new(config.seed, device)?),
            ModelKind::Scaler => Box::new(StandardScaler::fit_reference(device)?),
        };
        Ok(model)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ModelKind {
    type Err = crate::error::HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        ModelKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| crate::error::HarnessError::Config(format!("unknown model '{s}'")))
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::synth;
    use proptest::prelude::*;

    fn output_dims(model: &dyn SampleModel, inputs: &[Tensor]) -> Vec<Vec<usize>> {
        model
            .forward(inputs)
            .unwrap()
            .iter()
            .map(|t| t.dims().to_vec())
            .collect()
    }

    fn contract_dims(model: &dyn SampleModel, batch: usize, seq: usize) -> Vec<Vec<usize>> {
        model
            .signature()
            .outputs
            .iter()
            .map(|c| c.shape(batch, seq))
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Invariant: MLP maps (b, 3) to (b, 2)
        #[test]
        fn invariant_mlp_shape(batch in 1usize..=30, seed in any::<u64>()) {
            let mlp = Mlp::new(seed, &Device::Cpu).unwrap();
            let x = synth::seeded_uniform(&[batch, 3], seed, &Device::Cpu).unwrap();

            prop_assert_eq!(output_dims(&mlp, &[x]), vec![vec![batch, 2]]);
        }

        /// Invariant: GRU outputs follow the bound batch and sequence sizes
        #[test]
        fn invariant_gru_shape(batch in 1usize..=6, seq in 1usize..=30) {
            let gru = Gru::new(42, &Device::Cpu).unwrap();
            let x = synth::arange(&[batch, seq, 3], &Device::Cpu).unwrap();
            let h0 = gru.init_state(batch).unwrap();

            prop_assert_eq!(output_dims(&gru, &[x, h0]), contract_dims(&gru, batch, seq));
        }

        /// Invariant: the scaler preserves shape
        #[test]
        fn invariant_scaler_shape(rows in 1usize..=30) {
            let scaler = StandardScaler::fit_reference(&Device::Cpu).unwrap();
            let x = synth::arange(&[rows, 3], &Device::Cpu).unwrap();

            prop_assert_eq!(output_dims(&scaler, &[x]), vec![vec![rows, 3]]);
        }

        /// Invariant: two constructions from one seed agree bit for bit
        #[test]
        fn invariant_seed_determinism(seed in any::<u64>()) {
            let x = synth::arange(&[2, 3], &Device::Cpu).unwrap();
            let a: Vec<Vec<f32>> = Mlp::new(seed, &Device::Cpu)
                .unwrap()
                .forward_one(&x)
                .unwrap()
                .to_vec2()
                .unwrap();
            let b: Vec<Vec<f32>> = Mlp::new(seed, &Device::Cpu)
                .unwrap()
                .forward_one(&x)
                .unwrap()
                .to_vec2()
                .unwrap();

            prop_assert_eq!(a, b);
        }

        /// Invariant: a feature width other than 3 is rejected
        #[test]
        fn invariant_wrong_width_rejected(batch in 1usize..=8, width in 4usize..=8) {
            let mlp = Mlp::new(42, &Device::Cpu).unwrap();
            let x = synth::zeros(&[batch, width], &Device::Cpu).unwrap();

            prop_assert!(mlp.forward(&[x]).is_err());
        }
    }
}
