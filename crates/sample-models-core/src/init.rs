//! Seeded parameter initialisation.
//!
//! Every model owns one [`ParamInit`] for the duration of its constructor.
//! Parameters are drawn in a fixed order, so the same seed always yields the
//! same parameters regardless of which other models were built before.

use crate::error::{HarnessError, Result};
use candle_core::{Device, Tensor};
use rand::distributions::Uniform;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Deterministic source of parameter tensors.
pub struct ParamInit {
    rng: ChaCha8Rng,
    device: Device,
}

impl ParamInit {
    /// Create an initialiser from a seed.
    pub fn new(seed: u64, device: &Device) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            device: device.clone(),
        }
    }

    /// Draw a tensor uniformly from `[-bound, bound)`.
    pub fn uniform(&mut self, shape: &[usize], bound: f32) -> Result<Tensor> {
        if !(bound > 0.0 && bound.is_finite()) {
            return Err(HarnessError::Construction(format!(
                "invalid init bound {bound}"
            )));
        }
        let dist = Uniform::new(-bound, bound);
        let len: usize = shape.iter().product();
        let values: Vec<f32> = (0..len).map(|_| self.rng.sample(dist)).collect();

        Tensor::from_vec(values, shape, &self.device)
            .map_err(|e| HarnessError::Construction(e.to_string()))
    }

    /// Draw with the fan-in bound `1 / sqrt(fan_in)`.
    pub fn fan_in_uniform(&mut self, shape: &[usize], fan_in: usize) -> Result<Tensor> {
        if fan_in == 0 {
            return Err(HarnessError::Construction("fan_in must be non-zero".into()));
        }
        self.uniform(shape, 1.0 / (fan_in as f32).sqrt())
    }
}
