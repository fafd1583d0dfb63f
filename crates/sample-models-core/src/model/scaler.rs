//! Standardizing feature scaler.
//!
//! Fitted once on [`FIT_TABLE`]: per column, `y = (x - mean) / std` with the
//! population standard deviation. Exported as a single `ai.onnx.ml` `Scaler`
//! node whose `offset` is the mean and whose `scale` is `1 / std`.

use super::{check_tensors, Axis, ModelKind, SampleModel, Signature, TensorContract};
use crate::error::{HarnessError, Result};
use crate::graph::{AttributeValue, GraphDescription, Node, ML_DOMAIN};
use crate::synth;
use candle_core::{Device, Tensor};
use std::fmt;

/// Feature columns.
pub const FEATURES: usize = 3;

/// The literal fitting table. Exports trace all of it.
pub const FIT_TABLE: [[f32; FEATURES]; 7] = [
    [1.0, 10.0, 100.0],
    [1.5, 13.0, 120.0],
    [0.8, 9.0, 95.0],
    [0.9, 11.0, 105.0],
    [0.6, 12.0, 101.0],
    [1.3, 10.0, 110.0],
    [1.1, 7.0, 108.0],
];

const INPUTS: &[TensorContract] = &[TensorContract {
    name: "X",
    axes: &[Axis::Batch, Axis::Fixed(FEATURES)],
}];

const OUTPUTS: &[TensorContract] = &[TensorContract {
    name: "variable",
    axes: &[Axis::Batch, Axis::Fixed(FEATURES)],
}];

/// Per-column standardization.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    mean: Vec<f64>,
    std: Vec<f64>,
    /// `mean` as f32 [features]
    offset: Tensor,
    /// `1 / std` as f32 [features]
    scale: Tensor,
}

impl StandardScaler {
    /// Fit on a `(rows, features)` table.
    ///
    /// Statistics accumulate in f64. A column with zero variance gets a
    /// standard deviation of 1, so it is centered but not scaled.
    pub fn fit(data: &Tensor) -> Result<Self> {
        let rows: Vec<Vec<f32>> = data.to_vec2()?;
        let columns = rows.first().map(Vec::len).unwrap_or(0);
        if rows.is_empty() || columns == 0 {
            return Err(HarnessError::Construction(
                "cannot fit a scaler on an empty table".into(),
            ));
        }

        let n = rows.len() as f64;
        let mut mean = vec![0f64; columns];
        for row in &rows {
            for (acc, &v) in mean.iter_mut().zip(row) {
                *acc += v as f64;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut var = vec![0f64; columns];
        for row in &rows {
            for ((acc, &v), m) in var.iter_mut().zip(row).zip(&mean) {
                let d = v as f64 - m;
                *acc += d * d;
            }
        }
        let std: Vec<f64> = var
            .iter()
            .map(|v| (v / n).sqrt())
            .map(|s| if s == 0.0 { 1.0 } else { s })
            .collect();

        let device = data.device();
        let offset: Vec<f32> = mean.iter().map(|&m| m as f32).collect();
        let scale: Vec<f32> = std.iter().map(|&s| (1.0 / s) as f32).collect();
        Ok(Self {
            offset: Tensor::from_vec(offset, columns, device)?,
            scale: Tensor::from_vec(scale, columns, device)?,
            mean,
            std,
        })
    }

    /// Fit on [`FIT_TABLE`].
    pub fn fit_reference(device: &Device) -> Result<Self> {
        Self::fit(&synth::from_rows(&FIT_TABLE, device)?)
    }

    /// Fitted column means.
    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// Fitted column standard deviations (zeros replaced by 1).
    pub fn std(&self) -> &[f64] {
        &self.std
    }

    /// Standardize `x` [batch, features].
    pub fn transform(&self, x: &Tensor) -> Result<Tensor> {
        check_tensors("scaler", std::slice::from_ref(x), INPUTS)?;
        Ok(x.broadcast_sub(&self.offset)?.broadcast_mul(&self.scale)?)
    }
}

impl SampleModel for StandardScaler {
    fn kind(&self) -> ModelKind {
        ModelKind::Scaler
    }

    fn signature(&self) -> Signature {
        Signature {
            inputs: INPUTS,
            outputs: OUTPUTS,
        }
    }

    fn forward(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        check_tensors("scaler", inputs, INPUTS)?;
        Ok(vec![self.transform(&inputs[0])?])
    }

    fn build_graph(&self, inputs: &[Tensor], outputs: &[Tensor]) -> Result<GraphDescription> {
        let mut graph = GraphDescription::traced("pipeline_standard_scaler", inputs, outputs)?;
        let offset: Vec<f32> = self.offset.to_vec1()?;
        let scale: Vec<f32> = self.scale.to_vec1()?;

        graph.nodes = vec![Node::new(
            "Scaler",
            "Scaler",
            &[&GraphDescription::traced_input_name(0)],
            &[&GraphDescription::traced_output_name(0)],
        )
        .with_domain(ML_DOMAIN)
        .with_attr("offset", AttributeValue::Floats(offset))
        .with_attr("scale", AttributeValue::Floats(scale))];
        Ok(graph)
    }
}

impl fmt::Display for StandardScaler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pipeline(steps=[('scaler', StandardScaler())])")
    }
}
