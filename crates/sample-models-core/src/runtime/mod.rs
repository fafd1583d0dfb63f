//! Reference interpreter for exported artifacts.
//!
//! Loads an ONNX file written by the export pipeline and evaluates it node
//! by node on candle tensors. Only the operators the sample models emit are
//! implemented; anything else is rejected when the artifact is loaded.
//!
//! Inputs are bound by name and checked against the declared shapes: fixed
//! axes must match exactly and each dynamic symbol binds to one size for the
//! whole call.

pub mod ops;

use crate::error::{HarnessError, Result};
use crate::graph::{self, opset, proto::ModelProto, Dim, GraphDescription, ValueSpec};
use candle_core::{Device, Tensor};
use prost::Message;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// A loaded artifact ready to run.
#[derive(Debug)]
pub struct Interpreter {
    graph: GraphDescription,
    opsets: BTreeMap<String, i64>,
    initializers: HashMap<String, Tensor>,
}

impl Interpreter {
    /// Load an artifact from disk.
    pub fn from_file(path: &Path, device: &Device) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        tracing::debug!("loading {} ({} bytes)", path.display(), bytes.len());
        Self::from_bytes(&bytes, device)
    }

    /// Load an artifact from its serialized bytes.
    pub fn from_bytes(bytes: &[u8], device: &Device) -> Result<Self> {
        let model = ModelProto::decode(bytes)?;
        let (graph, opsets) = graph::decode_model(&model)?;

        opset::check_representable(&graph, |domain| {
            let domain = if domain == "ai.onnx" { "" } else { domain };
            opsets.get(domain).copied().unwrap_or(0)
        })?;

        let initializers = graph
            .initializers
            .iter()
            .map(|init| Ok((init.name.clone(), init.to_tensor(device)?)))
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self {
            graph,
            opsets,
            initializers,
        })
    }

    /// Declared inputs, in graph order.
    pub fn inputs(&self) -> &[ValueSpec] {
        &self.graph.inputs
    }

    /// Declared outputs, in graph order.
    pub fn outputs(&self) -> &[ValueSpec] {
        &self.graph.outputs
    }

    /// Imported opset version per domain.
    pub fn opsets(&self) -> &BTreeMap<String, i64> {
        &self.opsets
    }

    /// The decoded graph.
    pub fn graph(&self) -> &GraphDescription {
        &self.graph
    }

    /// Run the graph.
    ///
    /// Every declared input must be fed exactly once. Outputs come back in
    /// declared order, paired with their names.
    pub fn run(&self, feeds: &[(&str, &Tensor)]) -> Result<Vec<(String, Tensor)>> {
        let mut symbols: HashMap<String, usize> = HashMap::new();
        let mut values: HashMap<&str, Tensor> = HashMap::new();

        for (name, _) in feeds {
            if !self.graph.inputs.iter().any(|spec| spec.name == *name) {
                return Err(HarnessError::Runtime(format!(
                    "'{name}' is not an input of this graph"
                )));
            }
        }
        for spec in &self.graph.inputs {
            let mut matching = feeds.iter().filter(|(name, _)| *name == spec.name);
            let tensor = match (matching.next(), matching.next()) {
                (Some((_, tensor)), None) => *tensor,
                (None, _) => {
                    return Err(HarnessError::Runtime(format!(
                        "missing input '{}'",
                        spec.name
                    )))
                }
                (Some(_), Some(_)) => {
                    return Err(HarnessError::Runtime(format!(
                        "input '{}' fed more than once",
                        spec.name
                    )))
                }
            };
            bind_shape(spec, tensor.dims(), &mut symbols)?;
            values.insert(spec.name.as_str(), tensor.clone());
        }

        for node in &self.graph.nodes {
            let inputs = node
                .inputs
                .iter()
                .map(|name| {
                    if name.is_empty() {
                        return Ok(None);
                    }
                    values
                        .get(name.as_str())
                        .or_else(|| self.initializers.get(name))
                        .map(Some)
                        .ok_or_else(|| {
                            HarnessError::Runtime(format!(
                                "{} '{}': value '{name}' is not defined",
                                node.op_type, node.name
                            ))
                        })
                })
                .collect::<Result<Vec<_>>>()?;

            let outputs = ops::apply(node, &inputs)?;
            tracing::trace!(node = node.name.as_str(), op = node.op_type.as_str(), "evaluated");
            for (name, tensor) in node.outputs.iter().zip(outputs) {
                if !name.is_empty() {
                    values.insert(name.as_str(), tensor);
                }
            }
        }

        self.graph
            .outputs
            .iter()
            .map(|spec| {
                let tensor = values.remove(spec.name.as_str()).ok_or_else(|| {
                    HarnessError::Runtime(format!("output '{}' was not produced", spec.name))
                })?;
                bind_shape(spec, tensor.dims(), &mut symbols)?;
                Ok((spec.name.clone(), tensor))
            })
            .collect()
    }
}

/// Check `dims` against a declared spec, binding dynamic symbols.
fn bind_shape(
    spec: &ValueSpec,
    dims: &[usize],
    symbols: &mut HashMap<String, usize>,
) -> Result<()> {
    if dims.len() != spec.dims.len() {
        return Err(HarnessError::ShapeMismatch(format!(
            "'{}' has shape {dims:?}, declared {spec}",
            spec.name
        )));
    }
    for (axis, (&size, dim)) in dims.iter().zip(&spec.dims).enumerate() {
        match dim {
            Dim::Fixed(expected) if *expected != size => {
                return Err(HarnessError::ShapeMismatch(format!(
                    "'{}' axis {axis} is {size}, declared {spec}",
                    spec.name
                )))
            }
            Dim::Fixed(_) => {}
            Dim::Dynamic(symbol) => {
                let bound = *symbols.entry(symbol.clone()).or_insert(size);
                if bound != size {
                    return Err(HarnessError::ShapeMismatch(format!(
                        "'{}' axis {axis} is {size}, but '{symbol}' is bound to {bound}",
                        spec.name
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{encode_model, ExportTarget, Node};
    use crate::synth;

    fn relu_artifact(axes: bool) -> Vec<u8> {
        let x = synth::zeros(&[2, 3], &Device::Cpu).unwrap();
        let mut graph = GraphDescription::traced("relu", &[x.clone()], &[x]).unwrap();
        graph.nodes.push(Node::new("/Relu", "Relu", &["input_0"], &["output_0"]));
        graph.rename_inputs(&["x"]).unwrap();
        graph.rename_outputs(&["y"]).unwrap();
        if axes {
            let dynamic = graph::DynamicAxes::new()
                .axis("x", 0, "batch_size")
                .axis("y", 0, "batch_size");
            graph.apply_dynamic_axes(&dynamic).unwrap();
        }
        encode_model(&graph, &ExportTarget::default()).encode_to_vec()
    }

    #[test]
    fn runs_by_name() {
        let interp = Interpreter::from_bytes(&relu_artifact(true), &Device::Cpu).unwrap();
        let x = Tensor::new(&[[-1.0f32, 0.5, 2.0]], &Device::Cpu).unwrap();

        let out = interp.run(&[("x", &x)]).unwrap();

        assert_eq!(out[0].0, "y");
        assert_eq!(out[0].1.to_vec2::<f32>().unwrap(), vec![vec![0.0, 0.5, 2.0]]);
    }

    #[test]
    fn fixed_axis_enforced() {
        let interp = Interpreter::from_bytes(&relu_artifact(false), &Device::Cpu).unwrap();
        let x = synth::zeros(&[3, 3], &Device::Cpu).unwrap();

        assert!(matches!(
            interp.run(&[("x", &x)]),
            Err(HarnessError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn missing_and_unknown_inputs() {
        let interp = Interpreter::from_bytes(&relu_artifact(true), &Device::Cpu).unwrap();
        let x = synth::zeros(&[1, 3], &Device::Cpu).unwrap();

        assert!(interp.run(&[]).is_err());
        assert!(interp.run(&[("x", &x), ("z", &x)]).is_err());
        assert!(interp.run(&[("x", &x), ("x", &x)]).is_err());
    }

    #[test]
    fn symbol_binds_one_size() {
        let mut symbols = HashMap::new();
        let spec = ValueSpec {
            name: "h".into(),
            elem_type: graph::ElemType::F32,
            dims: vec![Dim::Fixed(1), Dim::Dynamic("batch_size".into()), Dim::Fixed(5)],
        };
        bind_shape(&spec, &[1, 4, 5], &mut symbols).unwrap();

        assert!(bind_shape(&spec, &[1, 3, 5], &mut symbols).is_err());
        assert_eq!(symbols.get("batch_size"), Some(&4));
    }

    #[test]
    fn unsupported_op_rejected_at_load() {
        let x = synth::zeros(&[2], &Device::Cpu).unwrap();
        let mut graph = GraphDescription::traced("g", &[x.clone()], &[x]).unwrap();
        graph.nodes.push(Node::new("/Gelu", "Gelu", &["input_0"], &["output_0"]));
        let bytes = encode_model(&graph, &ExportTarget::default()).encode_to_vec();

        assert!(matches!(
            Interpreter::from_bytes(&bytes, &Device::Cpu),
            Err(HarnessError::UnsupportedOp { .. })
        ));
    }

    #[test]
    fn garbage_bytes_rejected() {
        assert!(Interpreter::from_bytes(&[0xff, 0xff, 0xff], &Device::Cpu).is_err());
    }
}
