//! Framework-independent graph descriptions.
//!
//! Export is two-phase: a model first builds a [`GraphDescription`] from a
//! traced forward call, then the description is serialized to ONNX. The same
//! description type is recovered when an artifact is loaded back, so the
//! reference interpreter works on exactly what was written.
//!
//! Traced graphs name their inputs and outputs positionally
//! (`input_0`, `output_0`, ..) with every axis fixed at the traced size.
//! [`GraphDescription::rename_inputs`], [`GraphDescription::rename_outputs`]
//! and [`GraphDescription::apply_dynamic_axes`] turn that into the declared
//! interface.

mod codec;
pub mod opset;
pub mod proto;

pub use codec::{
    decode_model, encode_model, ExportTarget, DEFAULT_DOMAIN, ML_DOMAIN, ML_OPSET_VERSION,
};

use crate::error::{HarnessError, Result};
use candle_core::{DType, Device, Tensor};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// One tensor axis in a declared interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dim {
    /// Size fixed at export time.
    Fixed(usize),
    /// Size supplied at inference time, bound by symbolic name.
    Dynamic(String),
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(size) => write!(f, "{size}"),
            Dim::Dynamic(name) => write!(f, "{name}"),
        }
    }
}

/// Element type of a graph value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemType {
    /// 32-bit float.
    F32,
    /// 64-bit signed integer.
    I64,
}

/// Name, element type and shape of a graph input or output.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueSpec {
    /// Tensor name.
    pub name: String,
    /// Element type.
    pub elem_type: ElemType,
    /// One entry per axis.
    pub dims: Vec<Dim>,
}

impl ValueSpec {
    /// Spec with every axis fixed at the given tensor's size.
    pub fn traced(name: impl Into<String>, tensor: &Tensor) -> Result<Self> {
        let elem_type = match tensor.dtype() {
            DType::F32 => ElemType::F32,
            DType::I64 => ElemType::I64,
            other => {
                return Err(HarnessError::Declaration(format!(
                    "cannot declare a graph value of dtype {other:?}"
                )))
            }
        };
        Ok(Self {
            name: name.into(),
            elem_type,
            dims: tensor.dims().iter().map(|&d| Dim::Fixed(d)).collect(),
        })
    }

    /// Symbolic names of the dynamic axes, by position.
    pub fn dynamic_axes(&self) -> BTreeMap<usize, &str> {
        self.dims
            .iter()
            .enumerate()
            .filter_map(|(axis, dim)| match dim {
                Dim::Dynamic(name) => Some((axis, name.as_str())),
                Dim::Fixed(_) => None,
            })
            .collect()
    }
}

impl fmt::Display for ValueSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.dims.iter().map(|d| d.to_string()).collect();
        write!(f, "{}: [{}]", self.name, dims.join(", "))
    }
}

/// Payload of an initializer.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    /// 32-bit floats, row-major.
    F32(Vec<f32>),
    /// 64-bit integers, row-major.
    I64(Vec<i64>),
}

impl TensorData {
    /// Number of elements.
    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(v) => v.len(),
            TensorData::I64(v) => v.len(),
        }
    }

    /// Check if there are no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named constant tensor stored in the graph (learned parameter or
/// shape constant).
#[derive(Debug, Clone, PartialEq)]
pub struct Initializer {
    /// Tensor name referenced by node inputs.
    pub name: String,
    /// Shape.
    pub dims: Vec<usize>,
    /// Values.
    pub data: TensorData,
}

impl Initializer {
    /// Copy a float tensor's values.
    pub fn from_tensor(name: impl Into<String>, tensor: &Tensor) -> Result<Self> {
        let data: Vec<f32> = tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?;
        Ok(Self {
            name: name.into(),
            dims: tensor.dims().to_vec(),
            data: TensorData::F32(data),
        })
    }

    /// 1-D int64 constant, e.g. a squeeze axes list.
    pub fn int64s(name: impl Into<String>, values: Vec<i64>) -> Self {
        Self {
            name: name.into(),
            dims: vec![values.len()],
            data: TensorData::I64(values),
        }
    }

    /// Materialize as a tensor.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        let expected: usize = self.dims.iter().product();
        if expected != self.data.len() {
            return Err(HarnessError::ShapeMismatch(format!(
                "initializer '{}' has {} values for shape {:?}",
                self.name,
                self.data.len(),
                self.dims
            )));
        }
        let tensor = match &self.data {
            TensorData::F32(v) => Tensor::from_slice(v, self.dims.as_slice(), device)?,
            TensorData::I64(v) => Tensor::from_slice(v, self.dims.as_slice(), device)?,
        };
        Ok(tensor)
    }
}

/// Typed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// Single float.
    Float(f32),
    /// Single integer.
    Int(i64),
    /// UTF-8 string.
    String(String),
    /// Float list.
    Floats(Vec<f32>),
    /// Integer list.
    Ints(Vec<i64>),
}

/// One operator invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Node name, unique in the graph.
    pub name: String,
    /// Operator type, e.g. `Gemm`.
    pub op_type: String,
    /// Operator domain, empty for the default ONNX domain.
    pub domain: String,
    /// Input value names. An empty name marks an omitted optional input.
    pub inputs: Vec<String>,
    /// Output value names.
    pub outputs: Vec<String>,
    /// Attributes in declaration order.
    pub attributes: Vec<(String, AttributeValue)>,
}

impl Node {
    /// Create a default-domain node.
    pub fn new(
        name: impl Into<String>,
        op_type: impl Into<String>,
        inputs: &[&str],
        outputs: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            op_type: op_type.into(),
            domain: String::new(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            attributes: Vec::new(),
        }
    }

    /// Set the operator domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Append an attribute.
    pub fn with_attr(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.push((name.into(), value));
        self
    }

    /// Look up an attribute.
    pub fn attr(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// Mapping from tensor name to the axes that stay variable-size.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicAxes {
    axes: BTreeMap<String, BTreeMap<usize, String>>,
}

impl DynamicAxes {
    /// Empty mapping (every axis fixed).
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `axis` of `tensor` as dynamic under `symbol`.
    pub fn axis(
        mut self,
        tensor: impl Into<String>,
        axis: usize,
        symbol: impl Into<String>,
    ) -> Self {
        self.axes
            .entry(tensor.into())
            .or_default()
            .insert(axis, symbol.into());
        self
    }

    /// Dynamic axes of one tensor.
    pub fn get(&self, tensor: &str) -> Option<&BTreeMap<usize, String>> {
        self.axes.get(tensor)
    }

    /// All entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeMap<usize, String>)> {
        self.axes.iter()
    }

    /// Check if no axis is declared.
    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }
}

/// A complete graph: nodes in evaluation order, parameters and interface.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphDescription {
    /// Graph name.
    pub name: String,
    /// Nodes in topological order.
    pub nodes: Vec<Node>,
    /// Constant tensors.
    pub initializers: Vec<Initializer>,
    /// Graph inputs.
    pub inputs: Vec<ValueSpec>,
    /// Graph outputs.
    pub outputs: Vec<ValueSpec>,
}

impl GraphDescription {
    /// Positional name of the `i`-th traced input.
    pub fn traced_input_name(i: usize) -> String {
        format!("input_{i}")
    }

    /// Positional name of the `i`-th traced output.
    pub fn traced_output_name(i: usize) -> String {
        format!("output_{i}")
    }

    /// Start a traced graph whose interface mirrors the traced tensors.
    pub fn traced(name: impl Into<String>, inputs: &[Tensor], outputs: &[Tensor]) -> Result<Self> {
        let inputs = inputs
            .iter()
            .enumerate()
            .map(|(i, t)| ValueSpec::traced(Self::traced_input_name(i), t))
            .collect::<Result<Vec<_>>>()?;
        let outputs = outputs
            .iter()
            .enumerate()
            .map(|(i, t)| ValueSpec::traced(Self::traced_output_name(i), t))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: name.into(),
            nodes: Vec::new(),
            initializers: Vec::new(),
            inputs,
            outputs,
        })
    }

    /// Total number of stored parameter values.
    pub fn parameter_count(&self) -> usize {
        self.initializers.iter().map(|i| i.data.len()).sum()
    }

    /// Operator domains used by the nodes, in first-use order.
    pub fn domains(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.nodes
            .iter()
            .map(|n| n.domain.as_str())
            .filter(|d| seen.insert(*d))
            .collect()
    }

    /// Rename graph inputs, in order, everywhere they are referenced.
    pub fn rename_inputs(&mut self, names: &[&str]) -> Result<()> {
        let old: Vec<String> = self.inputs.iter().map(|v| v.name.clone()).collect();
        self.rename_values(&old, names, "input")?;
        for (spec, name) in self.inputs.iter_mut().zip(names) {
            spec.name = name.to_string();
        }
        Ok(())
    }

    /// Rename graph outputs, in order, everywhere they are referenced.
    pub fn rename_outputs(&mut self, names: &[&str]) -> Result<()> {
        let old: Vec<String> = self.outputs.iter().map(|v| v.name.clone()).collect();
        self.rename_values(&old, names, "output")?;
        for (spec, name) in self.outputs.iter_mut().zip(names) {
            spec.name = name.to_string();
        }
        Ok(())
    }

    fn rename_values(&mut self, old: &[String], new: &[&str], kind: &str) -> Result<()> {
        if old.len() != new.len() {
            return Err(HarnessError::Declaration(format!(
                "{} {kind} names given for a graph with {} {kind}s",
                new.len(),
                old.len()
            )));
        }
        let unique: HashSet<&str> = new.iter().copied().collect();
        if unique.len() != new.len() || new.iter().any(|n| n.is_empty()) {
            return Err(HarnessError::Declaration(format!(
                "{kind} names must be unique and non-empty: {new:?}"
            )));
        }
        let taken: HashSet<&str> = self
            .nodes
            .iter()
            .flat_map(|n| n.outputs.iter().chain(n.inputs.iter()))
            .chain(self.initializers.iter().map(|i| &i.name))
            .map(|s| s.as_str())
            .filter(|s| !old.iter().any(|o| o == s))
            .collect();
        if let Some(clash) = new.iter().find(|n| taken.contains(**n)) {
            return Err(HarnessError::Declaration(format!(
                "{kind} name '{clash}' collides with an internal value"
            )));
        }

        let mapping: BTreeMap<&str, &str> = old
            .iter()
            .map(|s| s.as_str())
            .zip(new.iter().copied())
            .collect();
        for node in &mut self.nodes {
            for value in node.inputs.iter_mut().chain(node.outputs.iter_mut()) {
                if let Some(renamed) = mapping.get(value.as_str()) {
                    *value = renamed.to_string();
                }
            }
        }
        Ok(())
    }

    /// Mark declared axes of inputs and outputs as dynamic.
    ///
    /// Every tensor named in `axes` must be a graph input or output and every
    /// axis must exist. Axes not named stay fixed at their traced size.
    pub fn apply_dynamic_axes(&mut self, axes: &DynamicAxes) -> Result<()> {
        for (tensor, tensor_axes) in axes.iter() {
            let spec = self
                .inputs
                .iter_mut()
                .chain(self.outputs.iter_mut())
                .find(|v| &v.name == tensor)
                .ok_or_else(|| {
                    HarnessError::Declaration(format!(
                        "dynamic axes declared for unknown tensor '{tensor}'"
                    ))
                })?;

            for (&axis, symbol) in tensor_axes {
                let rank = spec.dims.len();
                let dim = spec.dims.get_mut(axis).ok_or_else(|| {
                    HarnessError::Declaration(format!(
                        "axis {axis} out of range for '{tensor}' of rank {rank}"
                    ))
                })?;
                *dim = Dim::Dynamic(symbol.clone());
            }
        }
        Ok(())
    }
}
