//! Conversion between [`GraphDescription`] and ONNX protobuf messages.

use super::proto::{
    tensor_shape_proto::{dimension, Dimension},
    type_proto, AttributeProto, AttributeType, DataType, GraphProto, ModelProto, NodeProto,
    OperatorSetIdProto, TensorProto, TensorShapeProto, TypeProto, ValueInfoProto,
};
use super::{
    AttributeValue, Dim, ElemType, GraphDescription, Initializer, Node, TensorData, ValueSpec,
};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use std::collections::BTreeMap;

/// The default ONNX operator domain.
pub const DEFAULT_DOMAIN: &str = "";

/// The ONNX-ML operator domain (`Scaler`, `LinearRegressor`, ..).
pub const ML_DOMAIN: &str = "ai.onnx.ml";

/// Opset version of [`ML_DOMAIN`] paired with default-domain opset 13.
pub const ML_OPSET_VERSION: i64 = 1;

/// Format versions and producer stamp of an exported artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportTarget {
    /// Default-domain opset version.
    pub opset_version: i64,
    /// ONNX IR version.
    pub ir_version: i64,
    /// Producer name.
    pub producer_name: String,
    /// Producer version.
    pub producer_version: String,
}

impl ExportTarget {
    /// Target derived from the harness configuration.
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            opset_version: config.opset_version,
            ir_version: config.ir_version,
            producer_name: config.producer_name.clone(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Opset version imported for `domain`.
    pub fn opset_for(&self, domain: &str) -> i64 {
        if domain == ML_DOMAIN {
            ML_OPSET_VERSION
        } else {
            self.opset_version
        }
    }
}

impl Default for ExportTarget {
    fn default() -> Self {
        Self::from_config(&HarnessConfig::default())
    }
}

/// Serialize a graph description into a model proto.
pub fn encode_model(graph: &GraphDescription, target: &ExportTarget) -> ModelProto {
    let mut domains = graph.domains();
    if !domains.contains(&DEFAULT_DOMAIN) {
        domains.insert(0, DEFAULT_DOMAIN);
    }
    let opset_import = domains
        .into_iter()
        .map(|domain| OperatorSetIdProto {
            domain: domain.to_string(),
            version: target.opset_for(domain),
        })
        .collect();

    ModelProto {
        ir_version: target.ir_version,
        opset_import,
        producer_name: target.producer_name.clone(),
        producer_version: target.producer_version.clone(),
        graph: Some(GraphProto {
            node: graph.nodes.iter().map(encode_node).collect(),
            name: graph.name.clone(),
            initializer: graph.initializers.iter().map(encode_initializer).collect(),
            input: graph.inputs.iter().map(encode_value).collect(),
            output: graph.outputs.iter().map(encode_value).collect(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn encode_node(node: &Node) -> NodeProto {
    NodeProto {
        input: node.inputs.clone(),
        output: node.outputs.clone(),
        name: node.name.clone(),
        op_type: node.op_type.clone(),
        domain: node.domain.clone(),
        attribute: node
            .attributes
            .iter()
            .map(|(name, value)| encode_attribute(name, value))
            .collect(),
        ..Default::default()
    }
}

fn encode_attribute(name: &str, value: &AttributeValue) -> AttributeProto {
    let mut attr = AttributeProto {
        name: name.to_string(),
        ..Default::default()
    };
    match value {
        AttributeValue::Float(f) => {
            attr.set_type(AttributeType::Float);
            attr.f = *f;
        }
        AttributeValue::Int(i) => {
            attr.set_type(AttributeType::Int);
            attr.i = *i;
        }
        AttributeValue::String(s) => {
            attr.set_type(AttributeType::String);
            attr.s = s.as_bytes().to_vec();
        }
        AttributeValue::Floats(v) => {
            attr.set_type(AttributeType::Floats);
            attr.floats = v.clone();
        }
        AttributeValue::Ints(v) => {
            attr.set_type(AttributeType::Ints);
            attr.ints = v.clone();
        }
    }
    attr
}

fn encode_initializer(init: &Initializer) -> TensorProto {
    let dims = init.dims.iter().map(|&d| d as i64).collect();
    // Parameters are stored as little-endian raw_data, as torch exports do.
    let (data_type, raw_data) = match &init.data {
        TensorData::F32(v) => (
            DataType::Float,
            v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        ),
        TensorData::I64(v) => (
            DataType::Int64,
            v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        ),
    };
    TensorProto {
        dims,
        data_type: data_type as i32,
        name: init.name.clone(),
        raw_data,
        ..Default::default()
    }
}

fn encode_value(spec: &ValueSpec) -> ValueInfoProto {
    let elem_type = match spec.elem_type {
        ElemType::F32 => DataType::Float,
        ElemType::I64 => DataType::Int64,
    };
    let dim = spec
        .dims
        .iter()
        .map(|d| Dimension {
            value: Some(match d {
                Dim::Fixed(size) => dimension::Value::DimValue(*size as i64),
                Dim::Dynamic(name) => dimension::Value::DimParam(name.clone()),
            }),
            ..Default::default()
        })
        .collect();

    ValueInfoProto {
        name: spec.name.clone(),
        r#type: Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type: elem_type as i32,
                shape: Some(TensorShapeProto { dim }),
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Recover a graph description and its opset imports from a model proto.
pub fn decode_model(model: &ModelProto) -> Result<(GraphDescription, BTreeMap<String, i64>)> {
    let graph = model
        .graph
        .as_ref()
        .ok_or_else(|| HarnessError::Runtime("model has no graph".to_string()))?;

    let opsets = model
        .opset_import
        .iter()
        .map(|o| (o.domain.clone(), o.version))
        .collect();

    let nodes = graph
        .node
        .iter()
        .map(decode_node)
        .collect::<Result<Vec<_>>>()?;
    let initializers = graph
        .initializer
        .iter()
        .map(decode_initializer)
        .collect::<Result<Vec<_>>>()?;

    // Initializers may also be listed as graph inputs by older exporters.
    let is_param = |name: &str| initializers.iter().any(|i: &Initializer| i.name == name);
    let inputs = graph
        .input
        .iter()
        .filter(|v| !is_param(&v.name))
        .map(decode_value)
        .collect::<Result<Vec<_>>>()?;
    let outputs = graph
        .output
        .iter()
        .map(decode_value)
        .collect::<Result<Vec<_>>>()?;

    Ok((
        GraphDescription {
            name: graph.name.clone(),
            nodes,
            initializers,
            inputs,
            outputs,
        },
        opsets,
    ))
}

fn decode_node(node: &NodeProto) -> Result<Node> {
    let attributes = node
        .attribute
        .iter()
        .map(|a| Ok((a.name.clone(), decode_attribute(node, a)?)))
        .collect::<Result<Vec<_>>>()?;
    Ok(Node {
        name: node.name.clone(),
        op_type: node.op_type.clone(),
        domain: node.domain.clone(),
        inputs: node.input.clone(),
        outputs: node.output.clone(),
        attributes,
    })
}

fn decode_attribute(node: &NodeProto, attr: &AttributeProto) -> Result<AttributeValue> {
    let value = match attr.r#type() {
        AttributeType::Float => AttributeValue::Float(attr.f),
        AttributeType::Int => AttributeValue::Int(attr.i),
        AttributeType::String => AttributeValue::String(
            String::from_utf8(attr.s.clone())
                .map_err(|e| HarnessError::Runtime(format!("attribute '{}': {e}", attr.name)))?,
        ),
        AttributeType::Floats => AttributeValue::Floats(attr.floats.clone()),
        AttributeType::Ints => AttributeValue::Ints(attr.ints.clone()),
        _ => {
            return Err(HarnessError::UnsupportedAttribute {
                op: node.op_type.clone(),
                attribute: attr.name.clone(),
            })
        }
    };
    Ok(value)
}

fn decode_initializer(tensor: &TensorProto) -> Result<Initializer> {
    let dims = tensor
        .dims
        .iter()
        .map(|&d| {
            usize::try_from(d).map_err(|_| {
                HarnessError::ShapeMismatch(format!("initializer '{}' dim {d}", tensor.name))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let data = match DataType::try_from(tensor.data_type) {
        Ok(DataType::Float) if !tensor.raw_data.is_empty() => TensorData::F32(
            tensor
                .raw_data
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        ),
        Ok(DataType::Float) => TensorData::F32(tensor.float_data.clone()),
        Ok(DataType::Int64) if !tensor.raw_data.is_empty() => TensorData::I64(
            tensor
                .raw_data
                .chunks_exact(8)
                .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect(),
        ),
        Ok(DataType::Int64) => TensorData::I64(tensor.int64_data.clone()),
        _ => {
            return Err(HarnessError::Runtime(format!(
                "initializer '{}' has unsupported data type {}",
                tensor.name, tensor.data_type
            )))
        }
    };

    Ok(Initializer {
        name: tensor.name.clone(),
        dims,
        data,
    })
}

fn decode_value(info: &ValueInfoProto) -> Result<ValueSpec> {
    let tensor_type = match info.r#type.as_ref().and_then(|t| t.value.as_ref()) {
        Some(type_proto::Value::TensorType(t)) => t,
        None => {
            return Err(HarnessError::Runtime(format!(
                "value '{}' is not a tensor",
                info.name
            )))
        }
    };
    let elem_type = match DataType::try_from(tensor_type.elem_type) {
        Ok(DataType::Float) => ElemType::F32,
        Ok(DataType::Int64) => ElemType::I64,
        _ => {
            return Err(HarnessError::Runtime(format!(
                "value '{}' has unsupported element type {}",
                info.name, tensor_type.elem_type
            )))
        }
    };

    let dims = tensor_type
        .shape
        .iter()
        .flat_map(|s| s.dim.iter())
        .enumerate()
        .map(|(axis, d)| match &d.value {
            Some(dimension::Value::DimValue(v)) if *v >= 0 => Ok(Dim::Fixed(*v as usize)),
            Some(dimension::Value::DimParam(p)) => Ok(Dim::Dynamic(p.clone())),
            // Anonymous dynamic axes get a positional symbol.
            None => Ok(Dim::Dynamic(format!("{}_dim{axis}", info.name))),
            Some(dimension::Value::DimValue(v)) => Err(HarnessError::ShapeMismatch(format!(
                "value '{}' has negative dim {v}",
                info.name
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ValueSpec {
        name: info.name.clone(),
        elem_type,
        dims,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DynamicAxes;
    use candle_core::{DType, Device, Tensor};
    use prost::Message;

    fn sample_graph() -> GraphDescription {
        let x = Tensor::zeros((2, 3), DType::F32, &Device::Cpu).unwrap();
        let y = Tensor::zeros((2, 2), DType::F32, &Device::Cpu).unwrap();
        let w = Tensor::new(&[[0.5f32, -1.0, 2.0], [1.5, 0.25, -0.75]], &Device::Cpu).unwrap();

        let mut graph = GraphDescription::traced("g", &[x], &[y]).unwrap();
        graph.initializers.push(Initializer::from_tensor("w", &w).unwrap());
        graph.initializers.push(Initializer::int64s("axes", vec![1, -2]));
        graph.nodes.push(
            Node::new("/Gemm", "Gemm", &["input_0", "w"], &["output_0"])
                .with_attr("transB", AttributeValue::Int(1))
                .with_attr("alpha", AttributeValue::Float(1.0)),
        );
        graph.rename_inputs(&["data_input"]).unwrap();
        graph.rename_outputs(&["preds"]).unwrap();
        graph
            .apply_dynamic_axes(&DynamicAxes::new().axis("data_input", 0, "batch_size"))
            .unwrap();
        graph
    }

    #[test]
    fn encode_stamps_versions() {
        let model = encode_model(&sample_graph(), &ExportTarget::default());
        assert_eq!(model.ir_version, 7);
        assert_eq!(model.opset_import.len(), 1);
        assert_eq!(model.opset_import[0].domain, "");
        assert_eq!(model.opset_import[0].version, 13);
    }

    #[test]
    fn ml_domain_imported() {
        let mut graph = sample_graph();
        graph.nodes.push(
            Node::new("Scaler", "Scaler", &["preds"], &["y"]).with_domain(ML_DOMAIN),
        );
        let model = encode_model(&graph, &ExportTarget::default());
        let ml = model
            .opset_import
            .iter()
            .find(|o| o.domain == ML_DOMAIN)
            .unwrap();
        assert_eq!(ml.version, ML_OPSET_VERSION);
    }

    #[test]
    fn bytes_decode_to_same_description() {
        let graph = sample_graph();
        let bytes = encode_model(&graph, &ExportTarget::default()).encode_to_vec();

        let proto = ModelProto::decode(bytes.as_slice()).unwrap();
        let (decoded, opsets) = decode_model(&proto).unwrap();

        assert_eq!(decoded, graph);
        assert_eq!(opsets.get(""), Some(&13));
    }

    #[test]
    fn dynamic_dim_written_as_param() {
        let model = encode_model(&sample_graph(), &ExportTarget::default());
        let input = &model.graph.as_ref().unwrap().input[0];
        let Some(type_proto::Value::TensorType(t)) = input.r#type.as_ref().unwrap().value.as_ref()
        else {
            panic!("expected tensor type");
        };
        let dims = &t.shape.as_ref().unwrap().dim;
        assert_eq!(
            dims[0].value,
            Some(dimension::Value::DimParam("batch_size".into()))
        );
        assert_eq!(dims[1].value, Some(dimension::Value::DimValue(3)));
    }

    #[test]
    fn float_data_fallback_decoded() {
        let tensor = TensorProto {
            dims: vec![2],
            data_type: DataType::Float as i32,
            float_data: vec![1.0, 2.0],
            name: "b".into(),
            ..Default::default()
        };
        let init = decode_initializer(&tensor).unwrap();
        assert_eq!(init.data, TensorData::F32(vec![1.0, 2.0]));
    }

    #[test]
    fn missing_graph_rejected() {
        let model = ModelProto::default();
        assert!(decode_model(&model).is_err());
    }
}
