//! Host network description handed to the plugin by the inference engine.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::edsl::DataType;
use crate::error::{Error, Result};

/// Host blob precisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Precision {
    Fp32,
    Fp16,
    Fp64,
    Q78,
    U16,
    U8,
    I8,
    Bool,
    I16,
    I32,
    I64,
    Bin,
}

impl Precision {
    /// Element type backing this precision on the device side.
    pub fn to_data_type(&self) -> Result<DataType> {
        match self {
            Precision::Fp32 => Ok(DataType::F32),
            Precision::Fp16 => Ok(DataType::F16),
            Precision::Fp64 => Ok(DataType::F64),
            Precision::U16 => Ok(DataType::U16),
            Precision::U8 => Ok(DataType::U8),
            Precision::I8 => Ok(DataType::I8),
            Precision::Bool => Ok(DataType::Bool),
            Precision::I16 => Ok(DataType::I16),
            Precision::I32 => Ok(DataType::I32),
            Precision::I64 => Ok(DataType::I64),
            Precision::Q78 | Precision::Bin => Err(Error::UnsupportedType(format!(
                "The plugin does not support {} precision",
                self
            ))),
        }
    }

    pub fn from_data_type(dtype: DataType) -> Self {
        match dtype {
            DataType::F16 => Precision::Fp16,
            DataType::F32 => Precision::Fp32,
            DataType::F64 => Precision::Fp64,
            DataType::I8 => Precision::I8,
            DataType::I16 => Precision::I16,
            DataType::I32 => Precision::I32,
            DataType::I64 => Precision::I64,
            DataType::U8 => Precision::U8,
            DataType::U16 => Precision::U16,
            DataType::Bool => Precision::Bool,
        }
    }
}

/// Precision and dims of a host buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDesc {
    pub precision: Precision,
    pub dims: Vec<usize>,
}

impl TensorDesc {
    pub fn new(precision: Precision, dims: &[usize]) -> Self {
        Self {
            precision,
            dims: dims.to_vec(),
        }
    }

    pub fn numel(&self) -> Result<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |n, &d| n.checked_mul(d))
            .ok_or_else(|| {
                Error::ShapeMismatch(format!(
                    "{} tensor {:?} is too large",
                    self.precision, self.dims
                ))
            })
    }

    /// Size of a host buffer holding this tensor.
    pub fn byte_len(&self) -> Result<usize> {
        self.precision.to_data_type()?.buffer_len(&self.dims)
    }
}

/// Constant data attached to the network (weights, range bounds, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantTensor {
    pub dtype: DataType,
    pub dims: Vec<usize>,
    pub values: Vec<f64>,
}

impl ConstantTensor {
    pub fn new(dtype: DataType, dims: &[usize], values: Vec<f64>) -> Self {
        Self {
            dtype,
            dims: dims.to_vec(),
            values,
        }
    }

    /// Rank-0 i64 constant.
    pub fn scalar_i64(value: i64) -> Self {
        Self::new(DataType::I64, &[], vec![value as f64])
    }
}

/// Layer attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Attribute {
    Int(i64),
    Float(f64),
    String(String),
    Ints(Vec<i64>),
}

/// One operator instance in the host network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub op_type: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub attributes: HashMap<String, Attribute>,
}

impl Layer {
    pub fn new(name: &str, op_type: &str, inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            op_type: op_type.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: Attribute) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }
}

/// Network input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputInfo {
    pub name: String,
    pub desc: TensorDesc,
}

/// Host network: inputs, constants, layers and the names of its outputs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub inputs: Vec<InputInfo>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub constants: HashMap<String, ConstantTensor>,
    pub layers: Vec<Layer>,
}

impl Network {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn add_input(&mut self, name: &str, desc: TensorDesc) -> &mut Self {
        self.inputs.push(InputInfo {
            name: name.to_string(),
            desc,
        });
        self
    }

    pub fn add_constant(&mut self, name: &str, constant: ConstantTensor) -> &mut Self {
        self.constants.insert(name.to_string(), constant);
        self
    }

    pub fn add_layer(&mut self, layer: Layer) -> &mut Self {
        self.layers.push(layer);
        self
    }

    pub fn add_output(&mut self, name: &str) -> &mut Self {
        self.outputs.push(name.to_string());
        self
    }

    /// Parse a network description from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
