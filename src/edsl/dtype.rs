use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{Error, Result};

/// Element types understood by the tensor program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    F16,
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    Bool,
}

impl DataType {
    /// Get the size in bytes
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DataType::F16 => 2,
            DataType::F32 => 4,
            DataType::F64 => 8,
            DataType::I8 => 1,
            DataType::I16 => 2,
            DataType::I32 => 4,
            DataType::I64 => 8,
            DataType::U8 => 1,
            DataType::U16 => 2,
            DataType::Bool => 1,
        }
    }

    /// Bytes needed for a dense buffer of `dims`; overflow is a shape error.
    pub fn buffer_len(&self, dims: &[usize]) -> Result<usize> {
        dims.iter()
            .try_fold(self.size_in_bytes(), |len, &d| len.checked_mul(d))
            .ok_or_else(|| {
                Error::ShapeMismatch(format!("{} buffer of shape {:?} overflows usize", self, dims))
            })
    }

    pub fn is_floating_point(&self) -> bool {
        matches!(self, DataType::F16 | DataType::F32 | DataType::F64)
    }

    pub fn is_signed_integer(&self) -> bool {
        matches!(self, DataType::I8 | DataType::I16 | DataType::I32 | DataType::I64)
    }

    pub fn is_unsigned_integer(&self) -> bool {
        matches!(self, DataType::U8 | DataType::U16)
    }

    pub fn is_integer(&self) -> bool {
        self.is_signed_integer() || self.is_unsigned_integer()
    }

    /// Result type of a binary elementwise op: floats win over integers,
    /// otherwise the wider type wins.
    pub fn promote(self, other: DataType) -> DataType {
        if self == other {
            return self;
        }
        match (self.is_floating_point(), other.is_floating_point()) {
            (true, false) => self,
            (false, true) => other,
            _ => {
                if other.size_in_bytes() > self.size_in_bytes() {
                    other
                } else {
                    self
                }
            }
        }
    }
}
