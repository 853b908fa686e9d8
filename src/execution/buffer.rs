//! Little-endian device buffer codec.
//!
//! The runtime carries every element as `f64`; buffers hold the element type
//! of their port, `f16` going through the `half` crate.

use half::f16;
use ndarray::{ArrayD, IxDyn};

use crate::edsl::DataType;
use crate::error::{Error, Result};

/// Round `value` to what `dtype` can hold: integers truncate toward zero and
/// saturate, floats lose precision, bools become 0 or 1.
pub fn round_to(value: f64, dtype: DataType) -> f64 {
    match dtype {
        DataType::F16 => f16::from_f64(value).to_f64(),
        DataType::F32 => value as f32 as f64,
        DataType::F64 => value,
        DataType::I8 => value as i8 as f64,
        DataType::I16 => value as i16 as f64,
        DataType::I32 => value as i32 as f64,
        DataType::I64 => value as i64 as f64,
        DataType::U8 => value as u8 as f64,
        DataType::U16 => value as u16 as f64,
        DataType::Bool => {
            if value != 0.0 {
                1.0
            } else {
                0.0
            }
        }
    }
}

fn check_size(len: usize, shape: &[usize], dtype: DataType) -> Result<()> {
    let expected = dtype.buffer_len(shape)?;
    if len != expected {
        return Err(Error::Execution(format!(
            "buffer size mismatch. Expected {} bytes for {} {:?} but got {}",
            expected, dtype, shape, len
        )));
    }
    Ok(())
}

/// Decode a buffer of `dtype` elements into an array of `shape`.
pub fn decode(data: &[u8], shape: &[usize], dtype: DataType) -> Result<ArrayD<f64>> {
    check_size(data.len(), shape, dtype)?;
    let width = dtype.size_in_bytes();
    let values = data
        .chunks_exact(width)
        .map(|chunk| match dtype {
            DataType::F16 => f16::from_le_bytes([chunk[0], chunk[1]]).to_f64(),
            DataType::F32 => f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64,
            DataType::F64 => f64::from_le_bytes([
                chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
            ]),
            DataType::I8 => i8::from_le_bytes([chunk[0]]) as f64,
            DataType::I16 => i16::from_le_bytes([chunk[0], chunk[1]]) as f64,
            DataType::I32 => i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64,
            DataType::I64 => i64::from_le_bytes([
                chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
            ]) as f64,
            DataType::U8 => chunk[0] as f64,
            DataType::U16 => u16::from_le_bytes([chunk[0], chunk[1]]) as f64,
            DataType::Bool => (chunk[0] != 0) as u8 as f64,
        })
        .collect();
    Ok(ArrayD::from_shape_vec(IxDyn(shape), values)?)
}

/// Encode `array` into `out` as `dtype` elements in logical order.
pub fn encode(array: &ArrayD<f64>, dtype: DataType, out: &mut [u8]) -> Result<()> {
    check_size(out.len(), array.shape(), dtype)?;
    let width = dtype.size_in_bytes();
    for (chunk, &value) in out.chunks_exact_mut(width).zip(array.iter()) {
        match dtype {
            DataType::F16 => chunk.copy_from_slice(&f16::from_f64(value).to_le_bytes()),
            DataType::F32 => chunk.copy_from_slice(&(value as f32).to_le_bytes()),
            DataType::F64 => chunk.copy_from_slice(&value.to_le_bytes()),
            DataType::I8 => chunk.copy_from_slice(&(value as i8).to_le_bytes()),
            DataType::I16 => chunk.copy_from_slice(&(value as i16).to_le_bytes()),
            DataType::I32 => chunk.copy_from_slice(&(value as i32).to_le_bytes()),
            DataType::I64 => chunk.copy_from_slice(&(value as i64).to_le_bytes()),
            DataType::U8 => chunk[0] = value as u8,
            DataType::U16 => chunk.copy_from_slice(&(value as u16).to_le_bytes()),
            DataType::Bool => chunk[0] = (value != 0.0) as u8,
        }
    }
    Ok(())
}

/// Encode a slice of `f32` values, for filling host or device buffers.
pub fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a little-endian `f32` buffer.
pub fn f32_values(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
