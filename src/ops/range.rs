use std::str::FromStr;

use log::debug;
use num_traits::ToPrimitive;

use super::attributes::extract_string_attribute;
use super::registry::LoweringContext;
use crate::edsl::{DataType, Tensor};
use crate::error::{Error, Result};

/// Longest sequence a Range layer may materialise as a constant
pub const MAX_RANGE_LEN: usize = 1 << 24;

/// Number of elements of `range(start, stop, step)`, zero when the step
/// points away from `stop`.
pub fn range_len(start: i64, stop: i64, step: i64) -> Result<usize> {
    if step == 0 {
        return Err(Error::InvalidArgument("Range requires non-zero step value".to_string()));
    }
    let (span, step) = (i128::from(stop) - i128::from(start), i128::from(step));
    let count = if span == 0 || (span > 0) != (step > 0) {
        0
    } else {
        (span.abs() + step.abs() - 1) / step.abs()
    };
    match usize::try_from(count) {
        Ok(len) if len <= MAX_RANGE_LEN => Ok(len),
        _ => Err(Error::InvalidArgument(format!(
            "Range({}, {}, {}) has {} elements, more than the limit of {}",
            start, stop, step, count, MAX_RANGE_LEN
        ))),
    }
}

/// Arithmetic sequence `start, start + step, ...` stopping before `stop`.
pub fn range_values(start: i64, stop: i64, step: i64) -> Result<Vec<i64>> {
    let len = range_len(start, stop, step)?;
    let mut values = Vec::new();
    values.try_reserve_exact(len).map_err(|e| {
        Error::InvalidArgument(format!("cannot allocate {} Range elements: {}", len, e))
    })?;
    // i * step may leave i64 even though every element lies in [start, stop)
    let (start, step) = (i128::from(start), i128::from(step));
    values.extend((0..len as i128).map(|i| (start + i * step) as i64));
    Ok(values)
}

fn scalar_operand(ctx: &LoweringContext<'_>, index: usize) -> Result<i64> {
    let constant = ctx.constant_operand(index)?;
    let value = match constant.values.as_slice() {
        [value] => *value,
        values => {
            return Err(Error::ShapeMismatch(format!(
                "Range operand {} must be a scalar, got {:?} with {} elements",
                index,
                constant.dims,
                values.len()
            )))
        }
    };
    if value.fract() != 0.0 {
        return Err(Error::UnsupportedType(format!(
            "Range operand {} must be an integer, got {}",
            index, value
        )));
    }
    value.to_i64().ok_or_else(|| {
        Error::InvalidArgument(format!("Range operand {} is out of the i64 range", index))
    })
}

/// Lowers `Range(start, stop, step)` into a constant; only i64 output is
/// supported.
pub fn lower_range(ctx: &LoweringContext<'_>) -> Result<Vec<Tensor>> {
    let type_name = extract_string_attribute(ctx.layer, "output_type", "i64")?;
    let dtype = DataType::from_str(&type_name)
        .map_err(|_| Error::UnsupportedType(format!("Unknown Range output type {}", type_name)))?;
    if dtype != DataType::I64 {
        return Err(Error::UnsupportedType(format!(
            "Range currently only supports i64 output, got {}",
            dtype
        )));
    }
    ctx.expect_operands(3)?;

    let start = scalar_operand(ctx, 0)?;
    let stop = scalar_operand(ctx, 1)?;
    let step = scalar_operand(ctx, 2)?;
    let values = range_values(start, stop, step)?;
    debug!(
        "{}: range({}, {}, {}) has {} elements",
        ctx.layer.name,
        start,
        stop,
        step,
        values.len()
    );

    let len = values.len();
    let data = values.into_iter().map(|v| v as f64).collect();
    Ok(vec![ctx.edsl.constant(dtype, &[len], data)?])
}
