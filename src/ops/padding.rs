//! Auto-padding policies and the padding / output-size computation shared by
//! the convolution-family lowerings.

use strum_macros::{Display, EnumString};

use crate::edsl::TensorDim;
use crate::error::{Error, Result};

/// Auto-padding modes
///
/// - `Explicit`: use the `pads_begin` / `pads_end` attributes
/// - `Valid`: no padding (may reduce output size)
/// - `SameUpper`: pad so that output = ceil(input / stride), extra padding at the end
/// - `SameLower`: same as `SameUpper` with the extra padding at the beginning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AutoPadMode {
    #[strum(serialize = "explicit", serialize = "notset")]
    Explicit,
    Valid,
    SameUpper,
    SameLower,
}

/// Pad-before and output extent of one spatial axis.
///
/// Everything is expressed in [`TensorDim`] so that a symbolic input extent
/// yields a deferred padding instead of failing early. Known values fold, and
/// a window that does not fit a known extent is rejected.
#[allow(clippy::too_many_arguments)]
pub fn compute_padding_and_output_size(
    input_size: &TensorDim,
    filter_size: &TensorDim,
    stride: usize,
    mode: AutoPadMode,
    pad_lo: usize,
    pad_hi: usize,
    dilation: usize,
    data_dilation: usize,
) -> Result<(TensorDim, TensorDim)> {
    if stride == 0 || dilation == 0 || data_dilation == 0 {
        return Err(Error::ValidationError(format!(
            "stride, dilation and data dilation must be positive, got {}, {} and {}",
            stride, dilation, data_dilation
        )));
    }
    let stride_dim = TensorDim::from(stride);
    let dilated_input = (input_size.clone() - 1i64) * data_dilation + 1i64;
    let dilated_filter = (filter_size.clone() - 1i64) * dilation + 1i64;

    let (pad_before, output_size) = match mode {
        AutoPadMode::Explicit => {
            let padded = dilated_input + pad_lo + pad_hi;
            let output = (padded - dilated_filter.clone() + stride_dim.clone()) / stride_dim;
            (TensorDim::from(pad_lo), output)
        }
        AutoPadMode::Valid => {
            let output = (dilated_input - dilated_filter.clone() + stride_dim.clone()) / stride_dim;
            (TensorDim::value(0), output)
        }
        AutoPadMode::SameUpper | AutoPadMode::SameLower => {
            let output = (dilated_input.clone() + stride_dim.clone() - 1i64) / stride_dim.clone();
            let total = ((output.clone() - 1i64) * stride_dim + dilated_filter.clone()
                - dilated_input)
                .max(0i64);
            let pad_before = if mode == AutoPadMode::SameUpper {
                total / 2i64
            } else {
                (total + 1i64) / 2i64
            };
            (pad_before, output)
        }
    };

    if let Some(size) = output_size.as_value() {
        if size < 1 {
            return Err(Error::ShapeMismatch(format!(
                "window of {} does not fit input extent {} (padding {}/{}, stride {})",
                dilated_filter, input_size, pad_lo, pad_hi, stride
            )));
        }
    }
    Ok((pad_before, output_size))
}
