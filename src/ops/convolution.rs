//! Standard convolution lowering and the attribute set it shares with the
//! deformable variant.

use std::str::FromStr;

use log::debug;

use super::attributes::{
    ensure_params_size, extract_int_attribute, extract_string_attribute, extract_usizes_attribute,
};
use super::padding::{compute_padding_and_output_size, AutoPadMode};
use super::registry::LoweringContext;
use crate::edsl::{ConvolutionAttrs, Tensor, TensorDim};
use crate::error::{Error, Result};
use crate::model::Layer;

/// Window attributes of a convolution-family layer, one entry per spatial axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvolutionParams {
    pub strides: Vec<usize>,
    pub dilations: Vec<usize>,
    pub pads_begin: Vec<usize>,
    pub pads_end: Vec<usize>,
    pub auto_pad: AutoPadMode,
}

impl ConvolutionParams {
    /// Read `strides`, `dilations`, `pads_begin`, `pads_end` and `auto_pad`;
    /// missing trailing entries default to 1 for strides and dilations and 0
    /// for pads.
    pub fn from_layer(layer: &Layer, spatial_rank: usize) -> Result<Self> {
        let strides = ensure_params_size(
            &extract_usizes_attribute(layer, "strides", &[])?,
            spatial_rank,
            1,
        );
        let dilations = ensure_params_size(
            &extract_usizes_attribute(layer, "dilations", &[])?,
            spatial_rank,
            1,
        );
        let pads_begin = ensure_params_size(
            &extract_usizes_attribute(layer, "pads_begin", &[])?,
            spatial_rank,
            0,
        );
        let pads_end = ensure_params_size(
            &extract_usizes_attribute(layer, "pads_end", &[])?,
            spatial_rank,
            0,
        );
        let auto_pad_name = extract_string_attribute(layer, "auto_pad", "explicit")?;
        let auto_pad = AutoPadMode::from_str(&auto_pad_name).map_err(|_| {
            Error::ValidationError(format!(
                "{}: unknown auto_pad value {}",
                layer.name, auto_pad_name
            ))
        })?;

        let params = Self {
            strides,
            dilations,
            pads_begin,
            pads_end,
            auto_pad,
        };
        for (name, values) in [
            ("strides", &params.strides),
            ("dilations", &params.dilations),
            ("pads_begin", &params.pads_begin),
            ("pads_end", &params.pads_end),
        ] {
            if values.len() != spatial_rank {
                return Err(Error::ShapeMismatch(format!(
                    "{}: {} has {} entries for {} spatial dims",
                    layer.name,
                    name,
                    values.len(),
                    spatial_rank
                )));
            }
        }
        Ok(params)
    }

    /// Pad-before and output extent of every spatial axis for the given
    /// spatial input and filter extents.
    pub fn padding_and_output_sizes(
        &self,
        input_spatial: &[usize],
        filter_spatial: &[usize],
    ) -> Result<Vec<(TensorDim, TensorDim)>> {
        input_spatial
            .iter()
            .zip(filter_spatial)
            .enumerate()
            .map(|(i, (&input, &filter))| {
                compute_padding_and_output_size(
                    &TensorDim::from(input),
                    &TensorDim::from(filter),
                    self.strides[i],
                    self.auto_pad,
                    self.pads_begin[i],
                    self.pads_end[i],
                    self.dilations[i],
                    1,
                )
            })
            .collect()
    }
}

fn known(dim: &TensorDim, what: &str) -> Result<usize> {
    dim.as_value()
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| {
            Error::ShapeMismatch(format!("{} {} is not a known non-negative extent", what, dim))
        })
}

/// Lowers `Convolution(input, filter)` onto the convolution primitive.
pub fn lower_convolution(ctx: &LoweringContext<'_>) -> Result<Vec<Tensor>> {
    ctx.expect_operands(2)?;
    let input = ctx.operand(0)?;
    let filter = ctx.operand(1)?;
    if input.rank() < 3 || filter.rank() != input.rank() {
        return Err(Error::ShapeMismatch(format!(
            "{}: input {:?} and filter {:?} must share a rank of at least 3",
            ctx.layer.name,
            input.shape(),
            filter.shape()
        )));
    }
    let group = extract_int_attribute(ctx.layer, "group", 1)?;
    let group = usize::try_from(group)
        .ok()
        .filter(|&g| g > 0)
        .ok_or_else(|| {
            Error::UnsupportedAttribute(format!(
                "{}: group must be positive, got {}",
                ctx.layer.name, group
            ))
        })?;

    let spatial_rank = input.rank() - 2;
    let params = ConvolutionParams::from_layer(ctx.layer, spatial_rank)?;
    let input_spatial = &input.shape()[2..];
    let filter_spatial = &filter.shape()[2..];
    let sizes = params.padding_and_output_sizes(input_spatial, filter_spatial)?;

    let mut pads_begin = Vec::with_capacity(spatial_rank);
    let mut pads_end = Vec::with_capacity(spatial_rank);
    for (i, (pad, output)) in sizes.iter().enumerate() {
        let pad = known(pad, "padding")?;
        let output = known(output, "output size")?;
        let window = filter_spatial[i].saturating_sub(1) * params.dilations[i] + 1;
        let end = match params.auto_pad {
            AutoPadMode::Explicit => params.pads_end[i],
            _ => ((output - 1) * params.strides[i] + window).saturating_sub(input_spatial[i] + pad),
        };
        pads_begin.push(pad);
        pads_end.push(end);
    }

    debug!(
        "{}: convolution {:?} * {:?}, pads {:?}/{:?}",
        ctx.layer.name,
        input.shape(),
        filter.shape(),
        pads_begin,
        pads_end
    );
    let attrs = ConvolutionAttrs {
        strides: params.strides,
        dilations: params.dilations,
        pads_begin,
        pads_end,
        group,
    };
    Ok(vec![input.convolution(filter, attrs)?])
}
