//! # Deformable Convolution Lowering
//!
//! Expresses an offset-sampled convolution of any spatial rank `R` with
//! plain tensor primitives:
//!
//! 1. [`grid`]: base coordinate of every filter tap at every output position,
//!    `{1, 1, OFF_0*F_0, .., OFF_{R-1}*F_{R-1}, R}`.
//! 2. [`offset`]: packed offsets unpacked to the same layout per input channel.
//! 3. [`sampling`]: grid plus offsets, split into floor and ceil per axis, the
//!    `2^R` corner gathers and their multi-linear blend.
//! 4. A valid convolution over the sampled tensor whose strides equal the
//!    filter extents, so every window covers exactly the taps of one output
//!    position.
//!
//! All shape checks run before the first node is built.

pub mod grid;
pub mod offset;
pub mod sampling;

use log::{debug, trace};

use super::attributes::extract_int_attribute;
use super::convolution::ConvolutionParams;
use super::registry::LoweringContext;
use crate::edsl::{ConvolutionAttrs, Tensor, TensorDim};
use crate::error::{Error, Result};
use crate::model::Layer;

pub use grid::build_index_grid;
pub use offset::reshape_offset;
pub use sampling::{interpolate, resolve_coordinates, AxisCoordinates};

/// Attributes of one deformable convolution layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeformableConvolutionParams {
    /// Must be 1; grouped deformable convolution is not lowered
    pub group: usize,
    /// Number of channel groups sharing one set of offsets
    pub deformable_group: usize,
    pub window: ConvolutionParams,
}

impl DeformableConvolutionParams {
    pub fn from_layer(layer: &Layer, spatial_rank: usize) -> Result<Self> {
        let positive = |name: &str| -> Result<usize> {
            let value = extract_int_attribute(layer, name, 1)?;
            usize::try_from(value).ok().filter(|&v| v > 0).ok_or_else(|| {
                Error::UnsupportedAttribute(format!(
                    "{}: {} must be positive, got {}",
                    layer.name, name, value
                ))
            })
        };
        Ok(Self {
            group: positive("group")?,
            deformable_group: positive("deformable_group")?,
            window: ConvolutionParams::from_layer(layer, spatial_rank)?,
        })
    }
}

/// Lowers `DeformableConvolution(input, offset, filter)`.
pub fn lower_deformable_convolution(ctx: &LoweringContext<'_>) -> Result<Vec<Tensor>> {
    ctx.expect_operands(3)?;
    let input = ctx.operand(0)?;
    let offset = ctx.operand(1)?;
    let filter = ctx.operand(2)?;
    if input.rank() < 3 {
        return Err(Error::ShapeMismatch(format!(
            "{}: deformable convolution needs an input of rank >= 3, got {:?}",
            ctx.layer.name,
            input.shape()
        )));
    }
    let params = DeformableConvolutionParams::from_layer(ctx.layer, input.rank() - 2)?;
    debug!(
        "{}: deformable convolution input {:?}, offset {:?}, filter {:?}, deformable groups {}",
        ctx.layer.name,
        input.shape(),
        offset.shape(),
        filter.shape(),
        params.deformable_group
    );
    Ok(vec![deformable_convolution(input, offset, filter, &params)?])
}

fn check_divisible(what: &str, count: usize, groups: usize) -> Result<()> {
    if !count.is_multiple_of(groups) {
        return Err(Error::ShapeMismatch(format!(
            "{} ({}) must be a multiple of {}",
            what, count, groups
        )));
    }
    Ok(())
}

/// Validate the operands and return the pads of every spatial axis.
fn validate(
    input: &Tensor,
    offset: &Tensor,
    filter: &Tensor,
    params: &DeformableConvolutionParams,
) -> Result<Vec<TensorDim>> {
    if params.deformable_group == 0 {
        return Err(Error::UnsupportedAttribute("deformable_group must be positive".to_string()));
    }
    if params.group != 1 {
        return Err(Error::UnsupportedAttribute(format!(
            "deformable convolution with group {} is not supported, only group 1",
            params.group
        )));
    }
    let rank = input.rank();
    if rank < 3 {
        return Err(Error::ShapeMismatch(format!(
            "deformable convolution needs an input of rank >= 3, got {:?}",
            input.shape()
        )));
    }
    if offset.rank() != rank || filter.rank() != rank {
        return Err(Error::ShapeMismatch(format!(
            "input {:?}, offset {:?} and filter {:?} must have the same rank",
            input.shape(),
            offset.shape(),
            filter.shape()
        )));
    }

    let spatial_rank = rank - 2;
    let window = &params.window;
    if [&window.strides, &window.dilations, &window.pads_begin, &window.pads_end]
        .iter()
        .any(|values| values.len() != spatial_rank)
    {
        return Err(Error::ShapeMismatch(format!(
            "window attributes {:?} do not match {} spatial dims",
            window, spatial_rank
        )));
    }
    let batch = input.shape()[0];
    let input_channels = input.shape()[1];
    let output_channels = filter.shape()[0];
    let offset_channels = offset.shape()[1];
    let filter_spatial = &filter.shape()[2..];
    let deformable_group = params.deformable_group;

    check_divisible("input channels", input_channels, deformable_group)?;
    check_divisible("offset channels", offset_channels, deformable_group)?;
    check_divisible("input channels", input_channels, params.group)?;
    check_divisible("output channels", output_channels, params.group)?;
    if filter.shape()[1] != input_channels / params.group {
        return Err(Error::ShapeMismatch(format!(
            "filter {:?} expects {} input channels per group, input has {}",
            filter.shape(),
            filter.shape()[1],
            input_channels
        )));
    }

    let expected_offset_channels =
        spatial_rank * deformable_group * filter_spatial.iter().product::<usize>();
    if offset_channels != expected_offset_channels {
        return Err(Error::ShapeMismatch(format!(
            "offset has {} channels, expected {} ({} axes x {} deformable groups x filter {:?})",
            offset_channels,
            expected_offset_channels,
            spatial_rank,
            deformable_group,
            filter_spatial
        )));
    }
    if offset.shape()[0] != batch {
        return Err(Error::ShapeMismatch(format!(
            "offset batch {} does not match input batch {}",
            offset.shape()[0],
            batch
        )));
    }

    let sizes = params
        .window
        .padding_and_output_sizes(&input.shape()[2..], filter_spatial)?;
    let mut pads = Vec::with_capacity(spatial_rank);
    for (i, (pad, output)) in sizes.into_iter().enumerate() {
        let offset_extent = offset.shape()[i + 2];
        if output.as_value().is_some_and(|size| size != offset_extent as i64) {
            return Err(Error::ShapeMismatch(format!(
                "offset spatial dim {} is {}, convolution output is {}",
                i, offset_extent, output
            )));
        }
        pads.push(pad);
    }
    Ok(pads)
}

/// Deformable convolution of an NCX `input` with a KCX `filter`, sampling
/// each filter tap at its regular position shifted by `offset`.
///
/// Returns `{N, CO, OFF..}`, the output shape of the plain convolution with
/// the same window attributes.
pub fn deformable_convolution(
    input: &Tensor,
    offset: &Tensor,
    filter: &Tensor,
    params: &DeformableConvolutionParams,
) -> Result<Tensor> {
    let pads = validate(input, offset, filter, params)?;

    let filter_spatial = &filter.shape()[2..];
    let output_spatial = &offset.shape()[2..];
    let grid = build_index_grid(
        input.context(),
        output_spatial,
        filter_spatial,
        &params.window.strides,
        &params.window.dilations,
        &pads,
    )?;
    let deltas = reshape_offset(offset, params.deformable_group, filter_spatial, input.shape()[1])?;
    let coords = resolve_coordinates(&deltas, &grid)?;
    let sampled = interpolate(input, &coords)?;
    trace!("sampled input {:?}, pads {:?}", sampled.shape(), pads);

    sampled.convolution(filter, ConvolutionAttrs::valid(filter_spatial.to_vec()))
}
