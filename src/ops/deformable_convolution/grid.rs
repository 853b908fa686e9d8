//! Base sampling coordinates of every filter tap at every output position.

use crate::edsl::{concatenate, EdslContext, Tensor, TensorDim};
use crate::error::{Error, Result};

/// Build the `{1, 1, D_0, .., D_{R-1}, R}` grid where `D_i = OFF_i * F_i`
/// and the trailing entry of axis `i` holds `a * s_i + b * d_i - p_i` for
/// output position `a` and filter tap `b`.
pub fn build_index_grid(
    ctx: &EdslContext,
    output_spatial: &[usize],
    filter_spatial: &[usize],
    strides: &[usize],
    dilations: &[usize],
    pads_begin: &[TensorDim],
) -> Result<Tensor> {
    let spatial_rank = output_spatial.len();
    if spatial_rank == 0
        || filter_spatial.len() != spatial_rank
        || strides.len() != spatial_rank
        || dilations.len() != spatial_rank
        || pads_begin.len() != spatial_rank
    {
        return Err(Error::ShapeMismatch(format!(
            "index grid needs one output extent, filter extent, stride, dilation and pad per axis \
             (got {}, {}, {}, {}, {})",
            spatial_rank,
            filter_spatial.len(),
            strides.len(),
            dilations.len(),
            pads_begin.len()
        )));
    }

    let sampled: Vec<usize> = output_spatial
        .iter()
        .zip(filter_spatial)
        .map(|(o, f)| o * f)
        .collect();
    let mut grid_shape = vec![1, 1];
    grid_shape.extend_from_slice(&sampled);
    grid_shape.push(1);

    let mut axes = Vec::with_capacity(spatial_rank);
    for i in 0..spatial_rank {
        let taps = [output_spatial[i], filter_spatial[i]];
        let position = ctx.index(&taps, 0)?.mul_scalar(strides[i] as f64)?;
        let tap = ctx.index(&taps, 1)?.mul_scalar(dilations[i] as f64)?;
        let coords = position.add(&tap)?.sub(&ctx.dim(pads_begin[i].clone()))?;

        let mut axis_shape = vec![1; spatial_rank + 3];
        axis_shape[i + 2] = sampled[i];
        let coords = coords.reshape(&axis_shape)?.broadcast_to(&grid_shape)?;
        axes.push(coords);
    }
    concatenate(&axes, -1)
}
