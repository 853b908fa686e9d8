//! `ndarray` kernels behind the tensor-program primitives.

use ndarray::{ArrayD, Axis, IxDyn, Slice, Zip};
use rayon::prelude::*;

use super::buffer::round_to;
use crate::edsl::{
    broadcast_shapes, BinaryOp, ConvolutionAttrs, DataType, GatherOutOfBounds, UnaryOp,
};
use crate::error::{Error, Result};

/// Row-major flat copy of `array`.
fn flat(array: &ArrayD<f64>) -> Vec<f64> {
    array.iter().copied().collect()
}

/// Split a flat row-major index into per-axis coordinates.
fn unravel(mut index: usize, dims: &[usize], coords: &mut [usize]) {
    for axis in (0..dims.len()).rev() {
        coords[axis] = index % dims[axis];
        index /= dims[axis];
    }
}

pub fn index(shape: &[usize], axis: usize) -> ArrayD<f64> {
    ArrayD::from_shape_fn(IxDyn(shape), |idx| idx[axis] as f64)
}

pub fn reshape(array: &ArrayD<f64>, dims: &[usize]) -> Result<ArrayD<f64>> {
    Ok(ArrayD::from_shape_vec(IxDyn(dims), flat(array))?)
}

pub fn transpose(array: &ArrayD<f64>, perm: &[usize]) -> ArrayD<f64> {
    array
        .view()
        .permuted_axes(perm.to_vec())
        .as_standard_layout()
        .into_owned()
}

pub fn broadcast(array: &ArrayD<f64>, shape: &[usize]) -> Result<ArrayD<f64>> {
    let view = array.broadcast(IxDyn(shape)).ok_or_else(|| {
        Error::Execution(format!("cannot broadcast {:?} to {:?}", array.shape(), shape))
    })?;
    Ok(view.as_standard_layout().into_owned())
}

pub fn concatenate(arrays: &[&ArrayD<f64>], axis: usize) -> Result<ArrayD<f64>> {
    let views: Vec<_> = arrays.iter().map(|a| a.view()).collect();
    Ok(ndarray::concatenate(Axis(axis), &views)?)
}

pub fn slice(array: &ArrayD<f64>, axis: usize, start: usize, end: usize) -> ArrayD<f64> {
    array
        .slice_axis(Axis(axis), Slice::from(start..end))
        .to_owned()
}

pub fn binary(
    op: BinaryOp,
    lhs: &ArrayD<f64>,
    rhs: &ArrayD<f64>,
    dtype: DataType,
) -> Result<ArrayD<f64>> {
    let shape = broadcast_shapes(lhs.shape(), rhs.shape())?;
    let broadcast_err = || {
        Error::Execution(format!("cannot broadcast {:?} with {:?}", lhs.shape(), rhs.shape()))
    };
    let l = lhs.broadcast(IxDyn(&shape)).ok_or_else(broadcast_err)?;
    let r = rhs.broadcast(IxDyn(&shape)).ok_or_else(broadcast_err)?;
    Ok(Zip::from(&l).and(&r).map_collect(|&a, &b| {
        let value = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
        };
        round_to(value, dtype)
    }))
}

pub fn unary(op: UnaryOp, array: &ArrayD<f64>) -> ArrayD<f64> {
    match op {
        UnaryOp::Floor => array.mapv(f64::floor),
        UnaryOp::Ceil => array.mapv(f64::ceil),
    }
}

pub fn cast(array: &ArrayD<f64>, dtype: DataType) -> ArrayD<f64> {
    array.mapv(|v| round_to(v, dtype))
}

/// ND gather with shared leading batch dims.
///
/// Coordinates are not wrapped: a negative coordinate is out of bounds like
/// one past the end.
pub fn gather_nd(
    data: &ArrayD<f64>,
    indices: &ArrayD<f64>,
    batch_dims: usize,
    out_of_bounds: GatherOutOfBounds,
    output_shape: &[usize],
) -> Result<ArrayD<f64>> {
    let index_shape = indices.shape();
    let coord_len = index_shape[index_shape.len() - 1];
    let batch_count: usize = index_shape[..batch_dims].iter().product();
    let lookups_per_batch: usize = index_shape[batch_dims..index_shape.len() - 1].iter().product();
    let indexed_dims = &data.shape()[batch_dims..batch_dims + coord_len];
    let slice_len: usize = data.shape()[batch_dims + coord_len..].iter().product();
    let batch_stride: usize = data.shape()[batch_dims..].iter().product();

    let data = flat(data);
    let indices = flat(indices);
    let mut values = Vec::with_capacity(output_shape.iter().product());
    for batch in 0..batch_count {
        for lookup in 0..lookups_per_batch {
            let start = (batch * lookups_per_batch + lookup) * coord_len;
            let coords = &indices[start..start + coord_len];
            let mut offset = 0usize;
            let mut inside = true;
            for (&coord, &dim) in coords.iter().zip(indexed_dims) {
                let coord = coord as i64;
                let coord = if (0..dim as i64).contains(&coord) {
                    coord
                } else {
                    match out_of_bounds {
                        GatherOutOfBounds::Zero => {
                            inside = false;
                            0
                        }
                        GatherOutOfBounds::Clamp => coord.clamp(0, dim as i64 - 1),
                    }
                };
                offset = offset * dim + coord as usize;
            }
            if inside {
                let base = batch * batch_stride + offset * slice_len;
                values.extend_from_slice(&data[base..base + slice_len]);
            } else {
                values.extend(std::iter::repeat_n(0.0, slice_len));
            }
        }
    }
    Ok(ArrayD::from_shape_vec(IxDyn(output_shape), values)?)
}

/// Direct N-d convolution, NCX input with KCX filter.
///
/// Each (batch, output channel) block is computed independently in parallel.
pub fn convolution(
    input: &ArrayD<f64>,
    filter: &ArrayD<f64>,
    attrs: &ConvolutionAttrs,
    output_shape: &[usize],
    dtype: DataType,
) -> Result<ArrayD<f64>> {
    let input_shape = input.shape().to_vec();
    let filter_shape = filter.shape().to_vec();
    let spatial_rank = input_shape.len() - 2;
    let in_channels = input_shape[1];
    let out_channels = filter_shape[0];
    let group = attrs.group;
    let channels_per_group = in_channels / group;
    let outputs_per_group = out_channels / group;

    let input_spatial = &input_shape[2..];
    let kernel_spatial = &filter_shape[2..];
    let output_spatial = &output_shape[2..];
    let input_plane: usize = input_spatial.iter().product();
    let kernel_plane: usize = kernel_spatial.iter().product();
    let output_plane: usize = output_spatial.iter().product();

    let input = flat(input);
    let filter = flat(filter);

    let blocks: Vec<Vec<f64>> = (0..output_shape[0] * out_channels)
        .into_par_iter()
        .map(|block| {
            let batch = block / out_channels;
            let oc = block % out_channels;
            let first_ic = (oc / outputs_per_group) * channels_per_group;
            let mut out_coords = vec![0; spatial_rank];
            let mut kernel_coords = vec![0; spatial_rank];
            let mut plane = vec![0.0; output_plane];

            for (position, value) in plane.iter_mut().enumerate() {
                unravel(position, output_spatial, &mut out_coords);
                let mut acc = 0.0;
                for tap in 0..kernel_plane {
                    unravel(tap, kernel_spatial, &mut kernel_coords);
                    let mut input_offset = 0usize;
                    let mut inside = true;
                    for axis in 0..spatial_rank {
                        let coord = (out_coords[axis] * attrs.strides[axis]
                            + kernel_coords[axis] * attrs.dilations[axis]) as i64
                            - attrs.pads_begin[axis] as i64;
                        if coord < 0 || coord >= input_spatial[axis] as i64 {
                            inside = false;
                            break;
                        }
                        input_offset = input_offset * input_spatial[axis] + coord as usize;
                    }
                    if !inside {
                        continue;
                    }
                    for ic in 0..channels_per_group {
                        let channel = batch * in_channels + first_ic + ic;
                        let x = input[channel * input_plane + input_offset];
                        let w = filter[(oc * channels_per_group + ic) * kernel_plane + tap];
                        acc += x * w;
                    }
                }
                *value = round_to(acc, dtype);
            }
            plane
        })
        .collect();

    Ok(ArrayD::from_shape_vec(IxDyn(output_shape), blocks.concat())?)
}
