//! Deformed sampling coordinates and their multi-linear interpolation.

use crate::edsl::{concatenate, DataType, GatherOutOfBounds, Tensor};
use crate::error::{Error, Result};

/// Real, floor and ceil coordinate along one spatial axis, each
/// `{N, CI, D.., 1}`.
#[derive(Debug, Clone)]
pub struct AxisCoordinates {
    pub real: Tensor,
    pub floor: Tensor,
    pub ceil: Tensor,
}

/// Add the base grid to the reshaped offsets and split the sum per axis.
pub fn resolve_coordinates(offset: &Tensor, grid: &Tensor) -> Result<Vec<AxisCoordinates>> {
    let deformed = offset.add(grid)?;
    if deformed.rank() < 3 {
        return Err(Error::ShapeMismatch(format!(
            "deformed coordinates {:?} need batch, channel and coordinate axes",
            deformed.shape()
        )));
    }
    let last = deformed.rank() - 1;
    let spatial_rank = deformed.shape()[last];
    (0..spatial_rank)
        .map(|i| -> Result<AxisCoordinates> {
            let real = deformed.slice_axis(last, i, i + 1)?;
            Ok(AxisCoordinates {
                floor: real.floor(),
                ceil: real.ceil(),
                real,
            })
        })
        .collect()
}

/// Sample `input` at the deformed coordinates, blending the `2^R`
/// surrounding grid points with multi-linear weights.
///
/// Samples outside the input read zero.
pub fn interpolate(input: &Tensor, coords: &[AxisCoordinates]) -> Result<Tensor> {
    let spatial_rank = coords.len();
    if spatial_rank == 0 || spatial_rank + 2 != input.rank() {
        return Err(Error::ShapeMismatch(format!(
            "{} coordinate axes cannot sample an input of shape {:?}",
            spatial_rank,
            input.shape()
        )));
    }

    // corner c takes ceil on axis j when bit (R-1-j) is set, so axis 0 is the MSB
    let corners = 1usize << spatial_rank;
    let mut values = Vec::with_capacity(corners);
    for corner in 0..corners {
        let picks: Vec<Tensor> = coords
            .iter()
            .enumerate()
            .map(|(j, axis)| {
                if (corner >> (spatial_rank - 1 - j)) & 1 == 1 {
                    axis.ceil.clone()
                } else {
                    axis.floor.clone()
                }
            })
            .collect();
        let indices = concatenate(&picks, -1)?.cast(DataType::I32);
        values.push(input.gather_nd(&indices, 2, GatherOutOfBounds::Zero)?);
    }

    let sample_shape = values[0].shape().to_vec();
    for (i, axis) in coords.iter().enumerate() {
        let real = axis.real.reshape(&sample_shape)?;
        let ceil = axis.ceil.reshape(&sample_shape)?;
        let near_weight = ceil.sub(&real)?;
        let far_weight = ceil.rsub_scalar(1.0)?.add(&real)?;

        let half = 1usize << (spatial_rank - 1 - i);
        for j in 0..half {
            let blended = values[j].mul(&near_weight)?.add(&values[j + half].mul(&far_weight)?)?;
            values[j] = blended;
        }
        values.truncate(half);
    }
    Ok(values.swap_remove(0))
}
