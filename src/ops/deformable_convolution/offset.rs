use crate::edsl::Tensor;
use crate::error::{Error, Result};

/// Unpack `{N, DG*R*prod(F), OFF..}` offsets into a per-channel coordinate
/// delta of shape `{N, CI, OFF_0*F_0, .., OFF_{R-1}*F_{R-1}, R}`.
///
/// Pure data movement; the channel axis unpacks as `{DG, F_0, .., F_{R-1}, R}`.
pub fn reshape_offset(
    offset: &Tensor,
    deformable_group: usize,
    filter_spatial: &[usize],
    input_channels: usize,
) -> Result<Tensor> {
    let spatial_rank = filter_spatial.len();
    let shape = offset.shape();
    if shape.len() != spatial_rank + 2
        || deformable_group == 0
        || !input_channels.is_multiple_of(deformable_group)
    {
        return Err(Error::ShapeMismatch(format!(
            "offset {:?} cannot be split into {} deformable groups over {} channels",
            shape, deformable_group, input_channels
        )));
    }
    let batch = shape[0];
    let output_spatial = &shape[2..];

    let mut unpacked = vec![batch, deformable_group];
    unpacked.extend_from_slice(filter_spatial);
    unpacked.push(spatial_rank);
    unpacked.extend_from_slice(output_spatial);

    // {N, DG, F.., R, OFF..} -> {N, DG, OFF_0, F_0, .., R}
    let mut perm = vec![0, 1];
    for i in 0..spatial_rank {
        perm.push(spatial_rank + 3 + i);
        perm.push(2 + i);
    }
    perm.push(spatial_rank + 2);

    let sampled: Vec<usize> = output_spatial
        .iter()
        .zip(filter_spatial)
        .map(|(o, f)| o * f)
        .collect();
    let with_group_dims = |channels: usize, split: Option<usize>| {
        let mut dims = vec![batch, channels];
        dims.extend(split);
        dims.extend_from_slice(&sampled);
        dims.push(spatial_rank);
        dims
    };

    offset
        .reshape(&unpacked)?
        .transpose(&perm)?
        .reshape(&with_group_dims(deformable_group, Some(1)))?
        .broadcast_to(&with_group_dims(deformable_group, Some(input_channels / deformable_group)))?
        .reshape(&with_group_dims(input_channels, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edsl::{DataType, EdslContext, Op};

    #[test]
    fn test_single_group_2d() {
        let ctx = EdslContext::new();
        let offset = ctx.input("offset", DataType::F32, &[1, 18, 3, 3]);
        let reshaped = reshape_offset(&offset, 1, &[3, 3], 4).unwrap();
        assert_eq!(reshaped.shape(), &[1, 4, 9, 9, 2]);
    }

    #[test]
    fn test_permutation_interleaves_output_and_filter_axes() {
        let ctx = EdslContext::new();
        let offset = ctx.input("offset", DataType::F32, &[2, 2 * 3 * 2 * 2 * 4, 5, 6, 7]);
        let reshaped = reshape_offset(&offset, 2, &[2, 2, 4], 6).unwrap();
        assert_eq!(reshaped.shape(), &[2, 6, 10, 12, 28, 3]);

        let perm = ctx
            .nodes()
            .into_iter()
            .find_map(|node| match node.op {
                Op::Transpose { perm } => Some(perm),
                _ => None,
            })
            .unwrap();
        assert_eq!(perm, vec![0, 1, 6, 2, 7, 3, 8, 4, 5]);
    }

    #[test]
    fn test_group_must_divide_channels() {
        let ctx = EdslContext::new();
        let offset = ctx.input("offset", DataType::F32, &[1, 36, 3, 3]);
        assert!(reshape_offset(&offset, 2, &[3, 3], 3).is_err());
    }
}
