use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tensor_bridge::edsl::DataType;
use tensor_bridge::{
    Attribute, Blob, ConstantTensor, Error, Layer, Network, Plugin, Precision, TensorDesc,
};

const TOLERANCE: f32 = 1e-4;

fn random_values(rng: &mut StdRng, len: usize, range: std::ops::Range<f32>) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range(range.clone())).collect()
}

fn numel(dims: &[usize]) -> usize {
    dims.iter().product()
}

fn filter_constant(dims: &[usize], values: &[f32]) -> ConstantTensor {
    ConstantTensor::new(DataType::F32, dims, values.iter().map(|&v| v as f64).collect())
}

fn with_attributes(mut layer: Layer, attributes: &[(&str, Attribute)]) -> Layer {
    for (name, value) in attributes {
        layer = layer.with_attribute(name, value.clone());
    }
    layer
}

fn deformable_network(
    input: &[usize],
    offset: &[usize],
    filter: &[usize],
    weights: &[f32],
    attributes: &[(&str, Attribute)],
) -> Network {
    let mut network = Network::new("deformable");
    network
        .add_input("x", TensorDesc::new(Precision::Fp32, input))
        .add_input("offset", TensorDesc::new(Precision::Fp32, offset))
        .add_constant("w", filter_constant(filter, weights))
        .add_layer(with_attributes(
            Layer::new("dc", "DeformableConvolution", &["x", "offset", "w"], &["y"]),
            attributes,
        ))
        .add_output("y");
    network
}

fn convolution_network(
    input: &[usize],
    filter: &[usize],
    weights: &[f32],
    attributes: &[(&str, Attribute)],
) -> Network {
    let mut network = Network::new("convolution");
    network
        .add_input("x", TensorDesc::new(Precision::Fp32, input))
        .add_constant("w", filter_constant(filter, weights))
        .add_layer(with_attributes(
            Layer::new("conv", "Convolution", &["x", "w"], &["y"]),
            attributes,
        ))
        .add_output("y");
    network
}

type Feed<'a> = (&'a str, &'a [usize], &'a [f32]);

fn run(network: &Network, feeds: &[Feed<'_>]) -> Result<(Vec<usize>, Vec<f32>), Error> {
    let executable = Plugin::new().load_network(network)?;
    let mut request = executable.create_infer_request()?;
    for (name, dims, values) in feeds {
        request.set_input(name, Blob::from_f32(dims, values)?)?;
    }
    request.infer()?;
    let output = request.output_blob("y")?;
    Ok((output.desc().dims.clone(), output.to_f32()?))
}

fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() <= TOLERANCE * (1.0 + e.abs()), "element {}: {} != {}", i, a, e);
    }
}

/// Direct 2-D deformable convolution with zero padding outside the input.
#[allow(clippy::too_many_arguments)]
fn reference_2d(
    input: &[f32],
    input_dims: &[usize],
    offset: &[f32],
    offset_dims: &[usize],
    weights: &[f32],
    filter_dims: &[usize],
    strides: [usize; 2],
    dilations: [usize; 2],
    pads: [usize; 2],
    deformable_group: usize,
) -> Vec<f32> {
    let (n, ci, ih, iw) = (input_dims[0], input_dims[1], input_dims[2], input_dims[3]);
    let (co, kh, kw) = (filter_dims[0], filter_dims[2], filter_dims[3]);
    let (oh, ow) = (offset_dims[2], offset_dims[3]);
    let off_c = offset_dims[1];
    let channels_per_group = ci / deformable_group;

    let sample = |b: usize, c: usize, y: f64, x: f64| -> f64 {
        let at = |yy: f64, xx: f64| -> f64 {
            if yy < 0.0 || xx < 0.0 || yy >= ih as f64 || xx >= iw as f64 {
                0.0
            } else {
                input[((b * ci + c) * ih + yy as usize) * iw + xx as usize] as f64
            }
        };
        let (y0, y1, x0, x1) = (y.floor(), y.ceil(), x.floor(), x.ceil());
        let (wy0, wy1) = (y1 - y, 1.0 - y1 + y);
        let (wx0, wx1) = (x1 - x, 1.0 - x1 + x);
        wy0 * (wx0 * at(y0, x0) + wx1 * at(y0, x1)) + wy1 * (wx0 * at(y1, x0) + wx1 * at(y1, x1))
    };

    let mut output = vec![0.0f32; n * co * oh * ow];
    for b in 0..n {
        for o in 0..co {
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut acc = 0.0f64;
                    for c in 0..ci {
                        let group = c / channels_per_group;
                        for ky in 0..kh {
                            for kx in 0..kw {
                                let channel = ((group * kh + ky) * kw + kx) * 2;
                                let delta = |k: usize| {
                                    offset[((b * off_c + channel + k) * oh + oy) * ow + ox] as f64
                                };
                                let y = (oy * strides[0] + ky * dilations[0]) as f64
                                    - pads[0] as f64
                                    + delta(0);
                                let x = (ox * strides[1] + kx * dilations[1]) as f64
                                    - pads[1] as f64
                                    + delta(1);
                                let w = weights[((o * ci + c) * kh + ky) * kw + kx] as f64;
                                acc += w * sample(b, c, y, x);
                            }
                        }
                    }
                    output[((b * co + o) * oh + oy) * ow + ox] = acc as f32;
                }
            }
        }
    }
    output
}

fn unravel(mut index: usize, dims: &[usize]) -> Vec<usize> {
    let mut coords = vec![0; dims.len()];
    for (coord, &dim) in coords.iter_mut().zip(dims).rev() {
        *coord = index % dim;
        index /= dim;
    }
    coords
}

/// Deformable convolution of any spatial rank, sampling every tap with the
/// `2^R` corner blend and zero outside the input.
#[allow(clippy::too_many_arguments)]
fn reference_nd(
    input: &[f32],
    input_dims: &[usize],
    offset: &[f32],
    offset_dims: &[usize],
    weights: &[f32],
    filter_dims: &[usize],
    strides: &[usize],
    dilations: &[usize],
    pads: &[usize],
    deformable_group: usize,
) -> Vec<f32> {
    let rank = input_dims.len() - 2;
    let (n, ci, co) = (input_dims[0], input_dims[1], filter_dims[0]);
    let input_spatial = &input_dims[2..];
    let filter_spatial = &filter_dims[2..];
    let output_spatial = &offset_dims[2..];
    let input_numel = numel(input_spatial);
    let taps = numel(filter_spatial);
    let output_numel = numel(output_spatial);
    let channels_per_group = ci / deformable_group;

    let sample = |b: usize, c: usize, real: &[f64]| -> f64 {
        let mut value = 0.0;
        for corner in 0..1usize << rank {
            let mut weight = 1.0;
            let mut flat = 0usize;
            let mut inside = true;
            for axis in 0..rank {
                let (floor, ceil) = (real[axis].floor(), real[axis].ceil());
                let coord = if (corner >> (rank - 1 - axis)) & 1 == 0 {
                    weight *= ceil - real[axis];
                    floor
                } else {
                    weight *= 1.0 - ceil + real[axis];
                    ceil
                };
                inside &= coord >= 0.0 && coord < input_spatial[axis] as f64;
                flat = flat * input_spatial[axis] + coord.max(0.0) as usize;
            }
            if inside {
                value += weight * input[(b * ci + c) * input_numel + flat] as f64;
            }
        }
        value
    };

    let mut output = vec![0.0f32; n * co * output_numel];
    for b in 0..n {
        for o in 0..co {
            for position in 0..output_numel {
                let out = unravel(position, output_spatial);
                let mut acc = 0.0f64;
                for c in 0..ci {
                    let group = c / channels_per_group;
                    for tap in 0..taps {
                        let k = unravel(tap, filter_spatial);
                        let real: Vec<f64> = (0..rank)
                            .map(|axis| {
                                let channel = (group * taps + tap) * rank + axis;
                                let index =
                                    (b * offset_dims[1] + channel) * output_numel + position;
                                let start = out[axis] * strides[axis] + k[axis] * dilations[axis];
                                start as f64 - pads[axis] as f64 + offset[index] as f64
                            })
                            .collect();
                        let w = weights[(o * ci + c) * taps + tap] as f64;
                        acc += w * sample(b, c, &real);
                    }
                }
                output[(b * co + o) * output_numel + position] = acc as f32;
            }
        }
    }
    output
}

#[test]
fn zero_offsets_match_convolution() {
    let mut rng = StdRng::seed_from_u64(7);
    let input_dims = [1, 4, 5, 5];
    let filter_dims = [4, 4, 3, 3];
    let offset_dims = [1, 18, 3, 3];
    let input = random_values(&mut rng, numel(&input_dims), -1.0..1.0);
    let weights = random_values(&mut rng, numel(&filter_dims), -1.0..1.0);
    let offset = vec![0.0; numel(&offset_dims)];

    let (dims, deformed) = run(
        &deformable_network(&input_dims, &offset_dims, &filter_dims, &weights, &[]),
        &[("x", &input_dims[..], &input[..]), ("offset", &offset_dims[..], &offset[..])],
    )
    .unwrap();
    let (_, plain) = run(
        &convolution_network(&input_dims, &filter_dims, &weights, &[]),
        &[("x", &input_dims[..], &input[..])],
    )
    .unwrap();

    assert_eq!(dims, vec![1, 4, 3, 3]);
    assert_close(&deformed, &plain);
}

#[test]
fn zero_offsets_with_padding_stride_and_dilation_match_convolution() {
    let mut rng = StdRng::seed_from_u64(11);
    let input_dims = [2, 3, 7, 6];
    let filter_dims = [5, 3, 3, 3];
    let offset_dims = [2, 18, 4, 6];
    let attributes = [
        ("strides", Attribute::Ints(vec![2, 1])),
        ("dilations", Attribute::Ints(vec![1, 2])),
        ("pads_begin", Attribute::Ints(vec![1, 2])),
        ("pads_end", Attribute::Ints(vec![1, 2])),
    ];
    let input = random_values(&mut rng, numel(&input_dims), -2.0..2.0);
    let weights = random_values(&mut rng, numel(&filter_dims), -1.0..1.0);
    let offset = vec![0.0; numel(&offset_dims)];

    let (dims, deformed) = run(
        &deformable_network(&input_dims, &offset_dims, &filter_dims, &weights, &attributes),
        &[("x", &input_dims[..], &input[..]), ("offset", &offset_dims[..], &offset[..])],
    )
    .unwrap();
    let (plain_dims, plain) = run(
        &convolution_network(&input_dims, &filter_dims, &weights, &attributes),
        &[("x", &input_dims[..], &input[..])],
    )
    .unwrap();

    assert_eq!(dims, plain_dims);
    assert_eq!(dims, vec![2, 5, 4, 6]);
    assert_close(&deformed, &plain);
}

#[test]
fn same_upper_padding_matches_convolution() {
    let mut rng = StdRng::seed_from_u64(3);
    let input_dims = [1, 2, 5, 4];
    let filter_dims = [3, 2, 2, 3];
    let offset_dims = [1, 12, 3, 2];
    let attributes = [
        ("strides", Attribute::Ints(vec![2, 2])),
        ("auto_pad", Attribute::String("same_upper".to_string())),
    ];
    let input = random_values(&mut rng, numel(&input_dims), -1.0..1.0);
    let weights = random_values(&mut rng, numel(&filter_dims), -1.0..1.0);
    let offset = vec![0.0; numel(&offset_dims)];

    let (dims, deformed) = run(
        &deformable_network(&input_dims, &offset_dims, &filter_dims, &weights, &attributes),
        &[("x", &input_dims[..], &input[..]), ("offset", &offset_dims[..], &offset[..])],
    )
    .unwrap();
    let (_, plain) = run(
        &convolution_network(&input_dims, &filter_dims, &weights, &attributes),
        &[("x", &input_dims[..], &input[..])],
    )
    .unwrap();

    assert_eq!(dims, vec![1, 3, 3, 2]);
    assert_close(&deformed, &plain);
}

#[test]
fn integral_offsets_sample_shifted_input() {
    let input_dims = [1, 1, 4, 4];
    let offset_dims = [1, 2, 4, 4];
    let input: Vec<f32> = (0..16).map(|v| v as f32).collect();
    let offset = vec![1.0; numel(&offset_dims)];

    let (_, output) = run(
        &deformable_network(&input_dims, &offset_dims, &[1, 1, 1, 1], &[1.0], &[]),
        &[("x", &input_dims[..], &input[..]), ("offset", &offset_dims[..], &offset[..])],
    )
    .unwrap();

    let mut expected = vec![0.0; 16];
    for y in 0..3 {
        for x in 0..3 {
            expected[y * 4 + x] = input[(y + 1) * 4 + x + 1];
        }
    }
    assert_close(&output, &expected);
}

#[test]
fn fractional_offsets_blend_four_neighbours() {
    let input_dims = [1, 1, 3, 3];
    let offset_dims = [1, 2, 3, 3];
    let input: Vec<f32> = vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0, 256.0];
    let mut offset = vec![0.0; numel(&offset_dims)];
    for i in 0..9 {
        offset[i] = 0.5;
        offset[9 + i] = 0.25;
    }

    let (_, output) = run(
        &deformable_network(&input_dims, &offset_dims, &[1, 1, 1, 1], &[1.0], &[]),
        &[("x", &input_dims[..], &input[..]), ("offset", &offset_dims[..], &offset[..])],
    )
    .unwrap();

    // position (0, 0) samples (0.5, 0.25)
    let expected = 0.5 * (0.75 * 1.0 + 0.25 * 2.0) + 0.5 * (0.75 * 8.0 + 0.25 * 16.0);
    assert!((output[0] - expected).abs() < TOLERANCE);
    // the last row reads half zero padding
    let expected = 0.5 * (0.75 * 64.0 + 0.25 * 128.0);
    assert!((output[6] - expected).abs() < TOLERANCE);
}

#[test]
fn random_offsets_match_reference_with_deformable_groups() {
    let mut rng = StdRng::seed_from_u64(42);
    let input_dims = [2, 4, 6, 5];
    let filter_dims = [3, 4, 2, 3];
    let offset_dims = [2, 2 * 2 * 6, 3, 3];
    let attributes = [
        ("deformable_group", Attribute::Int(2)),
        ("strides", Attribute::Ints(vec![2, 1])),
        ("dilations", Attribute::Ints(vec![1, 1])),
        ("pads_begin", Attribute::Ints(vec![1, 0])),
        ("pads_end", Attribute::Ints(vec![0, 0])),
    ];
    let input = random_values(&mut rng, numel(&input_dims), -1.0..1.0);
    let weights = random_values(&mut rng, numel(&filter_dims), -1.0..1.0);
    let offset = random_values(&mut rng, numel(&offset_dims), -1.5..1.5);

    let (dims, output) = run(
        &deformable_network(&input_dims, &offset_dims, &filter_dims, &weights, &attributes),
        &[("x", &input_dims[..], &input[..]), ("offset", &offset_dims[..], &offset[..])],
    )
    .unwrap();

    assert_eq!(dims, vec![2, 3, 3, 3]);
    let expected = reference_2d(
        &input,
        &input_dims,
        &offset,
        &offset_dims,
        &weights,
        &filter_dims,
        [2, 1],
        [1, 1],
        [1, 0],
        2,
    );
    assert_close(&output, &expected);
}

#[test]
fn one_and_three_spatial_dims() {
    let mut rng = StdRng::seed_from_u64(5);

    let input_dims = [1, 2, 6];
    let filter_dims = [3, 2, 2];
    let offset_dims = [1, 2, 5];
    let input = random_values(&mut rng, numel(&input_dims), -1.0..1.0);
    let weights = random_values(&mut rng, numel(&filter_dims), -1.0..1.0);
    let (dims, deformed) = run(
        &deformable_network(&input_dims, &offset_dims, &filter_dims, &weights, &[]),
        &[("x", &input_dims[..], &input[..]), ("offset", &offset_dims[..], &vec![0.0; 10][..])],
    )
    .unwrap();
    let (_, plain) = run(
        &convolution_network(&input_dims, &filter_dims, &weights, &[]),
        &[("x", &input_dims[..], &input[..])],
    )
    .unwrap();
    assert_eq!(dims, vec![1, 3, 5]);
    assert_close(&deformed, &plain);

    let input_dims = [1, 2, 4, 3, 3];
    let filter_dims = [2, 2, 2, 2, 2];
    let offset_dims = [1, 24, 3, 2, 2];
    let input = random_values(&mut rng, numel(&input_dims), -1.0..1.0);
    let weights = random_values(&mut rng, numel(&filter_dims), -1.0..1.0);
    let offset = vec![0.0; numel(&offset_dims)];
    let (dims, deformed) = run(
        &deformable_network(&input_dims, &offset_dims, &filter_dims, &weights, &[]),
        &[("x", &input_dims[..], &input[..]), ("offset", &offset_dims[..], &offset[..])],
    )
    .unwrap();
    let (_, plain) = run(
        &convolution_network(&input_dims, &filter_dims, &weights, &[]),
        &[("x", &input_dims[..], &input[..])],
    )
    .unwrap();
    assert_eq!(dims, vec![1, 2, 3, 2, 2]);
    assert_close(&deformed, &plain);
}

#[test]
fn random_offsets_in_three_spatial_dims_match_reference() {
    let mut rng = StdRng::seed_from_u64(17);
    let input_dims = [1, 2, 4, 5, 4];
    let filter_dims = [2, 2, 2, 2, 2];
    let offset_dims = [1, 3 * 2 * 8, 4, 2, 4];
    let attributes = [
        ("deformable_group", Attribute::Int(2)),
        ("strides", Attribute::Ints(vec![1, 2, 1])),
        ("pads_begin", Attribute::Ints(vec![1, 0, 0])),
        ("pads_end", Attribute::Ints(vec![0, 0, 1])),
    ];
    let input = random_values(&mut rng, numel(&input_dims), -1.0..1.0);
    let weights = random_values(&mut rng, numel(&filter_dims), -1.0..1.0);
    let offset = random_values(&mut rng, numel(&offset_dims), -1.5..1.5);

    let (dims, output) = run(
        &deformable_network(&input_dims, &offset_dims, &filter_dims, &weights, &attributes),
        &[("x", &input_dims[..], &input[..]), ("offset", &offset_dims[..], &offset[..])],
    )
    .unwrap();

    assert_eq!(dims, vec![1, 2, 4, 2, 4]);
    let expected = reference_nd(
        &input,
        &input_dims,
        &offset,
        &offset_dims,
        &weights,
        &filter_dims,
        &[1, 2, 1],
        &[1, 1, 1],
        &[1, 0, 0],
        2,
    );
    assert_close(&output, &expected);
}

#[test]
fn random_offsets_in_one_spatial_dim_match_reference() {
    let mut rng = StdRng::seed_from_u64(23);
    let input_dims = [2, 4, 7];
    let filter_dims = [3, 4, 3];
    let offset_dims = [2, 2 * 3, 3];
    let attributes = [
        ("deformable_group", Attribute::Int(2)),
        ("dilations", Attribute::Ints(vec![2])),
    ];
    let input = random_values(&mut rng, numel(&input_dims), -1.0..1.0);
    let weights = random_values(&mut rng, numel(&filter_dims), -1.0..1.0);
    let offset = random_values(&mut rng, numel(&offset_dims), -2.5..2.5);

    let (dims, output) = run(
        &deformable_network(&input_dims, &offset_dims, &filter_dims, &weights, &attributes),
        &[("x", &input_dims[..], &input[..]), ("offset", &offset_dims[..], &offset[..])],
    )
    .unwrap();

    assert_eq!(dims, vec![2, 3, 3]);
    let expected = reference_nd(
        &input,
        &input_dims,
        &offset,
        &offset_dims,
        &weights,
        &filter_dims,
        &[1],
        &[2],
        &[0],
        2,
    );
    assert_close(&output, &expected);
}

#[test]
fn nd_reference_agrees_with_bilinear_reference() {
    let mut rng = StdRng::seed_from_u64(29);
    let input_dims = [1, 2, 4, 4];
    let filter_dims = [2, 2, 2, 2];
    let offset_dims = [1, 8, 4, 4];
    let input = random_values(&mut rng, numel(&input_dims), -1.0..1.0);
    let weights = random_values(&mut rng, numel(&filter_dims), -1.0..1.0);
    let offset = random_values(&mut rng, numel(&offset_dims), -1.0..1.0);

    let bilinear = reference_2d(
        &input,
        &input_dims,
        &offset,
        &offset_dims,
        &weights,
        &filter_dims,
        [1, 1],
        [1, 1],
        [1, 1],
        1,
    );
    let nd = reference_nd(
        &input,
        &input_dims,
        &offset,
        &offset_dims,
        &weights,
        &filter_dims,
        &[1, 1],
        &[1, 1],
        &[1, 1],
        1,
    );
    assert_close(&nd, &bilinear);
}

#[test]
fn same_lower_padding_matches_convolution() {
    let mut rng = StdRng::seed_from_u64(31);
    let input_dims = [1, 2, 5, 5];
    let filter_dims = [2, 2, 3, 2];
    let offset_dims = [1, 12, 3, 3];
    let attributes = [
        ("strides", Attribute::Ints(vec![2, 2])),
        ("auto_pad", Attribute::String("same_lower".to_string())),
    ];
    let input = random_values(&mut rng, numel(&input_dims), -1.0..1.0);
    let weights = random_values(&mut rng, numel(&filter_dims), -1.0..1.0);
    let offset = vec![0.0; numel(&offset_dims)];

    let (dims, deformed) = run(
        &deformable_network(&input_dims, &offset_dims, &filter_dims, &weights, &attributes),
        &[("x", &input_dims[..], &input[..]), ("offset", &offset_dims[..], &offset[..])],
    )
    .unwrap();
    let (plain_dims, plain) = run(
        &convolution_network(&input_dims, &filter_dims, &weights, &attributes),
        &[("x", &input_dims[..], &input[..])],
    )
    .unwrap();

    assert_eq!(dims, vec![1, 2, 3, 3]);
    assert_eq!(dims, plain_dims);
    assert_close(&deformed, &plain);
}

fn load_error(network: &Network) -> Error {
    match Plugin::new().load_network(network) {
        Ok(_) => panic!("network {} should not lower", network.name),
        Err(Error::Lowering { source, .. }) => *source,
        Err(other) => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn unsupported_configurations_are_rejected() {
    let weights = vec![0.0; 4 * 4 * 9];

    let grouped = deformable_network(
        &[1, 4, 5, 5],
        &[1, 18, 3, 3],
        &[4, 2, 3, 3],
        &weights[..72],
        &[("group", Attribute::Int(2))],
    );
    assert!(matches!(load_error(&grouped), Error::UnsupportedAttribute(_)));

    let uneven_groups = deformable_network(
        &[1, 4, 5, 5],
        &[1, 54, 3, 3],
        &[4, 4, 3, 3],
        &weights,
        &[("deformable_group", Attribute::Int(3))],
    );
    assert!(matches!(load_error(&uneven_groups), Error::ShapeMismatch(_)));

    let wrong_offset_channels =
        deformable_network(&[1, 4, 5, 5], &[1, 16, 3, 3], &[4, 4, 3, 3], &weights, &[]);
    assert!(matches!(load_error(&wrong_offset_channels), Error::ShapeMismatch(_)));

    let wrong_filter_channels =
        deformable_network(&[1, 4, 5, 5], &[1, 18, 3, 3], &[4, 3, 3, 3], &weights[..108], &[]);
    assert!(matches!(load_error(&wrong_filter_channels), Error::ShapeMismatch(_)));
}
