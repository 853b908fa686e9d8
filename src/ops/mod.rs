pub mod attributes;
pub mod convolution;
pub mod deformable_convolution;
pub mod padding;
pub mod range;
pub mod registry;

pub mod prelude {
    pub use super::registry::{LoweringContext, LoweringFn, LoweringRegistry};
    pub use super::padding::AutoPadMode;
}

pub use convolution::{lower_convolution, ConvolutionParams};
pub use deformable_convolution::{
    deformable_convolution, lower_deformable_convolution, DeformableConvolutionParams,
};
pub use padding::{compute_padding_and_output_size, AutoPadMode};
pub use range::{lower_range, range_len, range_values, MAX_RANGE_LEN};
pub use registry::{LoweringContext, LoweringFn, LoweringRegistry};
