//! Tensor-algebra intermediate form.
//!
//! Lowerings compose these primitives into a data-flow graph; the
//! [`execution`](crate::execution) module compiles and runs the resulting
//! [`Program`].

pub mod dim;
pub mod dtype;
pub mod program;
pub mod tensor;

pub use dim::TensorDim;
pub use dtype::DataType;
pub use program::{Program, ProgramPort};
pub use tensor::{
    broadcast_shapes, concatenate, convolution_output_shape, BinaryOp, ConvolutionAttrs,
    EdslContext, GatherOutOfBounds, Node, Op, Tensor, UnaryOp, ValueId,
};
