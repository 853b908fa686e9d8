//! Lowers convolution-family and range operators into a tensor-algebra
//! program, runs the program on host buffers and keeps infer-request blobs in
//! sync with the executable's device buffers.

pub mod edsl;
pub mod error;
pub mod execution;
pub mod model;
pub mod ops;
pub mod plugin;

// Re-export commonly used types
pub use edsl::{DataType, EdslContext, Program, Tensor, TensorDim};
pub use error::{Error, Result};
pub use execution::{ExecutionContext, ExecutionOptions, Executable};
pub use model::{Attribute, ConstantTensor, Layer, Network, Precision, TensorDesc};
pub use ops::registry::{LoweringContext, LoweringFn, LoweringRegistry};
pub use plugin::{Blob, CompiledNetwork, ExecutableNetwork, InferRequest, Plugin};
