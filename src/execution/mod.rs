//! Reference runtime for tensor programs.

pub mod buffer;
pub mod context;
pub mod engine;
pub mod kernels;

pub use context::{ExecutionContext, ExecutionOptions};
pub use engine::{DeviceBuffer, Executable};
