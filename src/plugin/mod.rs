//! Plugin surface: network loading, executable networks and infer requests.

pub mod infer_request;
pub mod network;

use std::collections::HashMap;

use log::debug;

use crate::error::Result;
use crate::execution::{ExecutionOptions, Executable};
use crate::model::{InputInfo, Network};
use crate::ops::registry::LoweringRegistry;

pub use infer_request::{Blob, InferRequest};
pub use network::{compile_network, topological_sort, CompiledNetwork};

/// Entry point: owns the lowering registry and execution options
#[derive(Debug)]
pub struct Plugin {
    registry: LoweringRegistry,
    options: ExecutionOptions,
}

impl Default for Plugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin {
    /// Plugin with the standard lowerings and default options
    pub fn new() -> Self {
        Self::with_options(ExecutionOptions::default())
    }

    pub fn with_options(options: ExecutionOptions) -> Self {
        Self {
            registry: LoweringRegistry::with_standard_lowerings(),
            options,
        }
    }

    /// Replace the execution options from plugin configuration keys.
    pub fn set_config(&mut self, config: &HashMap<String, String>) -> Result<()> {
        self.options = ExecutionOptions::from_config_map(config)?;
        Ok(())
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    pub fn registry(&self) -> &LoweringRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut LoweringRegistry {
        &mut self.registry
    }

    /// Lower `network` into a program ready to serve infer requests.
    pub fn load_network(&self, network: &Network) -> Result<ExecutableNetwork> {
        debug!("loading network {} ({} layers)", network.name, network.layers.len());
        let compiled = compile_network(network, &self.registry)?;
        Ok(ExecutableNetwork {
            compiled,
            options: self.options.clone(),
        })
    }
}

/// A lowered network; every infer request compiles its own executable
#[derive(Debug, Clone)]
pub struct ExecutableNetwork {
    compiled: CompiledNetwork,
    options: ExecutionOptions,
}

impl ExecutableNetwork {
    pub fn compiled(&self) -> &CompiledNetwork {
        &self.compiled
    }

    pub fn inputs(&self) -> &[InputInfo] {
        &self.compiled.inputs
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.compiled.outputs.iter().map(|port| port.name.as_str()).collect()
    }

    pub fn create_infer_request(&self) -> Result<InferRequest> {
        let executable = Executable::compile(self.compiled.program.clone(), &self.options)?;
        InferRequest::new(executable)
    }
}
