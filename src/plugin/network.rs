use std::collections::{HashMap, VecDeque};

use log::debug;

use crate::edsl::{EdslContext, Program, ProgramPort, Tensor, ValueId};
use crate::error::{Error, Result};
use crate::model::{ConstantTensor, InputInfo, Layer, Network};
use crate::ops::registry::{LoweringContext, LoweringRegistry};

/// A host network lowered into one tensor program
#[derive(Debug, Clone)]
pub struct CompiledNetwork {
    pub program: Program,
    /// Every named network tensor and the program value holding it
    pub tensor_io_map: HashMap<String, ValueId>,
    pub inputs: Vec<InputInfo>,
    pub outputs: Vec<ProgramPort>,
}

/// Sort layers so that every layer follows the producers of its inputs.
///
/// Ties keep the declaration order.
pub fn topological_sort(layers: &[Layer]) -> Result<Vec<&Layer>> {
    let mut producers: HashMap<&str, usize> = HashMap::new();
    for (index, layer) in layers.iter().enumerate() {
        for output in &layer.outputs {
            if producers.insert(output.as_str(), index).is_some() {
                return Err(Error::InvalidGraph(format!("tensor '{}' is produced twice", output)));
            }
        }
    }

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); layers.len()];
    let mut in_degree = vec![0usize; layers.len()];
    for (index, layer) in layers.iter().enumerate() {
        for input in &layer.inputs {
            // Tensors without a producer are network inputs or constants
            if let Some(&producer) = producers.get(input.as_str()) {
                dependents[producer].push(index);
                in_degree[index] += 1;
            }
        }
    }

    // Kahn's algorithm
    let mut queue: VecDeque<usize> = (0..layers.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut sorted = Vec::with_capacity(layers.len());
    while let Some(index) = queue.pop_front() {
        sorted.push(&layers[index]);
        for &dependent in &dependents[index] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if sorted.len() != layers.len() {
        return Err(Error::InvalidGraph("Graph contains cycles".to_string()));
    }
    Ok(sorted)
}

fn materialize_constant(
    edsl: &EdslContext,
    name: &str,
    constant: &ConstantTensor,
) -> Result<Tensor> {
    edsl.constant(constant.dtype, &constant.dims, constant.values.clone())
        .map_err(|e| Error::InvalidGraph(format!("constant '{}': {}", name, e)))
}

/// Lower every layer of `network` with `registry` into one program.
pub fn compile_network(network: &Network, registry: &LoweringRegistry) -> Result<CompiledNetwork> {
    let edsl = EdslContext::new();
    let mut tensors: HashMap<String, Tensor> = HashMap::new();

    for input in &network.inputs {
        let dtype = input.desc.precision.to_data_type()?;
        let tensor = edsl.input(input.name.as_str(), dtype, &input.desc.dims);
        if tensors.insert(input.name.clone(), tensor).is_some() {
            return Err(Error::InvalidGraph(format!(
                "network input '{}' is declared twice",
                input.name
            )));
        }
    }

    for layer in topological_sort(&network.layers)? {
        let mut operands = Vec::with_capacity(layer.inputs.len());
        let mut constants = Vec::with_capacity(layer.inputs.len());
        for name in &layer.inputs {
            let constant = network.constants.get(name);
            let operand = match (tensors.get(name), constant) {
                (Some(tensor), _) => tensor.clone(),
                (None, Some(constant)) => {
                    let tensor = materialize_constant(&edsl, name, constant)?;
                    tensors.insert(name.clone(), tensor.clone());
                    tensor
                }
                (None, None) => {
                    return Err(Error::InvalidGraph(format!(
                        "layer '{}' reads unknown tensor '{}'",
                        layer.name, name
                    )))
                }
            };
            operands.push(operand);
            constants.push(constant);
        }

        debug!("lowering layer {} ({})", layer.name, layer.op_type);
        let ctx = LoweringContext {
            layer,
            operands,
            constants,
            edsl: &edsl,
        };
        let outputs = registry.lower(&ctx).map_err(|e| Error::Lowering {
            layer: layer.name.clone(),
            op_type: layer.op_type.clone(),
            source: Box::new(e),
        })?;
        if outputs.len() != layer.outputs.len() {
            return Err(Error::InvalidGraph(format!(
                "layer '{}' declares {} outputs but its lowering produced {}",
                layer.name,
                layer.outputs.len(),
                outputs.len()
            )));
        }
        for (name, tensor) in layer.outputs.iter().zip(outputs) {
            tensors.insert(name.clone(), tensor);
        }
    }

    let mut named_outputs = Vec::with_capacity(network.outputs.len());
    for name in &network.outputs {
        let tensor = tensors
            .get(name)
            .ok_or_else(|| {
                Error::InvalidGraph(format!("network output '{}' is never produced", name))
            })?;
        named_outputs.push((name.clone(), tensor.clone()));
    }
    let program = Program::new(network.name.as_str(), &edsl, &named_outputs)?;
    debug!(
        "lowered network {}: {} layers into {} nodes",
        network.name,
        network.layers.len(),
        program.nodes.len()
    );

    Ok(CompiledNetwork {
        tensor_io_map: tensors.into_iter().map(|(name, t)| (name, t.id())).collect(),
        inputs: network.inputs.clone(),
        outputs: program.outputs.clone(),
        program,
    })
}
