use std::collections::HashMap;

use log::{debug, trace};
use ndarray::{arr0, ArrayD, IxDyn};

use super::buffer::{decode, encode, round_to};
use super::context::{ExecutionContext, ExecutionOptions};
use super::kernels;
use crate::edsl::{Op, Program, ProgramPort, ValueId};
use crate::error::{Error, Result};

/// Device-side buffer bound to a program input or output
#[derive(Debug, Clone)]
pub struct DeviceBuffer {
    pub port: ProgramPort,
    data: Vec<u8>,
}

impl DeviceBuffer {
    fn zeroed(port: &ProgramPort) -> Result<Self> {
        let len = port.dtype.buffer_len(&port.shape)?;
        Ok(Self {
            port: port.clone(),
            data: vec![0; len],
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// A compiled program with its device buffers
#[derive(Debug)]
pub struct Executable {
    program: Program,
    context: ExecutionContext,
    /// Resolved value of every `dim` node
    dims: HashMap<ValueId, i64>,
    live: Vec<bool>,
    /// Last node reading each value, for releasing intermediates early
    last_use: Vec<usize>,
    inputs: Vec<DeviceBuffer>,
    outputs: Vec<DeviceBuffer>,
}

impl Executable {
    /// Resolve deferred dimensions and allocate zeroed device buffers.
    pub fn compile(program: Program, options: &ExecutionOptions) -> Result<Self> {
        let mut dims = HashMap::new();
        for (id, node) in program.nodes.iter().enumerate() {
            if let Op::Dim(dim) = &node.op {
                let value = dim.evaluate(&options.dim_bindings).map_err(|e| {
                    Error::Execution(format!(
                        "program {}: cannot resolve %{} = {}: {}",
                        program.name, id, dim, e
                    ))
                })?;
                dims.insert(id, value);
            }
        }

        let live = program.live_nodes();
        let mut last_use: Vec<usize> = (0..program.nodes.len()).collect();
        for (id, node) in program.nodes.iter().enumerate() {
            if !live[id] {
                continue;
            }
            for &operand in &node.inputs {
                last_use[operand] = last_use[operand].max(id);
            }
        }

        let inputs = program.inputs.iter().map(DeviceBuffer::zeroed).collect::<Result<_>>()?;
        let outputs = program.outputs.iter().map(DeviceBuffer::zeroed).collect::<Result<_>>()?;
        let context = ExecutionContext::new(options.clone())?;

        debug!(
            "compiled program {}: {} nodes ({} live), {} inputs, {} outputs",
            program.name,
            program.nodes.len(),
            live.iter().filter(|&&l| l).count(),
            program.inputs.len(),
            program.outputs.len()
        );
        if options.log_program {
            trace!("{}", program);
        }

        Ok(Self {
            program,
            context,
            dims,
            live,
            last_use,
            inputs,
            outputs,
        })
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn inputs(&self) -> &[DeviceBuffer] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[DeviceBuffer] {
        &self.outputs
    }

    /// Writable bytes of the named input buffer
    pub fn input_view_mut(&mut self, name: &str) -> Result<&mut [u8]> {
        self.inputs
            .iter_mut()
            .find(|buffer| buffer.port.name == name)
            .map(DeviceBuffer::bytes_mut)
            .ok_or_else(|| Error::Execution(format!("program has no input named '{}'", name)))
    }

    /// Bytes of the named output buffer, valid after [`Executable::run`]
    pub fn output_view(&self, name: &str) -> Result<&[u8]> {
        self.outputs
            .iter()
            .find(|buffer| buffer.port.name == name)
            .map(DeviceBuffer::bytes)
            .ok_or_else(|| Error::Execution(format!("program has no output named '{}'", name)))
    }

    /// Evaluate the program on the current input buffers and fill the
    /// output buffers.
    pub fn run(&mut self) -> Result<()> {
        let nodes = &self.program.nodes;
        let mut values: Vec<Option<ArrayD<f64>>> = vec![None; nodes.len()];
        let mut keep = vec![false; nodes.len()];
        for port in &self.program.outputs {
            keep[port.id] = true;
        }
        let feeds: HashMap<ValueId, &DeviceBuffer> =
            self.inputs.iter().map(|b| (b.port.id, b)).collect();

        for (id, node) in nodes.iter().enumerate() {
            if !self.live[id] {
                continue;
            }
            let operands = node
                .inputs
                .iter()
                .map(|&operand| {
                    values[operand].as_ref().ok_or_else(|| {
                        Error::Execution(format!(
                            "%{} reads %{} before it is computed",
                            id, operand
                        ))
                    })
                })
                .collect::<Result<Vec<&ArrayD<f64>>>>()?;

            let value = match &node.op {
                Op::Input { name } => {
                    let buffer = feeds.get(&id).ok_or_else(|| {
                        Error::Execution(format!("input '{}' has no device buffer", name))
                    })?;
                    decode(buffer.bytes(), &node.shape, node.dtype)?
                }
                Op::Constant { values: data } => {
                    let rounded = data.iter().map(|&v| round_to(v, node.dtype)).collect();
                    ArrayD::from_shape_vec(IxDyn(&node.shape), rounded)?
                }
                Op::Scalar(value) => arr0(round_to(*value, node.dtype)).into_dyn(),
                Op::Dim(dim) => {
                    let value = self.dims.get(&id).ok_or_else(|| {
                        Error::Execution(format!("dimension {} was not resolved", dim))
                    })?;
                    arr0(*value as f64).into_dyn()
                }
                Op::Index { axis } => kernels::index(&node.shape, *axis),
                Op::Reshape => kernels::reshape(operands[0], &node.shape)?,
                Op::Transpose { perm } => kernels::transpose(operands[0], perm),
                Op::Broadcast => kernels::broadcast(operands[0], &node.shape)?,
                Op::Concatenate { axis } => kernels::concatenate(&operands, *axis)?,
                Op::Slice { axis, start, end } => kernels::slice(operands[0], *axis, *start, *end),
                Op::Binary(op) => kernels::binary(*op, operands[0], operands[1], node.dtype)?,
                Op::Unary(op) => kernels::unary(*op, operands[0]),
                Op::Cast => kernels::cast(operands[0], node.dtype),
                Op::Gather {
                    batch_dims,
                    out_of_bounds,
                } => kernels::gather_nd(
                    operands[0],
                    operands[1],
                    *batch_dims,
                    *out_of_bounds,
                    &node.shape,
                )?,
                Op::Convolution(attrs) => {
                    let (input, filter) = (operands[0], operands[1]);
                    self.context.install(|| {
                        kernels::convolution(input, filter, attrs, &node.shape, node.dtype)
                    })?
                }
            };
            if value.shape() != node.shape.as_slice() {
                return Err(Error::Execution(format!(
                    "%{} = {} produced shape {:?}, expected {:?}",
                    id,
                    node.op.mnemonic(),
                    value.shape(),
                    node.shape
                )));
            }

            for &operand in &node.inputs {
                if self.last_use[operand] == id && !keep[operand] {
                    values[operand] = None;
                }
            }
            values[id] = Some(value);
        }

        for buffer in &mut self.outputs {
            let value = values[buffer.port.id].as_ref().ok_or_else(|| {
                Error::Execution(format!("output '{}' was not computed", buffer.port.name))
            })?;
            encode(value, buffer.port.dtype, &mut buffer.data)?;
        }
        debug!("ran program {}", self.program.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edsl::{DataType, EdslContext, TensorDim};
    use crate::execution::buffer::{f32_bytes, f32_values};

    #[test]
    fn test_run_elementwise_program() {
        let ctx = EdslContext::new();
        let x = ctx.input("x", DataType::F32, &[2, 2]);
        let y = x.mul_scalar(2.0).unwrap().add(&x.floor()).unwrap();
        let program = Program::new("double", &ctx, &[("y".to_string(), y)]).unwrap();

        let mut exe = Executable::compile(program, &ExecutionOptions::new()).unwrap();
        exe.input_view_mut("x").unwrap().copy_from_slice(&f32_bytes(&[0.5, 1.5, -0.5, 2.0]));
        exe.run().unwrap();
        assert_eq!(f32_values(exe.output_view("y").unwrap()), vec![1.0, 4.0, -2.0, 6.0]);
    }

    #[test]
    fn test_dims_resolved_at_compile() {
        let ctx = EdslContext::new();
        let pad = ctx.dim(TensorDim::symbol("P") * 2i64);
        let grid = ctx.index(&[3], 0).unwrap().sub(&pad).unwrap();
        let program = Program::new("grid", &ctx, &[("g".to_string(), grid)]).unwrap();

        let err = Executable::compile(program.clone(), &ExecutionOptions::new()).unwrap_err();
        assert!(matches!(err, Error::Execution(_)));

        let options = ExecutionOptions::new().bind_dim("P", 1);
        let mut exe = Executable::compile(program, &options).unwrap();
        exe.run().unwrap();
        let out = decode(exe.output_view("g").unwrap(), &[3], DataType::I64).unwrap();
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![-2.0, -1.0, 0.0]);
    }

    #[test]
    fn test_oversized_port_rejected_at_compile() {
        let ctx = EdslContext::new();
        let x = ctx.input("x", DataType::F32, &[usize::MAX / 2, 4]);
        let program = Program::new("huge", &ctx, &[("y".to_string(), x)]).unwrap();
        let err = Executable::compile(program, &ExecutionOptions::new()).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)));
    }

    #[test]
    fn test_unknown_buffer_names() {
        let ctx = EdslContext::new();
        let x = ctx.input("x", DataType::F32, &[1]);
        let y = x.add_scalar(0.0).unwrap();
        let program = Program::new("id", &ctx, &[("y".to_string(), y)]).unwrap();
        let options = ExecutionOptions::new().set_thread_count(1);
        let mut exe = Executable::compile(program, &options).unwrap();
        assert!(exe.input_view_mut("z").is_err());
        assert!(exe.output_view("x").is_err());
        assert_eq!(exe.inputs().len(), 1);
        assert_eq!(exe.outputs()[0].bytes().len(), 4);
    }
}
