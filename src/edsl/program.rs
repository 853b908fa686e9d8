use std::collections::HashSet;
use std::fmt;

use super::dtype::DataType;
use super::tensor::{EdslContext, Node, Op, Tensor, ValueId};
use crate::error::{Error, Result};

/// A named program input or output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramPort {
    pub name: String,
    pub id: ValueId,
    pub dtype: DataType,
    pub shape: Vec<usize>,
}

/// Owned, thread-transferable snapshot of a tensor program.
///
/// `nodes` keeps the creation order of the context, which is a valid
/// execution order.
#[derive(Debug, Clone)]
pub struct Program {
    pub name: String,
    pub nodes: Vec<Node>,
    pub inputs: Vec<ProgramPort>,
    pub outputs: Vec<ProgramPort>,
}

impl Program {
    /// Snapshot `ctx` with the given named outputs. Every input node in the
    /// context becomes a program input.
    pub fn new(
        name: impl Into<String>,
        ctx: &EdslContext,
        outputs: &[(String, Tensor)],
    ) -> Result<Self> {
        let nodes = ctx.nodes();
        let mut output_ports = Vec::with_capacity(outputs.len());
        let mut names = HashSet::new();
        for (name, tensor) in outputs {
            if !names.insert(name.as_str()) {
                return Err(Error::InvalidGraph(format!("output '{}' is bound twice", name)));
            }
            if tensor.id() >= nodes.len() || !ctx.same(tensor.context()) {
                return Err(Error::InvalidGraph(format!(
                    "output '{}' does not belong to this program",
                    name
                )));
            }
            output_ports.push(ProgramPort {
                name: name.clone(),
                id: tensor.id(),
                dtype: tensor.dtype(),
                shape: tensor.shape().to_vec(),
            });
        }

        let mut input_ports = Vec::new();
        for (id, node) in nodes.iter().enumerate() {
            if let Op::Input { name } = &node.op {
                if !names.insert(name.as_str()) && !output_ports.iter().any(|p| p.id == id) {
                    return Err(Error::InvalidGraph(format!("input '{}' is declared twice", name)));
                }
                input_ports.push(ProgramPort {
                    name: name.clone(),
                    id,
                    dtype: node.dtype,
                    shape: node.shape.clone(),
                });
            }
        }

        Ok(Self {
            name: name.into(),
            nodes,
            inputs: input_ports,
            outputs: output_ports,
        })
    }

    pub fn input(&self, name: &str) -> Option<&ProgramPort> {
        self.inputs.iter().find(|port| port.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&ProgramPort> {
        self.outputs.iter().find(|port| port.name == name)
    }

    /// Nodes the outputs transitively depend on.
    pub fn live_nodes(&self) -> Vec<bool> {
        let mut live = vec![false; self.nodes.len()];
        let mut stack: Vec<ValueId> = self.outputs.iter().map(|port| port.id).collect();
        while let Some(id) = stack.pop() {
            if live[id] {
                continue;
            }
            live[id] = true;
            stack.extend(self.nodes[id].inputs.iter().copied());
        }
        for port in &self.inputs {
            live[port.id] = true;
        }
        live
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "program {} {{", self.name)?;
        for (id, node) in self.nodes.iter().enumerate() {
            let operands: Vec<String> = node.inputs.iter().map(|i| format!("%{}", i)).collect();
            let detail = match &node.op {
                Op::Input { name } => format!(" \"{}\"", name),
                Op::Scalar(v) => format!(" {}", v),
                Op::Dim(dim) => format!(" {}", dim),
                Op::Index { axis } => format!(" axis={}", axis),
                Op::Transpose { perm } => format!(" perm={:?}", perm),
                Op::Concatenate { axis } => format!(" axis={}", axis),
                Op::Slice { axis, start, end } => format!(" axis={} {}..{}", axis, start, end),
                Op::Gather {
                    batch_dims,
                    out_of_bounds,
                } => format!(" batch_dims={} oob={:?}", batch_dims, out_of_bounds),
                Op::Convolution(attrs) => format!(
                    " strides={:?} dilations={:?} pads={:?}/{:?} group={}",
                    attrs.strides, attrs.dilations, attrs.pads_begin, attrs.pads_end, attrs.group
                ),
                _ => String::new(),
            };
            writeln!(
                f,
                "  %{} = {}({}){} : {}{:?}",
                id,
                node.op.mnemonic(),
                operands.join(", "),
                detail,
                node.dtype,
                node.shape
            )?;
        }
        for port in &self.outputs {
            writeln!(f, "  return \"{}\" = %{}", port.name, port.id)?;
        }
        write!(f, "}}")
    }
}
