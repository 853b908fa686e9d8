//! Graph-construction context and immutable tensor handles.
//!
//! Every primitive checks its operand shapes and appends one node to the
//! shared context; a [`Tensor`] is only a handle (context, node id, dtype,
//! shape) and is never mutated after creation. Nodes are appended in
//! dependency order, so the creation order is already a valid execution
//! order.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::dim::TensorDim;
use super::dtype::DataType;
use crate::error::{Error, Result};

/// Identifier of a node inside one graph-construction context.
pub type ValueId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Floor,
    Ceil,
}

/// What an ND gather yields for coordinates outside the data extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatherOutOfBounds {
    /// Read zero, as if the data were zero padded.
    #[default]
    Zero,
    /// Clamp each coordinate to the nearest edge.
    Clamp,
}

/// Attributes of an NCX / KCX convolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvolutionAttrs {
    pub strides: Vec<usize>,
    pub dilations: Vec<usize>,
    pub pads_begin: Vec<usize>,
    pub pads_end: Vec<usize>,
    pub group: usize,
}

impl ConvolutionAttrs {
    /// Unpadded, undilated convolution with the given strides.
    pub fn valid(strides: Vec<usize>) -> Self {
        let rank = strides.len();
        Self {
            strides,
            dilations: vec![1; rank],
            pads_begin: vec![0; rank],
            pads_end: vec![0; rank],
            group: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Op {
    Input { name: String },
    Constant { values: Vec<f64> },
    Scalar(f64),
    /// Rank-0 scalar holding a possibly deferred dimension.
    Dim(TensorDim),
    Index { axis: usize },
    Reshape,
    Transpose { perm: Vec<usize> },
    Broadcast,
    Concatenate { axis: usize },
    Slice { axis: usize, start: usize, end: usize },
    Binary(BinaryOp),
    Unary(UnaryOp),
    Cast,
    Gather { batch_dims: usize, out_of_bounds: GatherOutOfBounds },
    Convolution(ConvolutionAttrs),
}

impl Op {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::Input { .. } => "input",
            Op::Constant { .. } => "constant",
            Op::Scalar(_) => "scalar",
            Op::Dim(_) => "dim",
            Op::Index { .. } => "index",
            Op::Reshape => "reshape",
            Op::Transpose { .. } => "transpose",
            Op::Broadcast => "broadcast",
            Op::Concatenate { .. } => "concatenate",
            Op::Slice { .. } => "slice",
            Op::Binary(BinaryOp::Add) => "add",
            Op::Binary(BinaryOp::Sub) => "sub",
            Op::Binary(BinaryOp::Mul) => "mul",
            Op::Unary(UnaryOp::Floor) => "floor",
            Op::Unary(UnaryOp::Ceil) => "ceil",
            Op::Cast => "cast",
            Op::Gather { .. } => "gather_nd",
            Op::Convolution(_) => "convolution",
        }
    }
}

/// One primitive in the tensor program.
#[derive(Debug, Clone)]
pub struct Node {
    pub op: Op,
    pub inputs: Vec<ValueId>,
    pub dtype: DataType,
    pub shape: Vec<usize>,
}

/// Shared graph-construction context.
#[derive(Debug, Clone, Default)]
pub struct EdslContext {
    nodes: Rc<RefCell<Vec<Node>>>,
}

impl EdslContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.borrow().len()
    }

    /// Snapshot of the nodes created so far.
    pub fn nodes(&self) -> Vec<Node> {
        self.nodes.borrow().clone()
    }

    pub(crate) fn same(&self, other: &EdslContext) -> bool {
        Rc::ptr_eq(&self.nodes, &other.nodes)
    }

    fn push(&self, op: Op, inputs: Vec<ValueId>, dtype: DataType, shape: Vec<usize>) -> Tensor {
        let mut nodes = self.nodes.borrow_mut();
        let id = nodes.len();
        nodes.push(Node {
            op,
            inputs,
            dtype,
            shape: shape.clone(),
        });
        Tensor {
            ctx: self.clone(),
            id,
            dtype,
            shape,
        }
    }

    pub fn input(&self, name: impl Into<String>, dtype: DataType, shape: &[usize]) -> Tensor {
        self.push(Op::Input { name: name.into() }, Vec::new(), dtype, shape.to_vec())
    }

    pub fn constant(&self, dtype: DataType, shape: &[usize], values: Vec<f64>) -> Result<Tensor> {
        let numel: usize = shape.iter().product();
        if values.len() != numel {
            return Err(Error::ShapeMismatch(format!(
                "constant of shape {:?} needs {} values, got {}",
                shape,
                numel,
                values.len()
            )));
        }
        Ok(self.push(Op::Constant { values }, Vec::new(), dtype, shape.to_vec()))
    }

    /// Rank-0 f32 literal.
    pub fn scalar(&self, value: f64) -> Tensor {
        self.scalar_of(value, DataType::F32)
    }

    pub fn scalar_of(&self, value: f64, dtype: DataType) -> Tensor {
        self.push(Op::Scalar(value), Vec::new(), dtype, Vec::new())
    }

    /// Rank-0 i64 scalar carrying a dimension that may only be known once
    /// the program is compiled.
    pub fn dim(&self, dim: TensorDim) -> Tensor {
        self.push(Op::Dim(dim), Vec::new(), DataType::I64, Vec::new())
    }

    /// i32 tensor of `shape` whose elements are their coordinate along `axis`.
    pub fn index(&self, shape: &[usize], axis: usize) -> Result<Tensor> {
        if axis >= shape.len() {
            return Err(Error::ShapeMismatch(format!(
                "index axis {} out of range for shape {:?}",
                axis, shape
            )));
        }
        Ok(self.push(Op::Index { axis }, Vec::new(), DataType::I32, shape.to_vec()))
    }
}

/// Immutable handle to a value in an [`EdslContext`].
#[derive(Clone)]
pub struct Tensor {
    ctx: EdslContext,
    id: ValueId,
    dtype: DataType,
    shape: Vec<usize>,
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor {{ id: %{}, dtype: {}, shape: {:?} }}", self.id, self.dtype, self.shape)
    }
}

impl Tensor {
    pub fn id(&self) -> ValueId {
        self.id
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn context(&self) -> &EdslContext {
        &self.ctx
    }

    fn check_context(&self, other: &Tensor) -> Result<()> {
        if self.ctx.same(&other.ctx) {
            Ok(())
        } else {
            Err(Error::InvalidGraph(format!(
                "tensors %{} and %{} belong to different graph contexts",
                self.id, other.id
            )))
        }
    }

    pub fn reshape(&self, dims: &[usize]) -> Result<Tensor> {
        let numel: usize = dims.iter().product();
        if numel != self.numel() {
            return Err(Error::ShapeMismatch(format!(
                "cannot reshape {:?} ({} elements) to {:?} ({} elements)",
                self.shape,
                self.numel(),
                dims,
                numel
            )));
        }
        Ok(self.ctx.push(Op::Reshape, vec![self.id], self.dtype, dims.to_vec()))
    }

    pub fn transpose(&self, perm: &[usize]) -> Result<Tensor> {
        let mut seen = vec![false; self.rank()];
        if perm.len() != self.rank() {
            return Err(Error::ShapeMismatch(format!(
                "transpose permutation {:?} does not match rank {}",
                perm,
                self.rank()
            )));
        }
        for &axis in perm {
            if axis >= self.rank() || seen[axis] {
                return Err(Error::ShapeMismatch(format!(
                    "{:?} is not a permutation of 0..{}",
                    perm,
                    self.rank()
                )));
            }
            seen[axis] = true;
        }
        let shape = perm.iter().map(|&axis| self.shape[axis]).collect();
        Ok(self.ctx.push(
            Op::Transpose { perm: perm.to_vec() },
            vec![self.id],
            self.dtype,
            shape,
        ))
    }

    /// Numpy-style broadcast: dims are right aligned and size-1 dims expand.
    pub fn broadcast_to(&self, shape: &[usize]) -> Result<Tensor> {
        if shape.len() < self.rank() {
            return Err(Error::ShapeMismatch(format!(
                "cannot broadcast {:?} to lower rank shape {:?}",
                self.shape, shape
            )));
        }
        let lead = shape.len() - self.rank();
        for (i, &dim) in self.shape.iter().enumerate() {
            if dim != 1 && dim != shape[lead + i] {
                return Err(Error::ShapeMismatch(format!(
                    "cannot broadcast {:?} to {:?}",
                    self.shape, shape
                )));
            }
        }
        Ok(self.ctx.push(Op::Broadcast, vec![self.id], self.dtype, shape.to_vec()))
    }

    /// Keep `start..end` along `axis`.
    pub fn slice_axis(&self, axis: usize, start: usize, end: usize) -> Result<Tensor> {
        if axis >= self.rank() || start > end || end > self.shape[axis] {
            return Err(Error::ShapeMismatch(format!(
                "slice {}..{} on axis {} is out of range for {:?}",
                start, end, axis, self.shape
            )));
        }
        let mut shape = self.shape.clone();
        shape[axis] = end - start;
        Ok(self.ctx.push(
            Op::Slice { axis, start, end },
            vec![self.id],
            self.dtype,
            shape,
        ))
    }

    fn binary(&self, op: BinaryOp, rhs: &Tensor) -> Result<Tensor> {
        self.check_context(rhs)?;
        let shape = broadcast_shapes(&self.shape, &rhs.shape)?;
        let dtype = self.dtype.promote(rhs.dtype);
        Ok(self.ctx.push(Op::Binary(op), vec![self.id, rhs.id], dtype, shape))
    }

    pub fn add(&self, rhs: &Tensor) -> Result<Tensor> {
        self.binary(BinaryOp::Add, rhs)
    }

    pub fn sub(&self, rhs: &Tensor) -> Result<Tensor> {
        self.binary(BinaryOp::Sub, rhs)
    }

    pub fn mul(&self, rhs: &Tensor) -> Result<Tensor> {
        self.binary(BinaryOp::Mul, rhs)
    }

    // Scalar literals adopt the tensor's dtype, so integer grids stay integral.

    pub fn add_scalar(&self, value: f64) -> Result<Tensor> {
        self.add(&self.ctx.scalar_of(value, self.dtype))
    }

    pub fn sub_scalar(&self, value: f64) -> Result<Tensor> {
        self.sub(&self.ctx.scalar_of(value, self.dtype))
    }

    pub fn mul_scalar(&self, value: f64) -> Result<Tensor> {
        self.mul(&self.ctx.scalar_of(value, self.dtype))
    }

    /// `value - self`.
    pub fn rsub_scalar(&self, value: f64) -> Result<Tensor> {
        self.ctx.scalar_of(value, self.dtype).sub(self)
    }

    pub fn floor(&self) -> Tensor {
        self.ctx
            .push(Op::Unary(UnaryOp::Floor), vec![self.id], self.dtype, self.shape.clone())
    }

    pub fn ceil(&self) -> Tensor {
        self.ctx
            .push(Op::Unary(UnaryOp::Ceil), vec![self.id], self.dtype, self.shape.clone())
    }

    pub fn cast(&self, dtype: DataType) -> Tensor {
        self.ctx.push(Op::Cast, vec![self.id], dtype, self.shape.clone())
    }

    /// ND gather: the trailing dim of `indices` holds coordinates into the
    /// dims of `self` that follow the first `batch_dims` dims, which are
    /// shared between data and indices.
    pub fn gather_nd(
        &self,
        indices: &Tensor,
        batch_dims: usize,
        out_of_bounds: GatherOutOfBounds,
    ) -> Result<Tensor> {
        self.check_context(indices)?;
        if !indices.dtype.is_integer() {
            return Err(Error::UnsupportedType(format!(
                "gather indices must be integers, got {}",
                indices.dtype
            )));
        }
        if indices.rank() < batch_dims + 1 || self.rank() < batch_dims {
            return Err(Error::ShapeMismatch(format!(
                "gather with batch_dims={} does not fit indices {:?} and data {:?}",
                batch_dims, indices.shape, self.shape
            )));
        }
        let coord_len = indices.shape[indices.rank() - 1];
        if batch_dims + coord_len > self.rank() {
            return Err(Error::ShapeMismatch(format!(
                "gather coordinates of length {} exceed data rank {} after {} batch dims",
                coord_len,
                self.rank(),
                batch_dims
            )));
        }
        if indices.shape[..batch_dims] != self.shape[..batch_dims] {
            return Err(Error::ShapeMismatch(format!(
                "gather batch dims differ: data {:?}, indices {:?}",
                &self.shape[..batch_dims],
                &indices.shape[..batch_dims]
            )));
        }
        let mut shape = indices.shape[..indices.rank() - 1].to_vec();
        shape.extend_from_slice(&self.shape[batch_dims + coord_len..]);
        Ok(self.ctx.push(
            Op::Gather {
                batch_dims,
                out_of_bounds,
            },
            vec![self.id, indices.id],
            self.dtype,
            shape,
        ))
    }

    /// NCX input convolved with a KCX filter.
    pub fn convolution(&self, filter: &Tensor, attrs: ConvolutionAttrs) -> Result<Tensor> {
        self.check_context(filter)?;
        let output_shape = convolution_output_shape(&self.shape, &filter.shape, &attrs)?;
        let dtype = self.dtype.promote(filter.dtype);
        Ok(self.ctx.push(
            Op::Convolution(attrs),
            vec![self.id, filter.id],
            dtype,
            output_shape,
        ))
    }
}

/// Concatenate along `axis`; a negative axis counts from the end.
pub fn concatenate(tensors: &[Tensor], axis: isize) -> Result<Tensor> {
    let first = tensors
        .first()
        .ok_or_else(|| Error::ShapeMismatch("cannot concatenate zero tensors".to_string()))?;
    let rank = first.rank() as isize;
    let axis = if axis < 0 { axis + rank } else { axis };
    if axis < 0 || axis >= rank {
        return Err(Error::ShapeMismatch(format!(
            "concatenate axis {} out of range for rank {}",
            axis, rank
        )));
    }
    let axis = axis as usize;
    let mut shape = first.shape.clone();
    shape[axis] = 0;
    for tensor in tensors {
        first.check_context(tensor)?;
        let compatible = tensor.rank() == first.rank()
            && tensor
                .shape
                .iter()
                .zip(&first.shape)
                .enumerate()
                .all(|(i, (a, b))| i == axis || a == b);
        if !compatible || tensor.dtype != first.dtype {
            return Err(Error::ShapeMismatch(format!(
                "cannot concatenate {} {:?} with {} {:?} along axis {}",
                first.dtype, first.shape, tensor.dtype, tensor.shape, axis
            )));
        }
        shape[axis] += tensor.shape[axis];
    }
    let inputs = tensors.iter().map(|t| t.id).collect();
    Ok(first
        .ctx
        .push(Op::Concatenate { axis }, inputs, first.dtype, shape))
}

/// Numpy broadcasting of two shapes.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Result<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut shape = vec![0; rank];
    for i in 0..rank {
        let da = if i + a.len() >= rank { a[i + a.len() - rank] } else { 1 };
        let db = if i + b.len() >= rank { b[i + b.len() - rank] } else { 1 };
        shape[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(Error::ShapeMismatch(format!(
                    "shapes {:?} and {:?} are not broadcast compatible",
                    a, b
                )))
            }
        };
    }
    Ok(shape)
}

/// Output shape of an NCX / KCX convolution.
pub fn convolution_output_shape(
    input: &[usize],
    filter: &[usize],
    attrs: &ConvolutionAttrs,
) -> Result<Vec<usize>> {
    if input.len() < 3 || filter.len() != input.len() {
        return Err(Error::ShapeMismatch(format!(
            "convolution needs input and filter of equal rank >= 3, got {:?} and {:?}",
            input, filter
        )));
    }
    let spatial = input.len() - 2;
    let params_ok = attrs.strides.len() == spatial
        && attrs.dilations.len() == spatial
        && attrs.pads_begin.len() == spatial
        && attrs.pads_end.len() == spatial;
    if !params_ok {
        return Err(Error::ShapeMismatch(format!(
            "convolution attributes {:?} do not match {} spatial dims",
            attrs, spatial
        )));
    }
    let group = attrs.group;
    if group == 0
        || !input[1].is_multiple_of(group)
        || !filter[0].is_multiple_of(group)
        || filter[1] * group != input[1]
    {
        return Err(Error::ShapeMismatch(format!(
            "convolution channels do not line up: input {:?}, filter {:?}, group {}",
            input, filter, group
        )));
    }

    let mut shape = vec![input[0], filter[0]];
    for i in 0..spatial {
        let stride = attrs.strides[i];
        let dilation = attrs.dilations[i];
        if stride == 0 || dilation == 0 {
            return Err(Error::ShapeMismatch(format!(
                "convolution stride and dilation must be positive, got {} and {}",
                stride, dilation
            )));
        }
        let padded = input[i + 2] + attrs.pads_begin[i] + attrs.pads_end[i];
        let dilated_kernel = (filter[i + 2].max(1) - 1) * dilation + 1;
        if filter[i + 2] == 0 || padded < dilated_kernel {
            return Err(Error::ShapeMismatch(format!(
                "convolution window {} does not fit padded extent {} on spatial axis {}",
                dilated_kernel, padded, i
            )));
        }
        shape.push((padded - dilated_kernel) / stride + 1);
    }
    Ok(shape)
}
