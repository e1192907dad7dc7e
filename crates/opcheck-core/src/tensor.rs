//! Tensor type: a lazy handle to a node in the computation graph.
//!
//! Operations on tensors record nodes on the owning stream and return a new
//! handle; a tensor is never modified after creation. Computation is deferred
//! until the stream runs a schedule containing the node.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::backend::Stream;
use crate::graph::{CmpOp, OpKind, TensorMeta};
use crate::schedule::ScheduleStrategy;
use crate::{DType, NodeId, OpError, Result, Shape};

/// A tensor handle.
///
/// Handles are cheap to clone and freely shared; they only carry the node id,
/// its metadata and the stream the node lives on.
#[derive(Clone)]
pub struct Tensor {
    node_id: NodeId,
    meta: TensorMeta,
    stream: Arc<Stream>,
}

impl Tensor {
    // ── Constructors ────────────────────────────────────────────────────

    /// Kernel argument bound to the `index`-th launch buffer.
    pub fn parameter(stream: &Arc<Stream>, index: usize, shape: &Shape, dtype: DType) -> Self {
        let meta = TensorMeta::new(shape.clone(), dtype);
        let node_id = stream.add_parameter(index, meta.clone());
        Self {
            node_id,
            meta,
            stream: Arc::clone(stream),
        }
    }

    /// Constant tensor filled with `value` (rounded onto `dtype`).
    pub fn full(stream: &Arc<Stream>, shape: &Shape, dtype: DType, value: f32) -> Self {
        let n = shape.numel() as usize;
        Self::constant(stream, vec![dtype.quantize(value); n], shape, dtype)
    }

    /// Constant tensor from host data.
    pub fn from_data(
        stream: &Arc<Stream>,
        data: &[f32],
        shape: &Shape,
        dtype: DType,
    ) -> Result<Self> {
        let expected = shape.numel() as usize;
        if data.len() != expected {
            return Err(OpError::InvalidArgument(format!(
                "data length {} does not match shape {} (expected {})",
                data.len(),
                shape,
                expected,
            )));
        }
        let data = data.iter().map(|&x| dtype.quantize(x)).collect();
        Ok(Self::constant(stream, data, shape, dtype))
    }

    fn constant(stream: &Arc<Stream>, data: Vec<f32>, shape: &Shape, dtype: DType) -> Self {
        let meta = TensorMeta::new(shape.clone(), dtype);
        let node_id = stream.add_constant(data, meta.clone());
        Self {
            node_id,
            meta,
            stream: Arc::clone(stream),
        }
    }

    fn lazy_op(
        &self,
        op: OpKind,
        inputs: SmallVec<[NodeId; 3]>,
        shape: Shape,
        dtype: DType,
    ) -> Self {
        let meta = TensorMeta::new(shape, dtype);
        let node_id = self.stream.add_op(op, inputs, meta.clone());
        Tensor {
            node_id,
            meta,
            stream: Arc::clone(&self.stream),
        }
    }

    fn check_same_stream(&self, rhs: &Tensor) -> Result<()> {
        if Arc::ptr_eq(&self.stream, &rhs.stream) {
            Ok(())
        } else {
            Err(OpError::InvalidArgument(
                "tensors belong to different streams".into(),
            ))
        }
    }

    fn check_same_dtype(&self, rhs: &Tensor) -> Result<()> {
        if self.dtype() != rhs.dtype() {
            return Err(OpError::DtypeMismatch {
                lhs: self.dtype(),
                rhs: rhs.dtype(),
            });
        }
        Ok(())
    }

    fn binary(&self, op: OpKind, rhs: &Tensor) -> Result<Tensor> {
        self.check_same_stream(rhs)?;
        self.check_same_dtype(rhs)?;
        let shape = Shape::broadcast_shapes(self.shape(), rhs.shape()).ok_or_else(|| {
            OpError::ShapeMismatch {
                expected: self.shape().0.clone(),
                got: rhs.shape().0.clone(),
            }
        })?;
        Ok(self.lazy_op(
            op,
            SmallVec::from_slice(&[self.node_id, rhs.node_id]),
            shape,
            self.dtype(),
        ))
    }

    fn unary(&self, op: OpKind, dtype: DType) -> Tensor {
        self.lazy_op(
            op,
            SmallVec::from_slice(&[self.node_id]),
            self.shape().clone(),
            dtype,
        )
    }

    // ── Elementwise ops ─────────────────────────────────────────────────

    /// Element-wise subtraction (broadcasting).
    pub fn sub(&self, rhs: &Tensor) -> Result<Tensor> {
        self.binary(OpKind::Sub, rhs)
    }

    /// Element-wise multiplication (broadcasting).
    pub fn mul(&self, rhs: &Tensor) -> Result<Tensor> {
        self.binary(OpKind::Mul, rhs)
    }

    /// Element-wise minimum (broadcasting, NaN-propagating).
    pub fn minimum(&self, rhs: &Tensor) -> Result<Tensor> {
        self.binary(OpKind::Minimum, rhs)
    }

    pub fn abs(&self) -> Tensor {
        self.unary(OpKind::Abs, self.dtype())
    }

    /// Natural logarithm.
    pub fn log(&self) -> Tensor {
        self.unary(OpKind::Log, self.dtype())
    }

    /// Multiply by a scalar.
    pub fn scale(&self, factor: f32) -> Tensor {
        self.unary(OpKind::Scale { factor }, self.dtype())
    }

    /// Convert to `dtype`. Casting to the current dtype returns `self`.
    pub fn cast(&self, dtype: DType) -> Tensor {
        if dtype == self.dtype() {
            return self.clone();
        }
        self.unary(OpKind::Cast { to: dtype }, dtype)
    }

    /// `out[i] = if self[i] <cmp> threshold { on_true[i] } else { on_false[i] }`.
    ///
    /// The branches must share shape and dtype with each other and with
    /// `self`'s shape; the result takes the branch dtype.
    pub fn select(
        &self,
        cmp: CmpOp,
        threshold: f32,
        on_true: &Tensor,
        on_false: &Tensor,
    ) -> Result<Tensor> {
        self.check_same_stream(on_true)?;
        self.check_same_stream(on_false)?;
        on_true.check_same_dtype(on_false)?;
        for branch in [on_true, on_false] {
            if branch.shape() != self.shape() {
                return Err(OpError::ShapeMismatch {
                    expected: self.shape().0.clone(),
                    got: branch.shape().0.clone(),
                });
            }
        }
        Ok(self.lazy_op(
            OpKind::Select { cmp, threshold },
            SmallVec::from_slice(&[self.node_id, on_true.node_id, on_false.node_id]),
            self.shape().clone(),
            on_true.dtype(),
        ))
    }

    // ── Reductions ──────────────────────────────────────────────────────

    /// Sum over normalized `axes`.
    pub fn sum(&self, axes: &[usize], keepdims: bool) -> Result<Tensor> {
        self.reduce(
            OpKind::Sum {
                axes: axes.to_vec(),
                keepdims,
            },
            axes,
            keepdims,
        )
    }

    /// Logical-or over normalized `axes`. The result is always `Bool`.
    pub fn any(&self, axes: &[usize], keepdims: bool) -> Result<Tensor> {
        self.reduce(
            OpKind::Any {
                axes: axes.to_vec(),
                keepdims,
            },
            axes,
            keepdims,
        )
    }

    fn reduce(&self, op: OpKind, axes: &[usize], keepdims: bool) -> Result<Tensor> {
        let ndim = self.shape().ndim();
        if let Some(&bad) = axes.iter().find(|&&ax| ax >= ndim) {
            return Err(OpError::UnsupportedAxis {
                axis: bad as i64,
                ndim,
            });
        }
        let shape = self.shape().reduced(axes, keepdims);
        let dtype = match op {
            OpKind::Any { .. } => DType::Bool,
            _ => self.dtype(),
        };
        Ok(self.lazy_op(op, SmallVec::from_slice(&[self.node_id]), shape, dtype))
    }

    // ── Evaluation ──────────────────────────────────────────────────────

    /// Evaluate this tensor with `args` bound to the stream's parameters.
    pub fn run(&self, args: &[&[f32]]) -> Result<Vec<f32>> {
        let schedule = self
            .stream
            .schedule(&[self.node_id], ScheduleStrategy::DepthFirst)?;
        let mut outputs = self.stream.run(&schedule, args)?;
        outputs
            .pop()
            .ok_or(OpError::Graph("schedule produced no output"))
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn shape(&self) -> &Shape {
        &self.meta.shape
    }

    pub fn dtype(&self) -> DType {
        self.meta.dtype
    }

    pub fn meta(&self) -> &TensorMeta {
        &self.meta
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn stream(&self) -> &Arc<Stream> {
        &self.stream
    }

    pub fn numel(&self) -> i64 {
        self.shape().numel()
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("node_id", &self.node_id)
            .field("shape", self.shape())
            .field("dtype", &self.dtype())
            .finish()
    }
}
