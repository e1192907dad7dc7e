//! Lazy computation graph IR.
//!
//! Operator builders record primitive ops as nodes in this graph. Nothing is
//! computed until a [`crate::backend::Stream`] schedules the subgraph behind
//! an output and dispatches it to a backend.

use crate::types::{DType, Shape};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Unique identifier for a node in the computation graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    pub fn index(self) -> u64 {
        self.0
    }
}

/// Metadata about a tensor (known before materialization).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorMeta {
    pub shape: Shape,
    pub dtype: DType,
}

impl TensorMeta {
    pub fn new(shape: Shape, dtype: DType) -> Self {
        Self { shape, dtype }
    }
}

/// A node in the lazy computation graph.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub op: OpKind,
    pub inputs: SmallVec<[NodeId; 3]>,
    pub meta: TensorMeta,
}

/// Elementwise comparison used by [`OpKind::Select`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Lt,
    Le,
}

impl CmpOp {
    pub fn apply(self, lhs: f32, rhs: f32) -> bool {
        match self {
            CmpOp::Lt => lhs < rhs,
            CmpOp::Le => lhs <= rhs,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
        }
    }
}

/// The set of primitive operations supported by the graph IR.
#[derive(Clone, Debug)]
pub enum OpKind {
    // ── Sources ─────────────────────────────────────────────────────────
    /// Constant tensor (payload stored in the graph).
    Constant,
    /// Kernel argument, bound to the `index`-th input buffer at launch.
    Parameter { index: usize },

    // ── Elementwise ─────────────────────────────────────────────────────
    /// Broadcasting binary ops.
    Sub,
    Mul,
    Minimum,
    Abs,
    Log,
    /// Multiply every element by a scalar.
    Scale { factor: f32 },
    /// Convert to another dtype, rounding onto the target's value set.
    Cast { to: DType },
    /// Inputs `[value, on_true, on_false]`:
    /// `out[i] = if value[i] <cmp> threshold { on_true[i] } else { on_false[i] }`.
    Select { cmp: CmpOp, threshold: f32 },

    // ── Reductions ──────────────────────────────────────────────────────
    /// Sum over normalized `axes`.
    Sum { axes: Vec<usize>, keepdims: bool },
    /// Logical-or over normalized `axes`.
    Any { axes: Vec<usize>, keepdims: bool },
}

impl OpKind {
    /// Short mnemonic used when rendering the graph.
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::Constant => "const",
            OpKind::Parameter { .. } => "param",
            OpKind::Sub => "sub",
            OpKind::Mul => "mul",
            OpKind::Minimum => "minimum",
            OpKind::Abs => "abs",
            OpKind::Log => "log",
            OpKind::Scale { .. } => "muls",
            OpKind::Cast { .. } => "cast",
            OpKind::Select { .. } => "select",
            OpKind::Sum { .. } => "reduce_sum",
            OpKind::Any { .. } => "reduce_or",
        }
    }

    /// Sources must never be deduplicated: two constants with identical data
    /// can still be bound to different uses, and every parameter is a
    /// distinct kernel argument.
    pub fn is_cse_eligible(&self) -> bool {
        !matches!(self, OpKind::Constant | OpKind::Parameter { .. })
    }

    fn attrs(&self) -> Option<String> {
        match self {
            OpKind::Parameter { index } => Some(format!("index={index}")),
            OpKind::Scale { factor } => Some(format!("factor={factor}")),
            OpKind::Cast { to } => Some(format!("to={to}")),
            OpKind::Select { cmp, threshold } => {
                Some(format!("cond=value {} {threshold:e}", cmp.symbol()))
            }
            OpKind::Sum { axes, keepdims } | OpKind::Any { axes, keepdims } => {
                Some(format!("axes={axes:?}, keepdims={keepdims}"))
            }
            _ => None,
        }
    }
}

/// Read-only access to graph nodes, used by the schedulers.
pub trait GraphView {
    fn node(&self, id: NodeId) -> Option<&Node>;
}

/// The computation graph arena.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    next_id: u64,
    cse: HashMap<CseKey, NodeId>,
    const_payloads: HashMap<NodeId, Vec<f32>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a constant node holding `payload`.
    pub fn add_constant(&mut self, payload: Vec<f32>, meta: TensorMeta) -> NodeId {
        let id = self.add_node_raw(OpKind::Constant, SmallVec::new(), meta);
        self.const_payloads.insert(id, payload);
        id
    }

    /// Add a node without CSE.
    pub fn add_node_raw(
        &mut self,
        op: OpKind,
        inputs: SmallVec<[NodeId; 3]>,
        meta: TensorMeta,
    ) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.push(Node {
            id,
            op,
            inputs,
            meta,
        });
        id
    }

    /// Add a node, reusing an existing identical node when the op is pure.
    pub fn intern_node(
        &mut self,
        op: OpKind,
        inputs: SmallVec<[NodeId; 3]>,
        meta: TensorMeta,
    ) -> NodeId {
        if !op.is_cse_eligible() {
            return self.add_node_raw(op, inputs, meta);
        }

        let mut inputs = inputs;
        normalize_inputs_for_cse(&op, &mut inputs);

        let key = CseKey {
            op_key: OpKey::from_op(&op),
            inputs: inputs.clone(),
            meta: meta.clone(),
        };
        if let Some(&existing) = self.cse.get(&key) {
            return existing;
        }

        let id = self.add_node_raw(op, inputs, meta);
        self.cse.insert(key, id);
        id
    }

    pub fn const_payload(&self, id: NodeId) -> Option<&[f32]> {
        self.const_payloads.get(&id).map(|v| v.as_slice())
    }

    /// Get a node by ID.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize).filter(|n| n.id == id)
    }

    /// Depth-first post-order of the graph rooted at `outputs`.
    pub fn topo_sort(&self, outputs: &[NodeId]) -> Vec<NodeId> {
        let mut visited = std::collections::HashSet::new();
        let mut order = Vec::new();

        for &out in outputs {
            self.topo_visit(out, &mut visited, &mut order);
        }

        order
    }

    fn topo_visit(
        &self,
        id: NodeId,
        visited: &mut std::collections::HashSet<NodeId>,
        order: &mut Vec<NodeId>,
    ) {
        if !visited.insert(id) {
            return;
        }
        if let Some(node) = self.get(id) {
            for &input in &node.inputs {
                self.topo_visit(input, visited, order);
            }
        }
        order.push(id);
    }

    /// Render the nodes in `order` as one instruction per line.
    pub fn render(&self, order: &[NodeId]) -> String {
        let mut out = String::new();
        for &id in order {
            let Some(node) = self.get(id) else {
                continue;
            };
            let args = node
                .inputs
                .iter()
                .map(|i| format!("%{}", i.0))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = write!(out, "%{} = {}({args})", id.0, node.op.name());
            if let Some(attrs) = node.op.attrs() {
                let _ = write!(out, " {{{attrs}}}");
            }
            let _ = writeln!(out, " : {}{}", node.meta.dtype, node.meta.shape);
        }
        out
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl GraphView for Graph {
    fn node(&self, id: NodeId) -> Option<&Node> {
        self.get(id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum OpKey {
    Sub,
    Mul,
    Minimum,
    Abs,
    Log,
    Scale { factor_bits: u32 },
    Cast { to: DType },
    Select { cmp: CmpOp, threshold_bits: u32 },
    Sum { axes: Vec<usize>, keepdims: bool },
    Any { axes: Vec<usize>, keepdims: bool },
    Source,
}

impl OpKey {
    fn from_op(op: &OpKind) -> Self {
        match op {
            OpKind::Constant | OpKind::Parameter { .. } => OpKey::Source,
            OpKind::Sub => OpKey::Sub,
            OpKind::Mul => OpKey::Mul,
            OpKind::Minimum => OpKey::Minimum,
            OpKind::Abs => OpKey::Abs,
            OpKind::Log => OpKey::Log,
            OpKind::Scale { factor } => OpKey::Scale {
                factor_bits: factor.to_bits(),
            },
            OpKind::Cast { to } => OpKey::Cast { to: *to },
            OpKind::Select { cmp, threshold } => OpKey::Select {
                cmp: *cmp,
                threshold_bits: threshold.to_bits(),
            },
            OpKind::Sum { axes, keepdims } => OpKey::Sum {
                axes: axes.clone(),
                keepdims: *keepdims,
            },
            OpKind::Any { axes, keepdims } => OpKey::Any {
                axes: axes.clone(),
                keepdims: *keepdims,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CseKey {
    op_key: OpKey,
    inputs: SmallVec<[NodeId; 3]>,
    meta: TensorMeta,
}

fn normalize_inputs_for_cse(op: &OpKind, inputs: &mut SmallVec<[NodeId; 3]>) {
    if matches!(op, OpKind::Mul | OpKind::Minimum) && inputs.len() == 2 && inputs[0].0 > inputs[1].0
    {
        inputs.swap(0, 1);
    }
}
