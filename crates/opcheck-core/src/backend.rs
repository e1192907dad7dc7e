//! Backend trait and Stream: the pluggable compute engine for graph evaluation.
//!
//! A `Backend` knows how to execute a single graph node (op + inputs → output).
//! A `Stream` binds a `Backend` to a lazy computation `Graph`. Operator
//! builders record nodes on a stream; a launch schedules the subgraph and
//! evaluates it against a fresh set of argument buffers, so one recorded graph
//! can be executed any number of times.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use smallvec::SmallVec;
use tracing::debug;

use crate::graph::{Graph, Node, NodeId, OpKind, TensorMeta};
use crate::schedule::{Schedule, ScheduleStrategy, schedule};
use crate::types::{DType, Shape};
use crate::{OpError, Result};

/// Materialized input data passed to a backend for evaluation.
pub struct NodeInput<'a> {
    pub data: &'a [f32],
    pub shape: &'a Shape,
    pub dtype: DType,
}

/// Pluggable compute backend.
///
/// Backends evaluate individual graph nodes. The `Stream` handles scheduling
/// and buffer management; the backend only needs to implement the actual
/// kernel dispatch.
pub trait Backend: Send + Sync {
    /// Human-readable backend name, used in diagnostics.
    fn name(&self) -> &'static str;

    /// Evaluate a single op node given its materialized inputs.
    fn eval_node(
        &self,
        op: &OpKind,
        inputs: &[NodeInput<'_>],
        output_meta: &TensorMeta,
    ) -> Result<Vec<f32>>;
}

/// A computation stream binding a graph to a backend.
pub struct Stream {
    graph: Mutex<Graph>,
    backend: Box<dyn Backend>,
}

impl Stream {
    /// Create a new stream with the given backend.
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            graph: Mutex::new(Graph::new()),
            backend,
        }
    }

    /// Add a constant node (data already known).
    pub fn add_constant(&self, data: Vec<f32>, meta: TensorMeta) -> NodeId {
        self.graph.lock().unwrap().add_constant(data, meta)
    }

    /// Add a kernel argument bound to the `index`-th launch buffer.
    pub fn add_parameter(&self, index: usize, meta: TensorMeta) -> NodeId {
        self.graph
            .lock()
            .unwrap()
            .add_node_raw(OpKind::Parameter { index }, SmallVec::new(), meta)
    }

    /// Add an operation node to the graph.
    ///
    /// CSE-eligible ops with identical (op, inputs, meta) are deduplicated.
    pub fn add_op(&self, op: OpKind, inputs: SmallVec<[NodeId; 3]>, meta: TensorMeta) -> NodeId {
        self.graph.lock().unwrap().intern_node(op, inputs, meta)
    }

    /// Order the subgraph behind `outputs` for execution.
    pub fn schedule(&self, outputs: &[NodeId], strategy: ScheduleStrategy) -> Result<Schedule> {
        let graph = self.graph.lock().unwrap();
        schedule(&graph, outputs, strategy)
    }

    /// Evaluate `schedule` with `args` bound to the parameter nodes.
    ///
    /// Returns one buffer per scheduled output, in order. Every result is
    /// rounded onto its node's dtype before dependents read it.
    pub fn run(&self, schedule: &Schedule, args: &[&[f32]]) -> Result<Vec<Vec<f32>>> {
        let graph = self.graph.lock().unwrap();
        debug!(
            backend = self.backend.name(),
            nodes = schedule.topo.len(),
            strategy = ?schedule.strategy,
            "evaluating schedule"
        );

        let mut buffers: HashMap<NodeId, Vec<f32>> = HashMap::with_capacity(schedule.topo.len());
        for &node_id in &schedule.topo {
            let node: &Node = graph
                .get(node_id)
                .ok_or(OpError::Graph("scheduled node missing from graph"))?;

            let mut result = match &node.op {
                OpKind::Constant => graph
                    .const_payload(node_id)
                    .ok_or(OpError::Graph("constant node without payload"))?
                    .to_vec(),
                OpKind::Parameter { index } => {
                    let arg = args.get(*index).ok_or_else(|| {
                        OpError::InvalidArgument(format!("missing kernel argument {index}"))
                    })?;
                    let expected = node.meta.shape.numel() as usize;
                    if arg.len() != expected {
                        return Err(OpError::InvalidArgument(format!(
                            "argument {index} has {} elements, shape {} needs {expected}",
                            arg.len(),
                            node.meta.shape
                        )));
                    }
                    arg.to_vec()
                }
                op => {
                    let mut inputs = Vec::with_capacity(node.inputs.len());
                    for input_id in &node.inputs {
                        let meta = &graph
                            .get(*input_id)
                            .ok_or(OpError::Graph("input node missing from graph"))?
                            .meta;
                        let data = buffers.get(input_id).ok_or(OpError::Graph(
                            "input node should be evaluated before dependents",
                        ))?;
                        inputs.push(NodeInput {
                            data: data.as_slice(),
                            shape: &meta.shape,
                            dtype: meta.dtype,
                        });
                    }
                    self.backend.eval_node(op, &inputs, &node.meta)?
                }
            };

            let dtype = node.meta.dtype;
            if dtype != DType::F32 {
                result.iter_mut().for_each(|v| *v = dtype.quantize(*v));
            }
            buffers.insert(node_id, result);
        }

        schedule
            .outputs
            .iter()
            .map(|id| {
                buffers
                    .get(id)
                    .cloned()
                    .ok_or(OpError::Graph("output node was not scheduled"))
            })
            .collect()
    }

    /// Textual listing of the scheduled nodes.
    pub fn render(&self, schedule: &Schedule) -> String {
        self.graph.lock().unwrap().render(&schedule.topo)
    }

    /// Get a clone of a graph node by ID.
    pub fn get_node(&self, id: NodeId) -> Option<Node> {
        self.graph.lock().unwrap().get(id).cloned()
    }

    /// Number of nodes in the graph.
    pub fn graph_node_count(&self) -> usize {
        self.graph.lock().unwrap().len()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

/// A fresh stream on the CPU reference backend.
///
/// Every test case builds on its own stream; nothing is shared between cases.
pub fn cpu_stream() -> Arc<Stream> {
    Arc::new(Stream::new(Box::new(crate::cpu_kernels::CpuRefBackend)))
}
