use crate::graph::{Graph, GraphView, NodeId};
use crate::{OpError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// How the nodes behind a kernel's outputs are ordered for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ScheduleStrategy {
    /// Depth-first post-order from the outputs.
    #[default]
    DepthFirst,
    /// Level-by-level (Kahn) ordering; selected by the `poly_sch` build path.
    Polyhedral,
}

#[derive(Debug, Clone)]
pub struct Schedule {
    /// Nodes in an order where dependencies appear before dependents.
    pub topo: Vec<NodeId>,
    /// The requested output nodes (subset of topo, typically at the end).
    pub outputs: Vec<NodeId>,
    pub strategy: ScheduleStrategy,
}

/// Order the subgraph behind `outputs` with the given strategy.
pub fn schedule(graph: &Graph, outputs: &[NodeId], strategy: ScheduleStrategy) -> Result<Schedule> {
    match strategy {
        ScheduleStrategy::DepthFirst => {
            for &out in outputs {
                if graph.get(out).is_none() {
                    return Err(OpError::Graph("output node missing from graph"));
                }
            }
            Ok(Schedule {
                topo: graph.topo_sort(outputs),
                outputs: outputs.to_vec(),
                strategy,
            })
        }
        ScheduleStrategy::Polyhedral => topo_schedule(graph, outputs),
    }
}

/// Compute a topo order for the subgraph required to produce `outputs`.
///
/// - Only includes nodes reachable from outputs.
/// - Ensures dependencies appear before dependents.
/// - Detects cycles and dangling inputs.
pub fn topo_schedule(graph: &dyn GraphView, outputs: &[NodeId]) -> Result<Schedule> {
    // 1) Collect reachable nodes by reverse traversal (from outputs to inputs).
    let mut reachable: BTreeSet<NodeId> = BTreeSet::new();
    let mut stack: Vec<NodeId> = outputs.to_vec();

    while let Some(nid) = stack.pop() {
        if !reachable.insert(nid) {
            continue;
        }
        let n = graph
            .node(nid)
            .ok_or(OpError::Graph("node missing from graph"))?;
        for &inp in n.inputs.iter() {
            stack.push(inp);
        }
    }

    // 2) In-degrees within the reachable subgraph + adjacency (dep -> users).
    let mut indeg: BTreeMap<NodeId, usize> = BTreeMap::new();
    let mut users: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();

    for &nid in reachable.iter() {
        indeg.entry(nid).or_insert(0);
        let node = graph
            .node(nid)
            .ok_or(OpError::Graph("node missing from graph"))?;
        for &inp in node.inputs.iter() {
            *indeg.entry(nid).or_insert(0) += 1;
            users.entry(inp).or_default().push(nid);
        }
    }

    // 3) Kahn's algorithm.
    let mut q: VecDeque<NodeId> = indeg
        .iter()
        .filter(|&(_, &d)| d == 0)
        .map(|(&nid, _)| nid)
        .collect();

    let mut topo = Vec::with_capacity(reachable.len());
    while let Some(nid) = q.pop_front() {
        topo.push(nid);
        if let Some(us) = users.get(&nid) {
            for &u in us.iter() {
                if let Some(e) = indeg.get_mut(&u) {
                    *e -= 1;
                    if *e == 0 {
                        q.push_back(u);
                    }
                }
            }
        }
    }

    if topo.len() != reachable.len() {
        return Err(OpError::Graph("cycle detected in graph"));
    }

    Ok(Schedule {
        topo,
        outputs: outputs.to_vec(),
        strategy: ScheduleStrategy::Polyhedral,
    })
}
