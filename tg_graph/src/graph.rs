//! Graph registry and the topological-plus-distance scheduler.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;

use crate::error::{GraphError, Result};
use crate::node::{Node, NodeId};

#[derive(Default)]
struct GraphState {
    /// Registered nodes; replaced by the execution order once sorted.
    nodes: Vec<Node>,
    sorted: bool,
    /// The cone actually evaluated by the last forward pass.
    computed_plan: Vec<Node>,
    /// How many trailing entries of the plan are end nodes.
    output_count: usize,
}

/// A computational graph: a registry of nodes plus the bookkeeping of the
/// last forward pass. Cloning shares the graph.
#[derive(Clone)]
pub struct Graph {
    state: Arc<Mutex<GraphState>>,
}

impl Graph {
    pub(crate) fn empty() -> Graph {
        Graph {
            state: Arc::new(Mutex::new(GraphState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a node, invalidating the current sort.
    pub(crate) fn add_node(&self, node: Node) {
        let mut state = self.lock();
        state.nodes.push(node);
        state.sorted = false;
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.lock().nodes.iter().any(|n| n.id() == id)
    }

    /// The number of registered nodes.
    pub fn node_count(&self) -> usize {
        self.lock().nodes.len()
    }

    /// Sorts the whole graph into execution order unless already sorted.
    pub(crate) fn ensure_sorted(&self) -> Result<()> {
        let mut state = self.lock();
        if state.sorted {
            return Ok(());
        }

        let ordered = sort_nodes(&state.nodes, &[])?;
        debug!("sorted {} nodes into execution order", ordered.len());
        state.nodes = ordered;
        state.sorted = true;
        Ok(())
    }

    /// The execution order for the cone of the given end nodes, without
    /// touching the graph's own node order. With no end nodes the whole
    /// graph is ordered.
    pub fn sort_for(&self, end_nodes: &[Node]) -> Result<Vec<Node>> {
        let state = self.lock();
        sort_nodes(&state.nodes, end_nodes)
    }

    /// Filters the sorted node list down to the cone reachable from the
    /// requested outputs and records it as the computed plan.
    pub(crate) fn plan(&self, outputs: &[Node]) -> Vec<Node> {
        let mut cone = HashMap::new();
        for output in outputs {
            populate_discoverable(output, &mut cone);
        }

        let mut state = self.lock();
        let plan: Vec<Node> = state
            .nodes
            .iter()
            .filter(|node| cone.contains_key(&node.id()))
            .cloned()
            .collect();
        state.computed_plan = plan.clone();
        state.output_count = outputs.len();
        plan
    }

    /// The plan of the last forward pass, or `None` before any compute.
    pub(crate) fn computed_plan(&self) -> Option<(Vec<Node>, usize)> {
        let state = self.lock();
        if state.computed_plan.is_empty() {
            return None;
        }
        Some((state.computed_plan.clone(), state.output_count))
    }
}

/// Post-order DFS topological sort followed by the distance re-ordering.
///
/// Distances are computed in one pass over the reverse-topological order:
/// `d(n) = min over consumers c of (d(c) - 1)`, defaulting a consumer with no
/// recorded distance to 1 (which seeds requested end nodes at 0) and a node
/// with no consumers to 0. The final order is ascending by distance, so the
/// nodes furthest upstream of any output come first; nodes at equal
/// distance keep their reverse-topological relative order, which the
/// deterministic DFS seeding below makes stable.
fn sort_nodes(all: &[Node], end_nodes: &[Node]) -> Result<Vec<Node>> {
    let mut discoverable: HashMap<NodeId, Node> = HashMap::new();
    if end_nodes.is_empty() {
        for node in all {
            discoverable.insert(node.id(), node.clone());
        }
    } else {
        // Only descendants of the end nodes can be discovered; the rest do
        // not need to be computed.
        for end_node in end_nodes {
            populate_discoverable(end_node, &mut discoverable);
        }
    }

    let mut order: VecDeque<Node> = VecDeque::new();
    let mut emitted: HashSet<NodeId> = HashSet::new();

    // Seed the DFS from a deterministic source: registration order for a
    // full sort, the given end-node order for a cone sort. Every
    // discoverable node is reachable from these seeds, and ties in the
    // distance sort keep a stable relative order across runs.
    let seeds = if end_nodes.is_empty() { all } else { end_nodes };
    for seed in seeds {
        visit(seed, &mut discoverable, &mut emitted, &mut order)?;
    }

    let mut distances: HashMap<NodeId, i64> = HashMap::with_capacity(order.len());
    for node in &order {
        let distance = node
            .consumers()
            .iter()
            .map(|c| distances.get(c).copied().unwrap_or(1) - 1)
            .min()
            .unwrap_or(0);
        distances.insert(node.id(), distance);
    }

    let mut ordered: Vec<Node> = order.into();
    ordered.sort_by_key(|node| distances.get(&node.id()).copied().unwrap_or(0));
    Ok(ordered)
}

/// Visits a node's children before emitting the node, so every node lands
/// after its inputs. Emitted nodes are pushed to the front, leaving the
/// deque in reverse-topological order for the distance pass.
fn visit(
    node: &Node,
    discoverable: &mut HashMap<NodeId, Node>,
    emitted: &mut HashSet<NodeId>,
    order: &mut VecDeque<Node>,
) -> Result<()> {
    if emitted.contains(&node.id()) {
        return Ok(());
    }

    // A reachable node missing from the discoverable set means an edge
    // leaves the graph: the node set is not a DAG over this graph.
    if discoverable.remove(&node.id()).is_none() {
        return Err(GraphError::NotADag);
    }

    for child in node.children() {
        visit(child, discoverable, emitted, order)?;
    }

    order.push_front(node.clone());
    emitted.insert(node.id());
    Ok(())
}

/// Adds a node and all its descendants to the discoverable set.
fn populate_discoverable(node: &Node, discoverable: &mut HashMap<NodeId, Node>) {
    if discoverable.insert(node.id(), node.clone()).is_some() {
        return;
    }
    for child in node.children() {
        populate_discoverable(child, discoverable);
    }
}
