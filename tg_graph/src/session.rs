//! Sessions own graphs, results and the worker pool.
//!
//! A [`Session`] threads the engine's shared state explicitly: the list of
//! graphs, the current graph that newly constructed nodes register with, the
//! per-node [`Results`] store and the worker pool. A process-wide default is
//! available through [`Session::shared`] for the common single-session case.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use log::debug;

use tg_tensor::Tensor;

use crate::error::{GraphError, Result};
use crate::graph::Graph;
use crate::node::{Node, NodeKind};
use crate::pool::{TaskHandle, WorkerPool};
use crate::results::Results;

struct SessionState {
    graphs: Vec<Graph>,
    current: Graph,
}

struct SessionInner {
    state: Mutex<SessionState>,
    results: Arc<Results>,
    pool: WorkerPool,
}

/// An execution context for building and running computational graphs.
/// Cloning shares the session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

static SHARED: OnceLock<Session> = OnceLock::new();

impl Session {
    /// A fresh session with a single, current, default graph.
    pub fn new() -> Session {
        let graph = Graph::empty();
        Session {
            inner: Arc::new(SessionInner {
                state: Mutex::new(SessionState {
                    graphs: vec![graph.clone()],
                    current: graph,
                }),
                results: Arc::new(Results::new()),
                pool: WorkerPool::new(),
            }),
        }
    }

    /// The process-wide default session.
    pub fn shared() -> &'static Session {
        SHARED.get_or_init(Session::new)
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The graph that new nodes currently register with.
    pub fn current_graph(&self) -> Graph {
        self.state().current.clone()
    }

    /// The session's first graph.
    pub fn default_graph(&self) -> Graph {
        self.state().graphs[0].clone()
    }

    /// Creates a new graph in this session. The current graph is unchanged;
    /// switch with [`Session::set_current`].
    pub fn add_graph(&self) -> Graph {
        let graph = Graph::empty();
        self.state().graphs.push(graph.clone());
        graph
    }

    /// Makes `graph` the current graph.
    pub fn set_current(&self, graph: &Graph) {
        self.state().current = graph.clone();
    }

    /// Drops every graph and starts over with a fresh default graph.
    /// Stored results are left untouched; use [`Results::clear`] for those.
    pub fn clear(&self) {
        let mut state = self.state();
        let graph = Graph::empty();
        state.graphs = vec![graph.clone()];
        state.current = graph;
    }

    /// The per-node results of this session's passes.
    pub fn results(&self) -> &Results {
        &self.inner.results
    }

    // === Node construction ===

    /// A constant node holding `values`.
    pub fn constant(&self, values: Tensor) -> Node {
        self.register(NodeKind::Constant { values }, Vec::new())
    }

    /// A constant node holding a single value.
    pub fn scalar(&self, value: f32) -> Node {
        self.constant(Tensor::scalar(value))
    }

    /// A placeholder whose value is supplied per compute call.
    pub fn placeholder(&self) -> Node {
        self.register(NodeKind::Placeholder, Vec::new())
    }

    /// An element-wise addition of `children`.
    pub fn add(&self, children: &[Node]) -> Node {
        self.register(NodeKind::Add, children.to_vec())
    }

    /// An element-wise multiplication of `children`.
    pub fn mul(&self, children: &[Node]) -> Node {
        self.register(NodeKind::Mul, children.to_vec())
    }

    /// A matrix product of exactly two operands, transposing each operand
    /// when its flag is set.
    pub fn matmul(&self, a_transpose: bool, b_transpose: bool, a: &Node, b: &Node) -> Node {
        self.register(
            NodeKind::MatMul {
                a_transpose,
                b_transpose,
            },
            vec![a.clone(), b.clone()],
        )
    }

    fn register(&self, kind: NodeKind, children: Vec<Node>) -> Node {
        let node = Node::new(kind, children);
        for child in node.children() {
            child.register_consumer(node.id());
        }
        self.current_graph().add_node(node.clone());
        node
    }

    // === Execution ===

    /// Computes the requested output nodes, binding the given placeholder
    /// values first.
    ///
    /// The current graph is sorted topologically and then by distance from
    /// the outputs; only nodes in the outputs' cone are evaluated.
    /// Operations are dispatched to the worker pool, leaves resolve
    /// synchronously, and the call blocks until every dispatched node has
    /// completed.
    pub fn compute(&self, bindings: &[(Node, Tensor)], outputs: &[Node]) -> Result<()> {
        if outputs.is_empty() {
            return Ok(());
        }

        let current = self.current_graph();

        // Bindings for placeholders of other graphs are ignored.
        for (node, values) in bindings {
            if node.is_placeholder() && current.contains(node.id()) {
                self.inner
                    .results
                    .put_output(node.id(), TaskHandle::completed(values.clone()));
            }
        }

        current.ensure_sorted()?;
        let plan = current.plan(outputs);
        debug!(
            "computing {} of {} nodes for {} outputs",
            plan.len(),
            current.node_count(),
            outputs.len()
        );

        for node in &plan {
            let handle = if node.is_operation() {
                let results = Arc::clone(&self.inner.results);
                let task = node.clone();
                self.inner.pool.submit(move || task.forward(&results))
            } else {
                TaskHandle::completed(node.forward(&self.inner.results)?)
            };
            self.inner.results.put_output(node.id(), handle);
        }

        // Drain: every dispatched node must complete before returning.
        for node in &plan {
            self.inner
                .results
                .output(node.id())
                .map_err(GraphError::execution)?;
        }

        Ok(())
    }

    /// Computes the gradient of every node evaluated by the last forward
    /// pass, by reverse accumulation over the computed plan.
    pub fn gradient(&self) -> Result<()> {
        let current = self.current_graph();
        let (plan, output_count) = current.computed_plan().ok_or(GraphError::NotComputed)?;
        debug!(
            "differentiating {} nodes ({} end nodes)",
            plan.len(),
            output_count
        );

        // End nodes sit at the tail of the plan; walking the plan backward
        // processes them first with a seed delta of ones.
        let boundary = plan.len() - output_count;
        for (index, node) in plan.iter().enumerate().rev() {
            let is_end_node = index >= boundary;
            let handle = if node.is_operation() {
                let results = Arc::clone(&self.inner.results);
                let task = node.clone();
                self.inner
                    .pool
                    .submit(move || task.backward(&results, is_end_node))
            } else {
                TaskHandle::completed(node.backward(&self.inner.results, is_end_node)?)
            };
            self.inner.results.put_adjoints(node.id(), handle);
        }

        // Drain, then extract each node's own delta as its gradient.
        for node in &plan {
            let handle = self
                .inner
                .results
                .adjoints_of(node.id())
                .ok_or(GraphError::MissingOutput(node.id().raw()))?;
            let contributions = handle.wait().map_err(GraphError::execution)?;
            if let Some(gradient) = contributions.get(&node.id()) {
                self.inner.results.set_gradient(node.id(), gradient.clone());
            }
        }

        Ok(())
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}
