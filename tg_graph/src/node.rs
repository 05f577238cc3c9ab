//! Computation graph nodes.
//!
//! A node is a tagged variant with a stable id, an ordered child list and a
//! list of consumer back-edges. Children are shared handles (the graph is
//! acyclic by construction: a node only ever refers to nodes that already
//! exist); consumers are ids, appended once when a consuming operation is
//! registered.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use log::trace;

use tg_blas::Access;
use tg_tensor::{ops, Tensor};

use crate::error::{GraphError, Result};
use crate::results::{AdjointMap, Results};

/// Global counter for unique node ids.
static NODE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_node_id() -> NodeId {
    NodeId(NODE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Unique identifier of a node, monotonically assigned on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The operation a node performs.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// A fixed tensor payload.
    Constant { values: Tensor },
    /// A value supplied per compute call through the binding map.
    Placeholder,
    /// Element-wise n-ary addition.
    Add,
    /// Element-wise n-ary multiplication.
    Mul,
    /// Matrix product `C = op(A) * op(B)` with per-operand transpose flags.
    MatMul {
        a_transpose: bool,
        b_transpose: bool,
    },
}

pub(crate) struct NodeData {
    id: NodeId,
    kind: NodeKind,
    children: Vec<Node>,
    consumers: RwLock<Vec<NodeId>>,
}

/// A node in the computation graph. Cloning shares the underlying node.
#[derive(Clone)]
pub struct Node(Arc<NodeData>);

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.0.id)
            .field("kind", &self.0.kind)
            .field("children", &self.0.children.len())
            .finish()
    }
}

impl Node {
    pub(crate) fn new(kind: NodeKind, children: Vec<Node>) -> Node {
        Node(Arc::new(NodeData {
            id: next_node_id(),
            kind,
            children,
            consumers: RwLock::new(Vec::new()),
        }))
    }

    pub fn id(&self) -> NodeId {
        self.0.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.0.kind
    }

    /// The node's inputs, in definition order.
    pub fn children(&self) -> &[Node] {
        &self.0.children
    }

    /// Ids of the nodes consuming this node's output.
    pub fn consumers(&self) -> Vec<NodeId> {
        self.0
            .consumers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn register_consumer(&self, consumer: NodeId) {
        self.0
            .consumers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(consumer);
    }

    /// Whether the node is an operation (dispatched to the pool) rather than
    /// a leaf resolved synchronously.
    pub(crate) fn is_operation(&self) -> bool {
        matches!(
            self.0.kind,
            NodeKind::Add | NodeKind::Mul | NodeKind::MatMul { .. }
        )
    }

    pub(crate) fn is_placeholder(&self) -> bool {
        matches!(self.0.kind, NodeKind::Placeholder)
    }

    /// Produces this node's output from its children's outputs.
    pub(crate) fn forward(&self, results: &Results) -> Result<Tensor> {
        trace!("forward node {}", self.0.id);
        match &self.0.kind {
            NodeKind::Constant { values } => Ok(values.clone()),
            NodeKind::Placeholder => results.output(self.0.id),
            NodeKind::Add => Ok(ops::addition(&self.child_outputs(results)?)?),
            NodeKind::Mul => Ok(ops::multiplication(&self.child_outputs(results)?)?),
            NodeKind::MatMul {
                a_transpose,
                b_transpose,
            } => self.matmul_forward(results, *a_transpose, *b_transpose),
        }
    }

    /// Computes the contributions this node makes to its children's
    /// gradients, keyed by child id. The returned map also carries the
    /// node's own incoming delta under its own id.
    pub(crate) fn backward(&self, results: &Results, is_end_node: bool) -> Result<AdjointMap> {
        trace!("backward node {} (end={})", self.0.id, is_end_node);

        let delta = if is_end_node {
            Tensor::ones(results.output(self.0.id)?.dims())?
        } else {
            self.incoming_delta(results)?
        };

        let mut gradients = HashMap::new();
        gradients.insert(self.0.id, delta.clone());

        match &self.0.kind {
            NodeKind::Constant { .. } | NodeKind::Placeholder => {}
            NodeKind::Add => {
                for child in &self.0.children {
                    let child_output = results.output(child.id())?;
                    let contribution = Tensor::unbroadcast(&delta, child_output.dims())?;
                    gradients.insert(child.id(), contribution);
                }
            }
            NodeKind::Mul => {
                let output = results.output(self.0.id)?;
                for child in &self.0.children {
                    let child_output = results.output(child.id())?;
                    // Dividing the full product by the child stands in for
                    // the product of the other factors.
                    let others =
                        ops::division(&output, std::slice::from_ref(&child_output))?;
                    let contribution = ops::multiplication(&[delta.clone(), others])?;
                    gradients.insert(
                        child.id(),
                        Tensor::unbroadcast(&contribution, child_output.dims())?,
                    );
                }
            }
            NodeKind::MatMul {
                a_transpose,
                b_transpose,
            } => {
                self.matmul_backward(results, &delta, *a_transpose, *b_transpose, &mut gradients)?;
            }
        }

        Ok(gradients)
    }

    /// The element-wise sum of every contribution this node's consumers
    /// computed for it.
    fn incoming_delta(&self, results: &Results) -> Result<Tensor> {
        let mut incoming = Vec::new();
        for consumer in self.consumers() {
            let Some(handle) = results.adjoints_of(consumer) else {
                continue;
            };
            let contributions = handle.wait()?;
            if let Some(contribution) = contributions.get(&self.0.id) {
                incoming.push(contribution.clone());
            }
        }
        Ok(ops::addition(&incoming)?)
    }

    fn child_outputs(&self, results: &Results) -> Result<Vec<Tensor>> {
        self.0
            .children
            .iter()
            .map(|child| results.output(child.id()))
            .collect()
    }

    fn matmul_forward(&self, results: &Results, a_t: bool, b_t: bool) -> Result<Tensor> {
        let mut a = results.output(self.0.children[0].id())?;
        let mut b = results.output(self.0.children[1].id())?;
        let (m, n, k) = extract_dims(a.dims(), b.dims(), a_t, b_t)?;

        let a_buffer = a.device_buffer(Access::ReadOnly)?;
        let b_buffer = b.device_buffer(Access::ReadOnly)?;

        let mut c = Tensor::zeros(&[m, n])?;
        let c_buffer = c.device_buffer(Access::ReadWrite)?;

        let lda = if a_t { m } else { k };
        let ldb = if b_t { k } else { n };
        tg_blas::global().sgemm(a_buffer, b_buffer, c_buffer, a_t, b_t, m, n, k, lda, ldb, n)?;

        c.read_from_device()?;
        Ok(c)
    }

    /// Gradients of the matrix product: `dA = delta * op(B)^T` and
    /// `dB = op(A)^T * delta`, each transposed once more when the matching
    /// flag is set so it lands in the raw stored operand's layout. Every case
    /// folds the transposes into a single `sgemm` dispatch.
    fn matmul_backward(
        &self,
        results: &Results,
        delta: &Tensor,
        a_t: bool,
        b_t: bool,
        gradients: &mut AdjointMap,
    ) -> Result<()> {
        let mut a = results.output(self.0.children[0].id())?;
        let mut b = results.output(self.0.children[1].id())?;
        let (m, n, k) = extract_dims(a.dims(), b.dims(), a_t, b_t)?;

        let mut delta = delta.clone();
        let a_buffer = a.device_buffer(Access::ReadOnly)?;
        let b_buffer = b.device_buffer(Access::ReadOnly)?;
        let delta_buffer = delta.device_buffer(Access::ReadOnly)?;

        let a_ld = if a_t { m } else { k };
        let b_ld = if b_t { k } else { n };
        let blas = tg_blas::global();

        let mut da = Tensor::zeros(a.dims())?;
        let da_buffer = da.device_buffer(Access::ReadWrite)?;
        if a_t {
            // Raw A is k x m: dA = op(B) * delta^T.
            blas.sgemm(b_buffer, delta_buffer, da_buffer, b_t, true, k, m, n, b_ld, n, m)?;
        } else {
            blas.sgemm(delta_buffer, b_buffer, da_buffer, false, !b_t, m, k, n, n, b_ld, k)?;
        }
        da.read_from_device()?;

        let mut db = Tensor::zeros(b.dims())?;
        let db_buffer = db.device_buffer(Access::ReadWrite)?;
        if b_t {
            // Raw B is n x k: dB = delta^T * op(A).
            blas.sgemm(delta_buffer, a_buffer, db_buffer, true, a_t, n, k, m, n, a_ld, k)?;
        } else {
            blas.sgemm(a_buffer, delta_buffer, db_buffer, !a_t, false, k, n, m, a_ld, n, n)?;
        }
        db.read_from_device()?;

        gradients.insert(self.0.children[0].id(), da);
        gradients.insert(self.0.children[1].id(), db);
        Ok(())
    }
}

/// Resolves `(m, n, k)` from the operand shapes and transpose flags,
/// rejecting non-2-D operands and disagreeing inner dimensions.
fn extract_dims(
    a_dims: &[usize],
    b_dims: &[usize],
    a_t: bool,
    b_t: bool,
) -> Result<(usize, usize, usize)> {
    if a_dims.len() != 2 {
        return Err(GraphError::NotTwoDimensional(a_dims.len()));
    }
    if b_dims.len() != 2 {
        return Err(GraphError::NotTwoDimensional(b_dims.len()));
    }

    let (m, k) = if a_t {
        (a_dims[1], a_dims[0])
    } else {
        (a_dims[0], a_dims[1])
    };
    let (b_k, n) = if b_t {
        (b_dims[1], b_dims[0])
    } else {
        (b_dims[0], b_dims[1])
    };

    if k != b_k {
        return Err(GraphError::InnerDimension(k, b_k));
    }

    Ok((m, n, k))
}
