//! Per-node results of forward and gradient passes.
//!
//! Everything is keyed by node id. `outputs` and `adjoints` hold task
//! handles: a key is written once when its task is dispatched, and read after
//! the producing task completes. `gradients` holds the accumulated gradient
//! of each node, materialized once a gradient pass drains.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tg_tensor::Tensor;

use crate::error::{GraphError, Result};
use crate::node::{Node, NodeId};
use crate::pool::TaskHandle;

/// The contributions one node makes to its children's gradients, keyed by
/// child id, plus the node's own incoming delta under its own id.
pub type AdjointMap = HashMap<NodeId, Tensor>;

#[derive(Default)]
pub struct Results {
    outputs: RwLock<HashMap<NodeId, TaskHandle<Tensor>>>,
    adjoints: RwLock<HashMap<NodeId, TaskHandle<AdjointMap>>>,
    gradients: RwLock<HashMap<NodeId, Tensor>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl Results {
    pub(crate) fn new() -> Results {
        Results::default()
    }

    /// The forward value of a node, blocking while its task is pending.
    /// Fails when nothing has been computed (or bound) for the node.
    pub fn get_output(&self, node: &Node) -> Result<Tensor> {
        self.output(node.id())
    }

    pub(crate) fn output(&self, id: NodeId) -> Result<Tensor> {
        let handle = read(&self.outputs).get(&id).cloned();
        match handle {
            Some(handle) => handle.wait(),
            None => Err(GraphError::MissingOutput(id.raw())),
        }
    }

    pub(crate) fn put_output(&self, id: NodeId, handle: TaskHandle<Tensor>) {
        write(&self.outputs).insert(id, handle);
    }

    /// The adjoint contributions of a node, if a gradient task was
    /// dispatched for it; blocks while the task is pending.
    pub(crate) fn adjoints_of(&self, id: NodeId) -> Option<TaskHandle<AdjointMap>> {
        read(&self.adjoints).get(&id).cloned()
    }

    pub(crate) fn put_adjoints(&self, id: NodeId, handle: TaskHandle<AdjointMap>) {
        write(&self.adjoints).insert(id, handle);
    }

    /// The accumulated gradient of a node, or `None` when the node was not
    /// part of the last differentiated cone.
    pub fn get_gradient(&self, node: &Node) -> Option<Tensor> {
        read(&self.gradients).get(&node.id()).cloned()
    }

    pub(crate) fn set_gradient(&self, id: NodeId, gradient: Tensor) {
        write(&self.gradients).insert(id, gradient);
    }

    /// Drops every stored output, adjoint and gradient.
    pub fn clear(&self) {
        write(&self.outputs).clear();
        write(&self.adjoints).clear();
        write(&self.gradients).clear();
    }
}
