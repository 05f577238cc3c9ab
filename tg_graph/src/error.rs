//! Error types for graph construction and execution.

use thiserror::Error;

use tg_blas::BlasError;
use tg_tensor::TensorError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// The node set cannot be ordered; an edge leaves the discoverable set.
    #[error("unable to sort the graph: graph is not directed")]
    NotADag,

    /// `gradient` was called before a forward pass.
    #[error("the graph has not been computed, so the gradient cannot be computed")]
    NotComputed,

    /// A node's value was requested before anything produced it.
    #[error("no value has been computed for node '{0}'")]
    MissingOutput(u64),

    /// Matrix multiplication over a non-2-D operand.
    #[error("can only multiply 2-D tensors, got rank {0}")]
    NotTwoDimensional(usize),

    /// Matrix multiplication with disagreeing inner dimensions.
    #[error("incompatible inner dimension: '{0}' != '{1}'")]
    InnerDimension(usize, usize),

    /// A worker task failed; the underlying error is preserved.
    #[error("node computation failed: {0}")]
    Execution(Box<GraphError>),

    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error(transparent)]
    Backend(#[from] BlasError),
}

impl GraphError {
    /// Wraps a drained task failure.
    pub(crate) fn execution(error: GraphError) -> GraphError {
        GraphError::Execution(Box::new(error))
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
