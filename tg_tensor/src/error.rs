//! Error types for tensor construction and algebra.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TensorError {
    /// A tensor must have at least one dimension.
    #[error("cannot have a tensor with no dimensions")]
    EmptyDimensions,

    /// Every dimension must be a positive integer.
    #[error("tensor dimensions must be positive, got {dims:?}")]
    NonPositiveDimension { dims: Vec<usize> },

    /// Fewer values were supplied than the shape requires.
    #[error("dimension lengths do not match: '{provided}' < '{expected}'")]
    ValueLength { provided: usize, expected: usize },

    /// Operand shapes cannot be broadcast to a common shape.
    #[error("unable to broadcast tensors with dimensions {padded:?}: 1 != '{actual}' != '{expected}'")]
    Broadcast {
        padded: Vec<Vec<usize>>,
        actual: usize,
        expected: usize,
    },

    /// Indices do not address the tensor (wrong rank, or nonzero leading
    /// entries beyond the tensor's rank).
    #[error("indices and dimensions do not match: '{indices}' != '{rank}'")]
    IndexRank { indices: usize, rank: usize },

    /// A flat or per-axis index falls outside the tensor.
    #[error("index exceeds length of tensor: '{index}' > '{max}'")]
    IndexOutOfRange { index: usize, max: usize },

    /// An axis sum named an axis the tensor does not have.
    #[error("cannot sum along axis '{axis}' of a rank-{rank} tensor")]
    AxisOutOfRange { axis: usize, rank: usize },

    /// An operation received no inputs.
    #[error("cannot compute operation: no inputs provided")]
    NoInputs,

    /// The tensor has no device buffer to read back.
    #[error("tensor has no device buffer")]
    NoDeviceBuffer,

    #[error(transparent)]
    Backend(#[from] tg_blas::BlasError),
}

pub type Result<T> = std::result::Result<T, TensorError>;
