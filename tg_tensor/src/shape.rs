//! Row-major shape and index arithmetic.
//!
//! Shapes are plain `&[usize]` slices; tensors normalize theirs through
//! [`trim_leading_ones`] at construction.

use crate::error::{Result, TensorError};

/// Strips leading `1` dimensions while more than two dimensions remain, so
/// `[1, 1, 3]` becomes `[1, 3]`. Rank-1 and rank-2 shapes pass through
/// untouched; the last dimension is never trimmed.
pub(crate) fn trim_leading_ones(dims: &[usize]) -> Vec<usize> {
    let mut start = 0;
    while dims.len() - start > 2 && dims[start] == 1 {
        start += 1;
    }
    dims[start..].to_vec()
}

/// Computes the flat row-major index for per-dimension indices.
///
/// `indices` may carry extra leading entries, all of which must be zero; this
/// lets callers address a tensor whose leading `1` dimensions were trimmed
/// with indices of the original rank. The flat index follows
/// `((i_0 * d_1 + i_1) * d_2 + i_2) * ... + i_{r-1}`.
pub(crate) fn flattened_index(dims: &[usize], indices: &[usize]) -> Result<usize> {
    if indices.len() < dims.len() {
        return Err(TensorError::IndexRank {
            indices: indices.len(),
            rank: dims.len(),
        });
    }

    let start = indices.len() - dims.len();
    if indices[..start].iter().any(|&i| i != 0) {
        return Err(TensorError::IndexRank {
            indices: indices.len(),
            rank: dims.len(),
        });
    }

    let mut flattened = 0;
    for (axis, &dim) in dims.iter().enumerate() {
        let index = indices[start + axis];
        if index >= dim {
            return Err(TensorError::IndexOutOfRange {
                index,
                max: dim - 1,
            });
        }
        flattened = flattened * dim + index;
    }

    Ok(flattened)
}

/// Recovers the per-dimension indices of a flat row-major index.
pub(crate) fn expanded_indices(dims: &[usize], index: usize) -> Vec<usize> {
    let mut indices = vec![0; dims.len()];
    let mut product = 1;

    // Walked backward so the fastest-varying dimension is peeled off first.
    for axis in (0..dims.len()).rev() {
        indices[axis] = index / product % dims[axis];
        product *= dims[axis];
    }

    indices
}

/// Left-pads `dims` with ones up to `rank`.
pub(crate) fn pad_dims(dims: &[usize], rank: usize) -> Vec<usize> {
    let mut padded = vec![1; rank];
    padded[rank - dims.len()..].copy_from_slice(dims);
    padded
}

/// Resolves the common broadcast shape of already-padded operand shapes.
///
/// Per axis, from the right: the broadcast extent is the first non-1 extent
/// across the operands; every other operand must hold either `1` or that
/// extent there.
pub(crate) fn broadcast_dims(padded: &[Vec<usize>]) -> Result<Vec<usize>> {
    let rank = padded.first().map_or(0, Vec::len);
    let mut dims = vec![1; rank];

    for offset in 1..=rank {
        let axis = rank - offset;

        let mut extent = 1;
        let mut rest = 0;
        for (i, dims_k) in padded.iter().enumerate() {
            extent = dims_k[axis];
            rest = i;
            if extent != 1 {
                break;
            }
        }

        for dims_k in &padded[rest..] {
            let current = dims_k[axis];
            if current != 1 && current != extent {
                return Err(TensorError::Broadcast {
                    padded: padded.to_vec(),
                    actual: current,
                    expected: extent,
                });
            }
        }

        dims[axis] = extent;
    }

    Ok(dims)
}
