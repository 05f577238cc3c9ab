//! Dense row-major tensor storage.

use std::fmt;

use tg_blas::{Access, BufferId, DeviceBuffer};

use crate::error::{Result, TensorError};
use crate::ops;
use crate::shape;

/// A row-major n-dimensional array of `f32` values.
///
/// Shape and length are fixed at construction; values change only through the
/// explicit `set`/`fill`/`increment` mutators or a device read-back. Leading
/// `1` dimensions are trimmed at construction while more than two dimensions
/// remain, so `Tensor::zeros(&[1, 1, 3])` has rank 2.
///
/// A tensor may lazily own a device-side buffer through the linear-algebra
/// facade; the buffer is released when the tensor drops it. Clones copy host
/// state only and start without a device buffer.
#[derive(Debug)]
pub struct Tensor {
    dims: Vec<usize>,
    len: usize,
    values: Vec<f32>,
    device: Option<DeviceBuffer>,
}

impl Clone for Tensor {
    fn clone(&self) -> Self {
        Tensor {
            dims: self.dims.clone(),
            len: self.len,
            values: self.values.clone(),
            device: None,
        }
    }
}

impl PartialEq for Tensor {
    /// Structural equality: dimensions and values, bit-exact on the floats.
    fn eq(&self, other: &Self) -> bool {
        self.dims == other.dims && self.values == other.values
    }
}

impl Tensor {
    /// Starts a builder for a tensor with the given dimensions.
    pub fn builder(dims: &[usize]) -> Builder {
        Builder {
            dims: dims.to_vec(),
            values: None,
        }
    }

    /// A tensor of the given dimensions filled with zeros.
    pub fn zeros(dims: &[usize]) -> Result<Tensor> {
        Tensor::builder(dims).build()
    }

    /// A tensor of the given dimensions filled with ones.
    pub fn ones(dims: &[usize]) -> Result<Tensor> {
        let mut ones = Tensor::zeros(dims)?;
        ones.fill(&[1.0])?;
        Ok(ones)
    }

    /// A single-element tensor holding `value`.
    pub fn scalar(value: f32) -> Tensor {
        Tensor {
            dims: vec![1],
            len: 1,
            values: vec![value],
            device: None,
        }
    }

    /// Broadcasts the given tensors to a common shape.
    ///
    /// Shapes are right-aligned and padded with ones; each axis extent must
    /// match the first non-1 extent across the operands or be 1. Returns
    /// freshly allocated tensors of the broadcast shape, where size-1 axes
    /// wrap back to index 0.
    pub fn broadcast(tensors: &[Tensor]) -> Result<Vec<Tensor>> {
        if tensors.is_empty() {
            return Err(TensorError::NoInputs);
        }

        let rank = tensors.iter().map(Tensor::rank).max().unwrap_or(1);
        let padded: Vec<Vec<usize>> = tensors
            .iter()
            .map(|t| shape::pad_dims(&t.dims, rank))
            .collect();
        let dims = shape::broadcast_dims(&padded)?;

        let mut broadcast = Vec::with_capacity(tensors.len());
        for (tensor, padded_dims) in tensors.iter().zip(&padded) {
            let mut result = Tensor::zeros(&dims)?;
            for i in 0..result.len {
                let indices = shape::expanded_indices(&dims, i);
                result.values[i] = tensor.broadcast_value(padded_dims, &indices);
            }
            broadcast.push(result);
        }

        Ok(broadcast)
    }

    /// Sums `tensor` along every axis (counted from the right) where its
    /// shape disagrees with `target_dims`, undoing a broadcast. Axes summed
    /// away keep length 1. Returns the input unchanged when no axis differs.
    pub fn unbroadcast(tensor: &Tensor, target_dims: &[usize]) -> Result<Tensor> {
        let rank = tensor.rank();
        let mut axes = Vec::new();

        for offset in 0..rank {
            let axis = rank - 1 - offset;
            let replicated = match target_dims.len().checked_sub(offset + 1) {
                Some(target_axis) => tensor.dims[axis] != target_dims[target_axis],
                // The tensor is longer than the target; the extra axes were
                // introduced by broadcasting.
                None => true,
            };
            if replicated {
                axes.push(axis);
            }
        }

        if axes.is_empty() {
            return Ok(tensor.clone());
        }

        ops::sum(tensor, &axes)
    }

    /// Whether any operand's dimensions differ from the first operand's.
    pub fn is_dims_mismatch(tensors: &[Tensor]) -> Result<bool> {
        let first = tensors.first().ok_or(TensorError::NoInputs)?;
        Ok(tensors.iter().any(|t| t.dims != first.dims))
    }

    /// The row-major dimensions.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// The number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// The number of values.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The backing values in row-major order.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Mutable access to the backing values.
    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    /// The value at per-dimension indices. Extra leading indices must be 0.
    pub fn get(&self, indices: &[usize]) -> Result<f32> {
        Ok(self.values[shape::flattened_index(&self.dims, indices)?])
    }

    /// The value at a flat row-major index.
    pub fn get_flat(&self, index: usize) -> Result<f32> {
        if index >= self.len {
            return Err(TensorError::IndexOutOfRange {
                index,
                max: self.len - 1,
            });
        }
        Ok(self.values[index])
    }

    /// Sets the value at per-dimension indices.
    pub fn set(&mut self, value: f32, indices: &[usize]) -> Result<()> {
        let flat = shape::flattened_index(&self.dims, indices)?;
        self.values[flat] = value;
        Ok(())
    }

    /// Sets the value at a flat row-major index.
    pub fn set_flat(&mut self, value: f32, index: usize) -> Result<()> {
        if index >= self.len {
            return Err(TensorError::IndexOutOfRange {
                index,
                max: self.len - 1,
            });
        }
        self.values[index] = value;
        Ok(())
    }

    /// Adds `value` to the entry at per-dimension indices.
    pub fn increment(&mut self, value: f32, indices: &[usize]) -> Result<()> {
        let flat = shape::flattened_index(&self.dims, indices)?;
        self.values[flat] += value;
        Ok(())
    }

    /// Replaces the values. A single value fills the whole tensor; otherwise
    /// exactly `len` values are required.
    pub fn fill(&mut self, values: &[f32]) -> Result<()> {
        if values.len() == 1 {
            self.values.fill(values[0]);
            return Ok(());
        }
        if values.len() != self.len {
            return Err(TensorError::ValueLength {
                provided: values.len(),
                expected: self.len,
            });
        }
        self.values.copy_from_slice(values);
        Ok(())
    }

    /// The id of this tensor's device buffer, allocating it on first use.
    pub fn device_buffer(&mut self, access: Access) -> Result<BufferId> {
        if let Some(buffer) = &self.device {
            return Ok(buffer.id());
        }
        let buffer = DeviceBuffer::allocate(access, &self.values)?;
        let id = buffer.id();
        self.device = Some(buffer);
        Ok(id)
    }

    /// Copies the device buffer's contents back into host values.
    pub fn read_from_device(&mut self) -> Result<()> {
        let buffer = self.device.as_ref().ok_or(TensorError::NoDeviceBuffer)?;
        let values = tg_blas::global().read_buffer(buffer.id(), self.len)?;
        self.values.copy_from_slice(&values);
        Ok(())
    }

    /// Drops the device buffer, releasing the allocation.
    pub fn release_device(&mut self) {
        self.device = None;
    }

    /// The value at broadcast indices, where axes of size 1 wrap to 0.
    ///
    /// `padded_dims` is this tensor's shape left-padded with ones to the
    /// broadcast rank; `indices` address the broadcast tensor.
    fn broadcast_value(&self, padded_dims: &[usize], indices: &[usize]) -> f32 {
        let mut flattened = indices[0] % padded_dims[0];
        for axis in 1..padded_dims.len() {
            flattened = flattened * padded_dims[axis] + indices[axis] % padded_dims[axis];
        }
        self.values[flattened]
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header: Vec<String> = self.dims.iter().map(usize::to_string).collect();
        writeln!(f, "<Tensor: shape=({})>", header.join(" x "))?;
        fmt_rows(f, &self.dims, &self.values, 0)
    }
}

fn fmt_rows(f: &mut fmt::Formatter<'_>, dims: &[usize], values: &[f32], indent: usize) -> fmt::Result {
    let pad = " ".repeat(indent);
    if dims.len() == 1 {
        let row: Vec<String> = values.iter().map(f32::to_string).collect();
        return writeln!(f, "{}[{}]", pad, row.join(", "));
    }

    writeln!(f, "{}[", pad)?;
    let stride = values.len() / dims[0];
    for chunk in values.chunks(stride) {
        fmt_rows(f, &dims[1..], chunk, indent + 1)?;
    }
    writeln!(f, "{}]", pad)
}

/// Builds a [`Tensor`] from dimensions and optional values.
pub struct Builder {
    dims: Vec<usize>,
    values: Option<Vec<f32>>,
}

impl Builder {
    /// Sets the values of the tensor. Extra trailing values beyond the
    /// tensor's length are discarded; too few values fail the build.
    pub fn values(mut self, values: Vec<f32>) -> Builder {
        self.values = Some(values);
        self
    }

    /// Builds the tensor, zero-filling when no values were supplied.
    pub fn build(self) -> Result<Tensor> {
        if self.dims.is_empty() {
            return Err(TensorError::EmptyDimensions);
        }
        if self.dims.contains(&0) {
            return Err(TensorError::NonPositiveDimension { dims: self.dims });
        }

        let dims = shape::trim_leading_ones(&self.dims);
        let len = dims.iter().product();

        let values = match self.values {
            None => vec![0.0; len],
            Some(mut values) => {
                if values.len() < len {
                    return Err(TensorError::ValueLength {
                        provided: values.len(),
                        expected: len,
                    });
                }
                values.truncate(len);
                values
            }
        };

        Ok(Tensor {
            dims,
            len,
            values,
            device: None,
        })
    }
}
