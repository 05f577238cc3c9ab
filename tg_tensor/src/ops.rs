//! Element-wise primitives over tensors.
//!
//! Every operation broadcasts its inputs to a common shape first, then works
//! by flat index. Addition and multiplication are n-ary folds over their
//! identity; division and subtraction are left folds starting from the first
//! operand.

use std::borrow::Cow;

use crate::error::{Result, TensorError};
use crate::shape;
use crate::tensor::Tensor;

/// Broadcasts the inputs when their dimensions differ, borrowing them
/// untouched otherwise.
fn broadcast_inputs(inputs: &[Tensor]) -> Result<Cow<'_, [Tensor]>> {
    if inputs.is_empty() {
        return Err(TensorError::NoInputs);
    }

    if Tensor::is_dims_mismatch(inputs)? {
        Ok(Cow::Owned(Tensor::broadcast(inputs)?))
    } else {
        Ok(Cow::Borrowed(inputs))
    }
}

/// Element-wise sum of the inputs.
pub fn addition(inputs: &[Tensor]) -> Result<Tensor> {
    let inputs = broadcast_inputs(inputs)?;

    let mut result = Tensor::zeros(inputs[0].dims())?;
    for i in 0..result.len() {
        let mut sum = 0.0;
        for input in inputs.iter() {
            sum += input.values()[i];
        }
        result.values_mut()[i] = sum;
    }

    Ok(result)
}

/// Element-wise product of the inputs.
pub fn multiplication(inputs: &[Tensor]) -> Result<Tensor> {
    let inputs = broadcast_inputs(inputs)?;

    let mut result = Tensor::zeros(inputs[0].dims())?;
    for i in 0..result.len() {
        let mut product = 1.0;
        for input in inputs.iter() {
            product *= input.values()[i];
        }
        result.values_mut()[i] = product;
    }

    Ok(result)
}

/// Element-wise quotient of `numerator` by each of `denominators` in turn.
/// With no denominators the numerator is returned unchanged.
pub fn division(numerator: &Tensor, denominators: &[Tensor]) -> Result<Tensor> {
    if denominators.is_empty() {
        return Ok(numerator.clone());
    }

    let inputs = chain_inputs(numerator, denominators)?;

    let mut result = Tensor::zeros(inputs[0].dims())?;
    for i in 0..result.len() {
        let mut quotient = inputs[0].values()[i];
        for input in &inputs[1..] {
            quotient /= input.values()[i];
        }
        result.values_mut()[i] = quotient;
    }

    Ok(result)
}

/// Element-wise difference of `minuend` and each of `subtrahends` in turn.
/// With no subtrahends the minuend is returned unchanged.
pub fn subtraction(minuend: &Tensor, subtrahends: &[Tensor]) -> Result<Tensor> {
    if subtrahends.is_empty() {
        return Ok(minuend.clone());
    }

    let inputs = chain_inputs(minuend, subtrahends)?;

    let mut result = Tensor::zeros(inputs[0].dims())?;
    for i in 0..result.len() {
        let mut difference = inputs[0].values()[i];
        for input in &inputs[1..] {
            difference -= input.values()[i];
        }
        result.values_mut()[i] = difference;
    }

    Ok(result)
}

/// Sums `input` along the given axes.
///
/// The result keeps the input's rank, with each summed axis reduced to
/// length 1 (construction then trims leading ones as usual).
pub fn sum(input: &Tensor, axes: &[usize]) -> Result<Tensor> {
    let mut dims = input.dims().to_vec();
    for &axis in axes {
        if axis >= dims.len() {
            return Err(TensorError::AxisOutOfRange {
                axis,
                rank: dims.len(),
            });
        }
        dims[axis] = 1;
    }

    let mut result = Tensor::zeros(&dims)?;
    for i in 0..input.len() {
        let mut indices = shape::expanded_indices(input.dims(), i);
        // Collapsed axes always land on index 0, so replicated entries
        // accumulate into the same slot.
        for &axis in axes {
            indices[axis] = 0;
        }
        result.increment(input.values()[i], &indices)?;
    }

    Ok(result)
}

/// Builds the broadcast operand list `[first, rest...]` for the left folds.
fn chain_inputs(first: &Tensor, rest: &[Tensor]) -> Result<Vec<Tensor>> {
    let mut inputs = Vec::with_capacity(rest.len() + 1);
    inputs.push(first.clone());
    inputs.extend(rest.iter().cloned());

    Ok(broadcast_inputs(&inputs)?.into_owned())
}
