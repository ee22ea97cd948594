//! Shape helpers shared by the host kernels.

use kiln_core::{Error, Result, TensorValue};

/// Broadcast multiple shapes to a common output shape.
///
/// Implements NumPy-style broadcasting rules:
/// - Shapes are aligned from the rightmost dimension
/// - Dimensions match if they are equal or one of them is 1
/// - Missing dimensions in shorter shapes are treated as 1
///
/// # Example
///
/// ```text
/// [2, 3, 4] + [3, 4]    -> [2, 3, 4]
/// [2, 3, 4] + [2, 1, 4] -> [2, 3, 4]
/// [8, 1, 6, 1] + [7, 1, 5] -> [8, 7, 6, 5]
/// ```
pub fn broadcast_shapes(shapes: &[&[usize]]) -> Result<Vec<usize>> {
    let max_rank = shapes.iter().map(|s| s.len()).max().unwrap_or(0);
    let mut result = vec![1; max_rank];

    for shape in shapes {
        let offset = max_rank - shape.len();
        for (i, &dim) in shape.iter().enumerate() {
            let slot = &mut result[offset + i];
            if *slot == 1 {
                *slot = dim;
            } else if dim != 1 && dim != *slot {
                return Err(Error::Shape(format!(
                    "Cannot broadcast shapes: dimension mismatch at position {} (expected {} or 1, got {})",
                    offset + i,
                    slot,
                    dim
                )));
            }
        }
    }

    Ok(result)
}

/// For every element of `out_shape`, the flat index of the element of a
/// `src_shape` tensor that broadcasts onto it.
pub fn broadcast_source_indices(src_shape: &[usize], out_shape: &[usize]) -> Vec<usize> {
    let offset = out_shape.len() - src_shape.len();
    let src_strides = strides(src_shape);
    let total: usize = out_shape.iter().product();

    let mut indices = Vec::with_capacity(total);
    let mut position = vec![0usize; out_shape.len()];
    for _ in 0..total {
        let flat = src_shape
            .iter()
            .enumerate()
            .filter(|&(_, &dim)| dim != 1)
            .map(|(i, _)| position[offset + i] * src_strides[i])
            .sum();
        indices.push(flat);

        // Advance the row-major odometer.
        for axis in (0..out_shape.len()).rev() {
            position[axis] += 1;
            if position[axis] < out_shape[axis] {
                break;
            }
            position[axis] = 0;
        }
    }
    indices
}

/// Row-major strides of `shape`.
pub fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

/// Normalize an axis attribute against `rank`.
pub fn normalize_axis(op: &str, axis: i64, rank: usize) -> Result<usize> {
    let signed_rank = rank as i64;
    let normalized = if axis < 0 { axis + signed_rank } else { axis };
    if !(0..signed_rank).contains(&normalized) {
        return Err(Error::Kernel(format!(
            "{}: axis {} out of bounds for rank {}",
            op, axis, rank
        )));
    }
    Ok(normalized as usize)
}

/// Split `shape` around `axis` into `(outer, axis_dim, inner)` element counts.
pub fn split_at_axis(shape: &[usize], axis: usize) -> (usize, usize, usize) {
    let outer = shape[..axis].iter().product();
    let inner = shape[axis + 1..].iter().product();
    (outer, shape[axis], inner)
}

/// Integer values of an optional int32/int64 input.
pub fn int_input(op: &str, value: &TensorValue) -> Result<Vec<i64>> {
    value.to_i64_vec().ok_or_else(|| {
        Error::Type(format!(
            "{}: expected an int32 or int64 tensor, got {}",
            op,
            value.dtype.name()
        ))
    })
}

/// Input at `index`, or a kernel error naming the operator.
pub fn required_input<'a>(op: &str, inputs: &[&'a TensorValue], index: usize) -> Result<&'a TensorValue> {
    inputs.get(index).copied().ok_or_else(|| {
        Error::Kernel(format!(
            "{}: missing input {} (got {} inputs)",
            op,
            index,
            inputs.len()
        ))
    })
}
