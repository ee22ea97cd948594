//! Split: partition a tensor along one axis.

use crate::helpers::{int_input, normalize_axis, required_input, split_at_axis};
use crate::kernels::{ALL_TYPES, INDEX_TYPES};
use kiln_core::{
    ArgSlot, Error, KernelCreateInfo, KernelDefBuilder, KernelInfo, OpKernel, Result,
    TensorValue, VersionRange,
};

/// Split kernel.
///
/// Chunk sizes come from the `split` input (opset 13+), the `split`
/// attribute (earlier opsets), or an equal partition into one chunk per
/// output. With `num_outputs` (opset 18+) an uneven axis is allowed; the
/// last chunk is then smaller.
#[derive(Debug, Clone)]
pub struct SplitKernel {
    axis: i64,
    split: Option<Vec<i64>>,
    num_outputs: usize,
    allow_uneven: bool,
}

impl SplitKernel {
    pub fn new(axis: i64, num_outputs: usize) -> Self {
        Self {
            axis,
            split: None,
            num_outputs,
            allow_uneven: false,
        }
    }

    /// Use explicit chunk sizes.
    pub fn with_split(mut self, split: Vec<i64>) -> Self {
        self.split = Some(split);
        self
    }

    fn chunk_sizes(&self, axis_dim: usize, split_input: Option<&TensorValue>) -> Result<Vec<usize>> {
        let explicit = match split_input {
            Some(value) => Some(int_input("Split", value)?),
            None => self.split.clone(),
        };

        let sizes = match explicit {
            Some(sizes) => sizes
                .into_iter()
                .map(|s| {
                    usize::try_from(s)
                        .map_err(|_| Error::Kernel(format!("Split: negative chunk size {}", s)))
                })
                .collect::<Result<Vec<_>>>()?,
            None => self.equal_partition(axis_dim)?,
        };

        if sizes.len() != self.num_outputs || sizes.iter().sum::<usize>() != axis_dim {
            return Err(Error::Kernel(format!(
                "Split: chunk sizes {:?} do not partition an axis of size {} into {} outputs",
                sizes, axis_dim, self.num_outputs
            )));
        }
        Ok(sizes)
    }

    fn equal_partition(&self, axis_dim: usize) -> Result<Vec<usize>> {
        let n = self.num_outputs;
        if n == 0 {
            return Err(Error::Kernel("Split: node has no outputs".to_string()));
        }
        if axis_dim % n == 0 {
            return Ok(vec![axis_dim / n; n]);
        }
        if !self.allow_uneven {
            return Err(Error::Kernel(format!(
                "Split: axis of size {} cannot be split evenly into {} outputs",
                axis_dim, n
            )));
        }

        let chunk = axis_dim.div_ceil(n);
        let mut sizes = vec![chunk; n];
        let last = axis_dim.checked_sub(chunk * (n - 1)).ok_or_else(|| {
            Error::Kernel(format!(
                "Split: axis of size {} is too small for {} outputs",
                axis_dim, n
            ))
        })?;
        sizes[n - 1] = last;
        Ok(sizes)
    }
}

impl OpKernel for SplitKernel {
    fn compute(&self, inputs: &[&TensorValue]) -> Result<Vec<TensorValue>> {
        let input = required_input("Split", inputs, 0)?;
        let axis = normalize_axis("Split", self.axis, input.ndim())?;
        let (outer, axis_dim, inner) = split_at_axis(&input.shape, axis);
        let sizes = self.chunk_sizes(axis_dim, inputs.get(1).copied())?;

        let mut outputs = Vec::with_capacity(sizes.len());
        let mut offset = 0;
        for size in sizes {
            let mut flat = Vec::with_capacity(outer * size * inner);
            for o in 0..outer {
                let base = (o * axis_dim + offset) * inner;
                flat.extend(base..base + size * inner);
            }
            let mut shape = input.shape.clone();
            shape[axis] = size;
            outputs.push(TensorValue::try_new(input.data.take(&flat), shape)?);
            offset += size;
        }
        Ok(outputs)
    }
}

fn create(info: &KernelInfo<'_>) -> Result<Box<dyn OpKernel>> {
    let node = info.node();
    let mut kernel = SplitKernel::new(info.attr_int_or("axis", 0)?, node.outputs().len());
    if let Some(split) = info.attr_ints("split")? {
        kernel = kernel.with_split(split);
    }
    if let Some(num_outputs) = node.attr_int("num_outputs") {
        if usize::try_from(num_outputs).ok() != Some(node.outputs().len()) {
            return Err(Error::Attribute(format!(
                "Split '{}': num_outputs is {} but the node has {} outputs",
                node.name,
                num_outputs,
                node.outputs().len()
            )));
        }
        kernel.allow_uneven = true;
    }
    Ok(Box::new(kernel))
}

pub(crate) fn create_info(provider: &str, version: VersionRange) -> KernelCreateInfo {
    KernelCreateInfo::new(
        KernelDefBuilder::new("Split", provider)
            .version(version)
            .type_constraint("T", ArgSlot::Input(0), ALL_TYPES)
            .type_constraint("Tsplit", ArgSlot::Input(1), INDEX_TYPES)
            .build(),
        create,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::TensorData;

    fn arange(shape: Vec<usize>) -> TensorValue {
        let len = shape.iter().product::<usize>() as i64;
        TensorValue::new(TensorData::I64((0..len).collect()), shape)
    }

    #[test]
    fn test_equal_split_middle_axis() {
        let input = arange(vec![2, 3, 2]);
        let out = SplitKernel::new(1, 3).compute(&[&input]).unwrap();

        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|t| t.shape == vec![2, 1, 2]));
        assert_eq!(out[0].as_i64().unwrap(), &[0, 1, 6, 7]);
        assert_eq!(out[1].as_i64().unwrap(), &[2, 3, 8, 9]);
        assert_eq!(out[2].as_i64().unwrap(), &[4, 5, 10, 11]);
    }

    #[test]
    fn test_split_sizes_from_input() {
        let input = arange(vec![5]);
        let sizes = TensorValue::from_i64s(vec![2, 3]);
        let out = SplitKernel::new(0, 2).compute(&[&input, &sizes]).unwrap();
        assert_eq!(out[0].as_i64().unwrap(), &[0, 1]);
        assert_eq!(out[1].as_i64().unwrap(), &[2, 3, 4]);
    }

    #[test]
    fn test_uneven_split() {
        let input = arange(vec![5]);
        assert!(SplitKernel::new(0, 2).compute(&[&input]).is_err());

        let mut kernel = SplitKernel::new(0, 2);
        kernel.allow_uneven = true;
        let out = kernel.compute(&[&input]).unwrap();
        assert_eq!(out[0].shape, vec![3]);
        assert_eq!(out[1].shape, vec![2]);
    }

    #[test]
    fn test_split_attribute_must_partition_axis() {
        let input = arange(vec![4]);
        let kernel = SplitKernel::new(0, 2).with_split(vec![1, 2]);
        assert!(kernel.compute(&[&input]).is_err());
    }
}
