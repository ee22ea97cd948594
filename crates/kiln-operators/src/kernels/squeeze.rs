//! Squeeze and Unsqueeze: remove or insert size-1 dimensions.
//!
//! Up to opset 12 the axes are an attribute; from opset 13 they arrive as an
//! input. Both kernels accept either form.

use crate::helpers::{int_input, normalize_axis, required_input};
use crate::kernels::{ALL_TYPES, INDEX_TYPES};
use kiln_core::{
    ArgSlot, Error, KernelCreateInfo, KernelDefBuilder, KernelInfo, OpKernel, Result,
    TensorValue, VersionRange,
};

fn axes_from(op: &str, attribute: &Option<Vec<i64>>, inputs: &[&TensorValue]) -> Result<Option<Vec<i64>>> {
    match inputs.get(1) {
        Some(value) => Ok(Some(int_input(op, value)?)),
        None => Ok(attribute.clone()),
    }
}

/// Squeeze kernel. Without axes, every size-1 dimension is removed.
#[derive(Debug, Clone, Default)]
pub struct SqueezeKernel {
    axes: Option<Vec<i64>>,
}

impl SqueezeKernel {
    pub fn new(axes: Option<Vec<i64>>) -> Self {
        Self { axes }
    }
}

impl OpKernel for SqueezeKernel {
    fn compute(&self, inputs: &[&TensorValue]) -> Result<Vec<TensorValue>> {
        let input = required_input("Squeeze", inputs, 0)?;
        let rank = input.ndim();

        let shape: Vec<usize> = match axes_from("Squeeze", &self.axes, inputs)? {
            Some(axes) => {
                let axes = axes
                    .into_iter()
                    .map(|a| normalize_axis("Squeeze", a, rank))
                    .collect::<Result<Vec<_>>>()?;
                if let Some(&axis) = axes.iter().find(|&&a| input.shape[a] != 1) {
                    return Err(Error::Shape(format!(
                        "Squeeze: dimension {} has size {}, expected 1",
                        axis, input.shape[axis]
                    )));
                }
                input
                    .shape
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !axes.contains(i))
                    .map(|(_, &d)| d)
                    .collect()
            }
            None => input.shape.iter().copied().filter(|&d| d != 1).collect(),
        };

        Ok(vec![input.reshape(shape)?])
    }
}

/// Unsqueeze kernel. Axes index the output shape.
#[derive(Debug, Clone, Default)]
pub struct UnsqueezeKernel {
    axes: Option<Vec<i64>>,
}

impl UnsqueezeKernel {
    pub fn new(axes: Option<Vec<i64>>) -> Self {
        Self { axes }
    }
}

impl OpKernel for UnsqueezeKernel {
    fn compute(&self, inputs: &[&TensorValue]) -> Result<Vec<TensorValue>> {
        let input = required_input("Unsqueeze", inputs, 0)?;
        let axes = axes_from("Unsqueeze", &self.axes, inputs)?
            .ok_or_else(|| Error::Kernel("Unsqueeze: axes are required".to_string()))?;

        let out_rank = input.ndim() + axes.len();
        let mut inserted = axes
            .into_iter()
            .map(|a| normalize_axis("Unsqueeze", a, out_rank))
            .collect::<Result<Vec<_>>>()?;
        inserted.sort_unstable();
        if inserted.windows(2).any(|w| w[0] == w[1]) {
            return Err(Error::Kernel("Unsqueeze: repeated axis".to_string()));
        }

        let mut dims = input.shape.iter();
        let shape = (0..out_rank)
            .map(|i| {
                if inserted.binary_search(&i).is_ok() {
                    1
                } else {
                    dims.next().copied().unwrap_or(1)
                }
            })
            .collect();

        Ok(vec![input.reshape(shape)?])
    }
}

fn create_squeeze(info: &KernelInfo<'_>) -> Result<Box<dyn OpKernel>> {
    Ok(Box::new(SqueezeKernel::new(info.attr_ints("axes")?)))
}

fn create_unsqueeze(info: &KernelInfo<'_>) -> Result<Box<dyn OpKernel>> {
    Ok(Box::new(UnsqueezeKernel::new(info.attr_ints("axes")?)))
}

pub(crate) fn squeeze_create_info(provider: &str, version: VersionRange) -> KernelCreateInfo {
    KernelCreateInfo::new(
        KernelDefBuilder::new("Squeeze", provider)
            .version(version)
            .type_constraint("T", ArgSlot::Input(0), ALL_TYPES)
            .type_constraint("Taxes", ArgSlot::Input(1), INDEX_TYPES)
            .build(),
        create_squeeze,
    )
}

pub(crate) fn unsqueeze_create_info(provider: &str, version: VersionRange) -> KernelCreateInfo {
    KernelCreateInfo::new(
        KernelDefBuilder::new("Unsqueeze", provider)
            .version(version)
            .type_constraint("T", ArgSlot::Input(0), ALL_TYPES)
            .type_constraint("Taxes", ArgSlot::Input(1), INDEX_TYPES)
            .build(),
        create_unsqueeze,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::TensorData;

    fn slab() -> TensorValue {
        TensorValue::new(TensorData::F32(vec![1.0, 2.0, 3.0, 4.0]), vec![2, 1, 2])
    }

    #[test]
    fn test_squeeze_axes_attribute() {
        let out = SqueezeKernel::new(Some(vec![1])).compute(&[&slab()]).unwrap();
        assert_eq!(out[0].shape, vec![2, 2]);
        assert_eq!(out[0].data, slab().data);
    }

    #[test]
    fn test_squeeze_axes_input_overrides() {
        let axes = TensorValue::from_i64s(vec![-2]);
        let out = SqueezeKernel::default().compute(&[&slab(), &axes]).unwrap();
        assert_eq!(out[0].shape, vec![2, 2]);
    }

    #[test]
    fn test_squeeze_all_unit_dims() {
        let value = TensorValue::new(TensorData::I64(vec![7]), vec![1, 1]);
        let out = SqueezeKernel::default().compute(&[&value]).unwrap();
        assert!(out[0].shape.is_empty());
    }

    #[test]
    fn test_squeeze_rejects_non_unit_dim() {
        assert!(SqueezeKernel::new(Some(vec![0])).compute(&[&slab()]).is_err());
    }

    #[test]
    fn test_unsqueeze() {
        let value = TensorValue::new(TensorData::F32(vec![1.0, 2.0, 3.0, 4.0]), vec![2, 2]);
        let out = UnsqueezeKernel::new(Some(vec![0, -1])).compute(&[&value]).unwrap();
        assert_eq!(out[0].shape, vec![1, 2, 2, 1]);

        let axes = TensorValue::from_i64s(vec![1]);
        let out = UnsqueezeKernel::default().compute(&[&value, &axes]).unwrap();
        assert_eq!(out[0].shape, vec![2, 1, 2]);

        assert!(UnsqueezeKernel::default().compute(&[&value]).is_err());
    }
}
