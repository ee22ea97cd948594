//! Gather: select slices of `data` along `axis` by integer indices.

use crate::helpers::{int_input, normalize_axis, required_input, split_at_axis};
use crate::kernels::{ALL_TYPES, INDEX_TYPES};
use kiln_core::{
    ArgSlot, Error, KernelCreateInfo, KernelDefBuilder, KernelInfo, OpKernel, Result,
    TensorValue, VersionRange,
};

/// Gather kernel.
///
/// - **Inputs**: data (T), indices (Tind)
/// - **Outputs**: output (T) with shape `data[..axis] ++ indices ++ data[axis+1..]`
/// - **Attributes**: axis (int, default=0)
///
/// Negative indices count from the end of the axis.
#[derive(Debug, Clone)]
pub struct GatherKernel {
    axis: i64,
}

impl GatherKernel {
    pub fn new(axis: i64) -> Self {
        Self { axis }
    }
}

impl OpKernel for GatherKernel {
    fn compute(&self, inputs: &[&TensorValue]) -> Result<Vec<TensorValue>> {
        let data = required_input("Gather", inputs, 0)?;
        let indices = required_input("Gather", inputs, 1)?;

        let axis = normalize_axis("Gather", self.axis, data.ndim())?;
        let (outer, axis_dim, inner) = split_at_axis(&data.shape, axis);

        let positions = int_input("Gather", indices)?
            .into_iter()
            .map(|index| {
                let normalized = if index < 0 {
                    index + axis_dim as i64
                } else {
                    index
                };
                if (0..axis_dim as i64).contains(&normalized) {
                    Ok(normalized as usize)
                } else {
                    Err(Error::Kernel(format!(
                        "Gather: index {} out of bounds for axis {} of size {}",
                        index, axis, axis_dim
                    )))
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let mut flat = Vec::with_capacity(outer * positions.len() * inner);
        for o in 0..outer {
            for &p in &positions {
                let base = (o * axis_dim + p) * inner;
                flat.extend(base..base + inner);
            }
        }

        let mut shape = data.shape[..axis].to_vec();
        shape.extend_from_slice(&indices.shape);
        shape.extend_from_slice(&data.shape[axis + 1..]);

        Ok(vec![TensorValue::try_new(data.data.take(&flat), shape)?])
    }
}

fn create(info: &KernelInfo<'_>) -> Result<Box<dyn OpKernel>> {
    Ok(Box::new(GatherKernel::new(info.attr_int_or("axis", 0)?)))
}

pub(crate) fn create_info(provider: &str, version: VersionRange) -> KernelCreateInfo {
    KernelCreateInfo::new(
        KernelDefBuilder::new("Gather", provider)
            .version(version)
            .type_constraint("T", ArgSlot::Input(0), ALL_TYPES)
            .type_constraint("Tind", ArgSlot::Input(1), INDEX_TYPES)
            .build(),
        create,
    )
}
