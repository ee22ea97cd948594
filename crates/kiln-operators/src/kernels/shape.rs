//! Shape: the dimensions of a tensor as a 1-D int64 tensor.

use crate::helpers::required_input;
use crate::kernels::ALL_TYPES;
use kiln_core::{
    ArgSlot, DataType, KernelCreateInfo, KernelDefBuilder, KernelInfo, OpKernel, Result,
    TensorValue, VersionRange,
};

/// Shape kernel. `start`/`end` (opset 15+) select a slice of the dimensions,
/// with negative values counting from the back and both clamped to the rank.
#[derive(Debug, Clone)]
pub struct ShapeKernel {
    start: i64,
    end: Option<i64>,
}

impl ShapeKernel {
    pub fn new(start: i64, end: Option<i64>) -> Self {
        Self { start, end }
    }
}

impl Default for ShapeKernel {
    fn default() -> Self {
        Self::new(0, None)
    }
}

fn clamp_bound(bound: i64, rank: i64) -> usize {
    let bound = if bound < 0 { bound + rank } else { bound };
    bound.clamp(0, rank) as usize
}

impl OpKernel for ShapeKernel {
    fn compute(&self, inputs: &[&TensorValue]) -> Result<Vec<TensorValue>> {
        let input = required_input("Shape", inputs, 0)?;
        let rank = input.ndim() as i64;

        let start = clamp_bound(self.start, rank);
        let end = clamp_bound(self.end.unwrap_or(rank), rank);
        let dims = input
            .shape
            .get(start..end.max(start))
            .unwrap_or_default()
            .iter()
            .map(|&d| d as i64)
            .collect();

        Ok(vec![TensorValue::from_i64s(dims)])
    }
}

fn create(info: &KernelInfo<'_>) -> Result<Box<dyn OpKernel>> {
    let start = info.attr_int_or("start", 0)?;
    let end = match info.node().attribute("end") {
        Some(_) => Some(info.attr_int_or("end", 0)?),
        None => None,
    };
    Ok(Box::new(ShapeKernel::new(start, end)))
}

pub(crate) fn create_info(provider: &str, version: VersionRange) -> KernelCreateInfo {
    KernelCreateInfo::new(
        KernelDefBuilder::new("Shape", provider)
            .version(version)
            .type_constraint("T", ArgSlot::Input(0), ALL_TYPES)
            .type_constraint("T1", ArgSlot::Output(0), &[DataType::I64])
            .build(),
        create,
    )
}
