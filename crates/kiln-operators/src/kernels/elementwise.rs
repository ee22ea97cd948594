//! Elementwise kernels: Add (with broadcasting), Relu and Identity.

use crate::helpers::{broadcast_shapes, broadcast_source_indices, required_input};
use crate::kernels::ALL_TYPES;
use half::f16;
use kiln_core::{
    ArgSlot, DataType, Error, KernelCreateInfo, KernelDefBuilder, KernelInfo, OpKernel, Result,
    TensorData, TensorValue, VersionRange,
};

/// Element types the arithmetic kernels support.
pub(crate) const ADD_TYPES: &[DataType] = &[DataType::F32, DataType::F16, DataType::I64];
pub(crate) const RELU_TYPES: &[DataType] = &[DataType::F32, DataType::F16];

/// Add kernel with NumPy-style broadcasting.
#[derive(Debug, Clone, Default)]
pub struct AddKernel;

impl OpKernel for AddKernel {
    fn compute(&self, inputs: &[&TensorValue]) -> Result<Vec<TensorValue>> {
        let a = required_input("Add", inputs, 0)?;
        let b = required_input("Add", inputs, 1)?;
        if a.dtype != b.dtype {
            return Err(Error::Type(format!(
                "Add: operand types differ ({} vs {})",
                a.dtype.name(),
                b.dtype.name()
            )));
        }

        let shape = broadcast_shapes(&[&a.shape, &b.shape])?;
        let lhs = a.data.take(&broadcast_source_indices(&a.shape, &shape));
        let rhs = b.data.take(&broadcast_source_indices(&b.shape, &shape));

        let data = match (lhs, rhs) {
            (TensorData::F32(x), TensorData::F32(y)) => {
                TensorData::F32(x.iter().zip(&y).map(|(p, q)| p + q).collect())
            }
            (TensorData::F16(x), TensorData::F16(y)) => {
                TensorData::F16(x.iter().zip(&y).map(|(&p, &q)| p + q).collect())
            }
            (TensorData::I64(x), TensorData::I64(y)) => {
                TensorData::I64(x.iter().zip(&y).map(|(p, q)| p.wrapping_add(*q)).collect())
            }
            (other, _) => {
                return Err(Error::Unsupported(format!(
                    "Add: element type {}",
                    other.dtype().name()
                )))
            }
        };

        Ok(vec![TensorValue::try_new(data, shape)?])
    }
}

/// Relu kernel: `max(x, 0)`.
#[derive(Debug, Clone, Default)]
pub struct ReluKernel;

impl OpKernel for ReluKernel {
    fn compute(&self, inputs: &[&TensorValue]) -> Result<Vec<TensorValue>> {
        let x = required_input("Relu", inputs, 0)?;
        let data = match &x.data {
            TensorData::F32(v) => TensorData::F32(v.iter().map(|&e| e.max(0.0)).collect()),
            TensorData::F16(v) => TensorData::F16(
                v.iter()
                    .map(|&e| if e > f16::ZERO { e } else { f16::ZERO })
                    .collect(),
            ),
            other => {
                return Err(Error::Unsupported(format!(
                    "Relu: element type {}",
                    other.dtype().name()
                )))
            }
        };
        Ok(vec![TensorValue::try_new(data, x.shape.clone())?])
    }
}

/// Identity kernel.
#[derive(Debug, Clone, Default)]
pub struct IdentityKernel;

impl OpKernel for IdentityKernel {
    fn compute(&self, inputs: &[&TensorValue]) -> Result<Vec<TensorValue>> {
        Ok(vec![required_input("Identity", inputs, 0)?.clone()])
    }
}

fn create_add(_: &KernelInfo<'_>) -> Result<Box<dyn OpKernel>> {
    Ok(Box::new(AddKernel))
}

fn create_relu(_: &KernelInfo<'_>) -> Result<Box<dyn OpKernel>> {
    Ok(Box::new(ReluKernel))
}

fn create_identity(_: &KernelInfo<'_>) -> Result<Box<dyn OpKernel>> {
    Ok(Box::new(IdentityKernel))
}

pub(crate) fn add_create_info(provider: &str, version: VersionRange) -> KernelCreateInfo {
    KernelCreateInfo::new(
        KernelDefBuilder::new("Add", provider)
            .version(version)
            .type_constraint("T", ArgSlot::Input(0), ADD_TYPES)
            .build(),
        create_add,
    )
}

pub(crate) fn relu_create_info(provider: &str, version: VersionRange) -> KernelCreateInfo {
    KernelCreateInfo::new(
        KernelDefBuilder::new("Relu", provider)
            .version(version)
            .type_constraint("T", ArgSlot::Input(0), RELU_TYPES)
            .build(),
        create_relu,
    )
}

pub(crate) fn identity_create_info(provider: &str, version: VersionRange) -> KernelCreateInfo {
    KernelCreateInfo::new(
        KernelDefBuilder::new("Identity", provider)
            .version(version)
            .type_constraint("T", ArgSlot::Input(0), ALL_TYPES)
            .build(),
        create_identity,
    )
}
