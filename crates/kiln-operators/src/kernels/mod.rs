//! Host reference kernels.
//!
//! Every kernel runs on host memory and is shared by the CPU provider and the
//! host-device provider; only the registration tables differ.

pub mod elementwise;
pub mod gather;
pub mod shape;
pub mod split;
pub mod squeeze;

use kiln_core::DataType;

/// Element types every data-movement kernel accepts.
pub(crate) const ALL_TYPES: &[DataType] = &[
    DataType::F32,
    DataType::F16,
    DataType::I64,
    DataType::I32,
    DataType::U8,
    DataType::Bool,
];

/// Element types accepted for index and axes inputs.
pub(crate) const INDEX_TYPES: &[DataType] = &[DataType::I32, DataType::I64];
