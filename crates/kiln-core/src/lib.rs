//! Core intermediate representation, kernel registry and transformer traits for Kiln.
//!
//! This crate provides the foundational abstractions the other Kiln crates depend on:
//! - Dataflow graph IR (`Graph`, `Node`, `NodeArg`) on top of petgraph's `StableGraph`
//! - Graph transformer trait and optimization levels
//! - Kernel definitions, the `OpKernel` trait and the `KernelRegistry`
//! - Opset schema-version resolution for nodes created by rewrites

pub mod ir;
pub mod kernel;
pub mod opset;
pub mod provider;
pub mod registry;
pub mod transformer;
pub mod types;

// Re-export commonly used types
pub use ir::{ArgData, Graph, Node, NodeArg, NodeArgId, NodeIndex};
pub use kernel::{
    ArgSlot, KernelCreateInfo, KernelDef, KernelDefBuilder, KernelFactory, KernelInfo, OpKernel,
    TypeConstraint, VersionRange,
};
pub use provider::{CPU_EXECUTION_PROVIDER, HOST_DEVICE_EXECUTION_PROVIDER, WGPU_EXECUTION_PROVIDER};
pub use registry::{register_table, BuildKernelCreateInfoFn, KernelQuery, KernelRegistry};
pub use transformer::{GraphTransformer, OptimizationLevel};
pub use types::{AttributeValue, DataType, SymbolicDim, TensorData, TensorShape, TensorValue};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for kiln-core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Attribute error: {0}")]
    Attribute(String),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Type error: {0}")]
    Type(String),

    #[error("Kernel not found: {0}")]
    KernelNotFound(String),

    #[error("Duplicate kernel registration: {0}")]
    DuplicateKernel(String),

    #[error("Kernel execution error: {0}")]
    Kernel(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}
