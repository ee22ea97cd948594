//! Host reference kernels and kernel registration tables for Kiln.
//!
//! # Kernels
//!
//! - Data movement: Gather, Split, Squeeze, Unsqueeze, Identity
//! - Metadata: Shape
//! - Arithmetic: Add (broadcasting), Relu
//!
//! Each kernel is registered per schema-version range under every provider
//! through the tables in [`registry`].
//!
//! # Example
//!
//! ```no_run
//! use kiln_core::KernelRegistry;
//!
//! # fn main() -> kiln_core::Result<()> {
//! let mut registry = KernelRegistry::new();
//! let count = kiln_operators::register_cpu_kernels(&mut registry)?;
//! assert_eq!(count, registry.len());
//! # Ok(())
//! # }
//! ```

pub mod kernels;
pub mod registry;

mod helpers;

pub use kernels::elementwise::{AddKernel, IdentityKernel, ReluKernel};
pub use kernels::gather::GatherKernel;
pub use kernels::shape::ShapeKernel;
pub use kernels::split::SplitKernel;
pub use kernels::squeeze::{SqueezeKernel, UnsqueezeKernel};
pub use registry::{
    cpu_kernel_registry, host_device_kernel_registry, register_cpu_kernels,
    register_host_device_kernels, register_wgpu_kernels, wgpu_kernel_registry, CPU_KERNELS,
    HOST_DEVICE_KERNELS, WGPU_KERNELS,
};
