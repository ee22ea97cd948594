//! Static kernel registration tables.
//!
//! Each provider has one table of builder functions. The builders are
//! generic over the provider so the host kernels can be registered under
//! every provider without duplicating the entries; a builder that
//! returns `None` is a disabled entry and is skipped by `register_table`.

use crate::kernels::{elementwise, gather, shape, split, squeeze};
use kiln_core::{
    register_table, BuildKernelCreateInfoFn, KernelCreateInfo, KernelRegistry, Result,
    VersionRange, CPU_EXECUTION_PROVIDER, HOST_DEVICE_EXECUTION_PROVIDER,
    WGPU_EXECUTION_PROVIDER,
};

/// Provider a table registers kernels under.
pub trait ProviderKind {
    const NAME: &'static str;
}

/// The synchronous CPU provider.
pub struct Cpu;

impl ProviderKind for Cpu {
    const NAME: &'static str = CPU_EXECUTION_PROVIDER;
}

/// The asynchronous host-device provider.
pub struct HostDevice;

impl ProviderKind for HostDevice {
    const NAME: &'static str = HOST_DEVICE_EXECUTION_PROVIDER;
}

/// The wgpu provider, whose kernels stage through host memory.
pub struct Wgpu;

impl ProviderKind for Wgpu {
    const NAME: &'static str = WGPU_EXECUTION_PROVIDER;
}

fn disabled() -> Option<KernelCreateInfo> {
    None
}

fn add_7_12<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(elementwise::add_create_info(P::NAME, VersionRange::between(7, 12)))
}

fn add_13<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(elementwise::add_create_info(P::NAME, VersionRange::between(13, 13)))
}

fn add_14<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(elementwise::add_create_info(P::NAME, VersionRange::since(14)))
}

fn gather_1_10<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(gather::create_info(P::NAME, VersionRange::between(1, 10)))
}

fn gather_11_12<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(gather::create_info(P::NAME, VersionRange::between(11, 12)))
}

fn gather_13<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(gather::create_info(P::NAME, VersionRange::since(13)))
}

fn identity_1_12<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(elementwise::identity_create_info(P::NAME, VersionRange::between(1, 12)))
}

fn identity_13<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(elementwise::identity_create_info(P::NAME, VersionRange::between(13, 13)))
}

fn identity_14<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(elementwise::identity_create_info(P::NAME, VersionRange::since(14)))
}

fn relu_6_12<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(elementwise::relu_create_info(P::NAME, VersionRange::between(6, 12)))
}

fn relu_13<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(elementwise::relu_create_info(P::NAME, VersionRange::between(13, 13)))
}

fn relu_14<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(elementwise::relu_create_info(P::NAME, VersionRange::since(14)))
}

fn shape_1_12<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(shape::create_info(P::NAME, VersionRange::between(1, 12)))
}

fn shape_13_14<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(shape::create_info(P::NAME, VersionRange::between(13, 14)))
}

fn shape_15<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(shape::create_info(P::NAME, VersionRange::since(15)))
}

fn split_2_10<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(split::create_info(P::NAME, VersionRange::between(2, 10)))
}

fn split_11_12<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(split::create_info(P::NAME, VersionRange::between(11, 12)))
}

fn split_13_17<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(split::create_info(P::NAME, VersionRange::between(13, 17)))
}

fn split_18<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(split::create_info(P::NAME, VersionRange::since(18)))
}

fn squeeze_1_10<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(squeeze::squeeze_create_info(P::NAME, VersionRange::between(1, 10)))
}

fn squeeze_11_12<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(squeeze::squeeze_create_info(P::NAME, VersionRange::between(11, 12)))
}

fn squeeze_13<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(squeeze::squeeze_create_info(P::NAME, VersionRange::since(13)))
}

fn unsqueeze_1_10<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(squeeze::unsqueeze_create_info(P::NAME, VersionRange::between(1, 10)))
}

fn unsqueeze_11_12<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(squeeze::unsqueeze_create_info(P::NAME, VersionRange::between(11, 12)))
}

fn unsqueeze_13<P: ProviderKind>() -> Option<KernelCreateInfo> {
    Some(squeeze::unsqueeze_create_info(P::NAME, VersionRange::since(13)))
}

/// Kernels of the CPU provider.
pub const CPU_KERNELS: [BuildKernelCreateInfoFn; 26] = [
    disabled, // keeps the table non-empty when every kernel is compiled out
    add_7_12::<Cpu>,
    add_13::<Cpu>,
    add_14::<Cpu>,
    gather_1_10::<Cpu>,
    gather_11_12::<Cpu>,
    gather_13::<Cpu>,
    identity_1_12::<Cpu>,
    identity_13::<Cpu>,
    identity_14::<Cpu>,
    relu_6_12::<Cpu>,
    relu_13::<Cpu>,
    relu_14::<Cpu>,
    shape_1_12::<Cpu>,
    shape_13_14::<Cpu>,
    shape_15::<Cpu>,
    split_2_10::<Cpu>,
    split_11_12::<Cpu>,
    split_13_17::<Cpu>,
    split_18::<Cpu>,
    squeeze_1_10::<Cpu>,
    squeeze_11_12::<Cpu>,
    squeeze_13::<Cpu>,
    unsqueeze_1_10::<Cpu>,
    unsqueeze_11_12::<Cpu>,
    unsqueeze_13::<Cpu>,
];

#[cfg(not(feature = "minimal-kernels"))]
const HOST_RELU_6_12: BuildKernelCreateInfoFn = relu_6_12::<HostDevice>;
#[cfg(not(feature = "minimal-kernels"))]
const HOST_RELU_13: BuildKernelCreateInfoFn = relu_13::<HostDevice>;
#[cfg(not(feature = "minimal-kernels"))]
const HOST_RELU_14: BuildKernelCreateInfoFn = relu_14::<HostDevice>;

#[cfg(feature = "minimal-kernels")]
const HOST_RELU_6_12: BuildKernelCreateInfoFn = disabled;
#[cfg(feature = "minimal-kernels")]
const HOST_RELU_13: BuildKernelCreateInfoFn = disabled;
#[cfg(feature = "minimal-kernels")]
const HOST_RELU_14: BuildKernelCreateInfoFn = disabled;

/// Kernels of the host-device provider.
///
/// Relu is compiled out with the `minimal-kernels` feature.
pub const HOST_DEVICE_KERNELS: [BuildKernelCreateInfoFn; 25] = [
    add_7_12::<HostDevice>,
    add_13::<HostDevice>,
    add_14::<HostDevice>,
    gather_1_10::<HostDevice>,
    gather_11_12::<HostDevice>,
    gather_13::<HostDevice>,
    identity_1_12::<HostDevice>,
    identity_13::<HostDevice>,
    identity_14::<HostDevice>,
    HOST_RELU_6_12,
    HOST_RELU_13,
    HOST_RELU_14,
    shape_1_12::<HostDevice>,
    shape_13_14::<HostDevice>,
    shape_15::<HostDevice>,
    split_2_10::<HostDevice>,
    split_11_12::<HostDevice>,
    split_13_17::<HostDevice>,
    split_18::<HostDevice>,
    squeeze_1_10::<HostDevice>,
    squeeze_11_12::<HostDevice>,
    squeeze_13::<HostDevice>,
    unsqueeze_1_10::<HostDevice>,
    unsqueeze_11_12::<HostDevice>,
    unsqueeze_13::<HostDevice>,
];

/// Kernels of the wgpu provider.
///
/// Only the current schema versions; older models fall back to another
/// provider.
pub const WGPU_KERNELS: [BuildKernelCreateInfoFn; 11] = [
    add_13::<Wgpu>,
    add_14::<Wgpu>,
    gather_13::<Wgpu>,
    identity_13::<Wgpu>,
    identity_14::<Wgpu>,
    relu_13::<Wgpu>,
    relu_14::<Wgpu>,
    split_13_17::<Wgpu>,
    split_18::<Wgpu>,
    squeeze_13::<Wgpu>,
    unsqueeze_13::<Wgpu>,
];

fn register_provider_table<P: ProviderKind>(
    registry: &mut KernelRegistry,
    table: &[BuildKernelCreateInfoFn],
) -> Result<usize> {
    let count = register_table(registry, table)?;
    tracing::debug!(provider = P::NAME, kernels = registry.len(), "provider kernels ready");
    Ok(count)
}

/// Register every enabled CPU kernel. Returns the number registered.
pub fn register_cpu_kernels(registry: &mut KernelRegistry) -> Result<usize> {
    register_provider_table::<Cpu>(registry, &CPU_KERNELS)
}

/// Register every enabled host-device kernel. Returns the number registered.
pub fn register_host_device_kernels(registry: &mut KernelRegistry) -> Result<usize> {
    register_provider_table::<HostDevice>(registry, &HOST_DEVICE_KERNELS)
}

/// Register every wgpu kernel. Returns the number registered.
pub fn register_wgpu_kernels(registry: &mut KernelRegistry) -> Result<usize> {
    register_provider_table::<Wgpu>(registry, &WGPU_KERNELS)
}

/// A registry holding the CPU kernels.
pub fn cpu_kernel_registry() -> Result<KernelRegistry> {
    let mut registry = KernelRegistry::new();
    register_cpu_kernels(&mut registry)?;
    Ok(registry)
}

/// A registry holding the host-device kernels.
pub fn host_device_kernel_registry() -> Result<KernelRegistry> {
    let mut registry = KernelRegistry::new();
    register_host_device_kernels(&mut registry)?;
    Ok(registry)
}

/// A registry holding the wgpu kernels.
pub fn wgpu_kernel_registry() -> Result<KernelRegistry> {
    let mut registry = KernelRegistry::new();
    register_wgpu_kernels(&mut registry)?;
    Ok(registry)
}
