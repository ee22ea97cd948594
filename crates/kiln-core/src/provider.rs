//! Execution provider identifiers.
//!
//! Providers are identified by plain strings so that out-of-tree backends can
//! register kernels without touching this crate.

/// Host CPU provider. Kernels run synchronously on the calling thread.
pub const CPU_EXECUTION_PROVIDER: &str = "CPUExecutionProvider";

/// Asynchronous host device: worker-thread command queues with event semantics.
pub const HOST_DEVICE_EXECUTION_PROVIDER: &str = "HostDeviceExecutionProvider";

/// GPU provider backed by wgpu.
pub const WGPU_EXECUTION_PROVIDER: &str = "WgpuExecutionProvider";
