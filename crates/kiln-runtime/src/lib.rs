//! Device runtimes, fences, execution providers and inference sessions for Kiln.
//!
//! # Architecture
//!
//! - **Devices** - [`DeviceRuntime`] abstracts a device's command queues and
//!   events. [`HostDevice`] runs queues on worker threads; [`WgpuDevice`]
//!   tracks submissions on a wgpu queue.
//! - **Fences** - [`DeviceFence`] orders reads and writes of one buffer across
//!   queues and providers.
//! - **Providers** - [`ExecutionProvider`] pairs a kernel registry with where
//!   its kernels run; [`assign_providers`] places nodes by priority.
//! - **Sessions** - [`InferenceSession`] optimizes, partitions and runs a graph.
//!
//! # Example
//!
//! ```no_run
//! use kiln_runtime::{
//!     CpuExecutionProvider, ExecutionProvider, HostDeviceExecutionProvider, HostDeviceOptions,
//!     InferenceSession, SessionOptions,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> kiln_runtime::Result<()> {
//! # let graph = kiln_core::Graph::with_opset(13);
//! let providers: Vec<Arc<dyn ExecutionProvider>> = vec![
//!     Arc::new(HostDeviceExecutionProvider::new(HostDeviceOptions::default())?),
//!     Arc::new(CpuExecutionProvider::new()?),
//! ];
//! let session = InferenceSession::new(graph, providers, SessionOptions::default())?;
//! # Ok(())
//! # }
//! ```

pub mod device;
pub mod fence;
pub mod partition;
pub mod provider;
pub mod session;

mod buffer;
mod error;

pub use device::{
    DeviceRuntime, EventStatus, HostDevice, HostDeviceOptions, QueueId, ScopedEvent, Task,
    WgpuDevice,
};
pub use error::{Result, RuntimeError};
pub use fence::{DeviceFence, Fence};
pub use partition::assign_providers;
pub use provider::{
    CpuExecutionProvider, ExecutionProvider, HostDeviceExecutionProvider, WgpuExecutionProvider,
};
pub use session::{InferenceSession, SessionOptions};
