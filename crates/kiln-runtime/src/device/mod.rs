//! Device-runtime abstraction.
//!
//! A device runtime owns one or more command queues that run asynchronously
//! relative to the host and to each other, plus events that can be recorded
//! on a queue and waited on from another queue or from the host.

pub mod gpu;
pub mod host;

pub use gpu::{WgpuDevice, WgpuEvent};
pub use host::{HostDevice, HostDeviceOptions, HostEvent};

use crate::error::Result;
use std::fmt;
use std::sync::Arc;

/// Index of a command queue on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct QueueId(pub usize);

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue {}", self.0)
    }
}

/// Result of a non-blocking event query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// All work recorded before the event has finished.
    Complete,
    /// Recorded work is still pending.
    NotReady,
}

/// Unit of work run on a queue.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Event and queue API of a device runtime.
///
/// An event that was never recorded is complete. Recordings accumulate: an
/// event recorded on several queues completes only once the work before
/// every one of those recordings has finished.
pub trait DeviceRuntime: Send + Sync + 'static {
    type Event: Send + Sync;

    /// Provider that runs kernels on this device.
    fn provider_type(&self) -> &str;

    fn create_event(&self) -> Result<Self::Event>;

    fn destroy_event(&self, event: &Self::Event) -> Result<()>;

    /// Record `event` after the work currently enqueued on `queue`.
    fn record_event(&self, event: &Self::Event, queue: QueueId) -> Result<()>;

    /// Make `queue` wait for `event` before running later work.
    ///
    /// Does not block the host.
    fn queue_wait_event(&self, queue: QueueId, event: &Self::Event) -> Result<()>;

    /// Block the host until `event` completes.
    fn synchronize_event(&self, event: &Self::Event) -> Result<()>;

    /// Query `event` without blocking.
    fn query_event(&self, event: &Self::Event) -> Result<EventStatus>;
}

/// An event destroyed through its runtime when dropped.
pub struct ScopedEvent<R: DeviceRuntime> {
    runtime: Arc<R>,
    event: R::Event,
}

impl<R: DeviceRuntime> ScopedEvent<R> {
    pub fn new(runtime: Arc<R>) -> Result<Self> {
        let event = runtime.create_event()?;
        Ok(Self { runtime, event })
    }

    pub fn get(&self) -> &R::Event {
        &self.event
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }
}

impl<R: DeviceRuntime> Drop for ScopedEvent<R> {
    fn drop(&mut self) {
        if let Err(e) = self.runtime.destroy_event(&self.event) {
            tracing::error!(
                provider = self.runtime.provider_type(),
                error = %e,
                "failed to destroy event"
            );
        }
    }
}

impl<R: DeviceRuntime> fmt::Debug for ScopedEvent<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedEvent")
            .field("provider", &self.runtime.provider_type())
            .finish_non_exhaustive()
    }
}
