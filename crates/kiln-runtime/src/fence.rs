//! Per-buffer device fences.
//!
//! A fence orders access to one buffer across queues and providers. It holds
//! a read event, recorded after every use as an input, and a write event,
//! recorded after every use as an output. Recordings accumulate, so the read
//! event completes only once every reader has finished. Consumers on the producing device
//! wait on those events on their queue; consumers on any other provider
//! block the host until the events complete.

use crate::device::{DeviceRuntime, EventStatus, QueueId, ScopedEvent};
use crate::error::Result;
use std::fmt;
use std::sync::Arc;

/// Ordering hooks a scheduler calls around every enqueue touching a buffer.
pub trait Fence: Send + Sync {
    /// Order a read of the buffer on `queue` after its last write.
    fn before_using_as_input(&self, consumer_provider: &str, queue: QueueId) -> Result<()>;

    /// Order a write of the buffer on `queue` after its last read and write.
    fn before_using_as_output(&self, consumer_provider: &str, queue: QueueId) -> Result<()>;

    /// Record the read event after the read enqueued on `queue`.
    fn after_used_as_input(&self, queue: QueueId) -> Result<()>;

    /// Record the write event after the write enqueued on `queue`.
    fn after_used_as_output(&self, queue: QueueId) -> Result<()>;

    /// Whether every recorded use has finished. Never blocks.
    fn can_release(&self) -> Result<bool>;
}

/// [`Fence`] built on a device runtime's events.
pub struct DeviceFence<R: DeviceRuntime> {
    runtime: Arc<R>,
    read_event: ScopedEvent<R>,
    write_event: ScopedEvent<R>,
}

impl<R: DeviceRuntime> DeviceFence<R> {
    pub fn new(runtime: Arc<R>) -> Result<Self> {
        let read_event = ScopedEvent::new(Arc::clone(&runtime))?;
        let write_event = ScopedEvent::new(Arc::clone(&runtime))?;
        Ok(Self {
            runtime,
            read_event,
            write_event,
        })
    }

    fn is_same_provider(&self, consumer_provider: &str) -> bool {
        consumer_provider == self.runtime.provider_type()
    }
}

impl<R: DeviceRuntime> Fence for DeviceFence<R> {
    fn before_using_as_input(&self, consumer_provider: &str, queue: QueueId) -> Result<()> {
        if self.is_same_provider(consumer_provider) {
            self.runtime.queue_wait_event(queue, self.write_event.get())
        } else {
            tracing::trace!(consumer = consumer_provider, "host wait on write event");
            self.runtime.synchronize_event(self.write_event.get())
        }
    }

    fn before_using_as_output(&self, consumer_provider: &str, queue: QueueId) -> Result<()> {
        if self.is_same_provider(consumer_provider) {
            self.runtime.queue_wait_event(queue, self.read_event.get())?;
            self.runtime.queue_wait_event(queue, self.write_event.get())
        } else {
            tracing::trace!(consumer = consumer_provider, "host wait on read and write events");
            self.runtime.synchronize_event(self.read_event.get())?;
            self.runtime.synchronize_event(self.write_event.get())
        }
    }

    fn after_used_as_input(&self, queue: QueueId) -> Result<()> {
        self.runtime.record_event(self.read_event.get(), queue)
    }

    fn after_used_as_output(&self, queue: QueueId) -> Result<()> {
        self.runtime.record_event(self.write_event.get(), queue)
    }

    fn can_release(&self) -> Result<bool> {
        if self.runtime.query_event(self.read_event.get())? == EventStatus::NotReady {
            return Ok(false);
        }
        Ok(self.runtime.query_event(self.write_event.get())? == EventStatus::Complete)
    }
}

impl<R: DeviceRuntime> fmt::Debug for DeviceFence<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceFence")
            .field("provider", &self.runtime.provider_type())
            .finish_non_exhaustive()
    }
}
