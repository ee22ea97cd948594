//! GPU device runtime backed by wgpu.
//!
//! wgpu exposes a single ordered queue per device, so every [`QueueId`]
//! maps onto it and same-device waits need no extra synchronization. Events
//! track submissions: recording submits an empty batch and registers a
//! completion callback for it.

use super::{DeviceRuntime, EventStatus, QueueId};
use crate::error::{Result, RuntimeError};
use kiln_core::WGPU_EXECUTION_PROVIDER;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct EventState {
    recorded: u64,
    completed: u64,
    submission: Option<wgpu::SubmissionIndex>,
}

/// Event handle of a [`WgpuDevice`].
#[derive(Debug, Clone, Default)]
pub struct WgpuEvent {
    state: Arc<Mutex<EventState>>,
}

/// A wgpu device and its queue.
pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_info: wgpu::AdapterInfo,
    lost: Arc<AtomicBool>,
}

impl WgpuDevice {
    /// Initialize with the default GPU adapter.
    ///
    /// # Errors
    /// Returns an error if no suitable GPU is found or initialization fails.
    pub async fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| {
                RuntimeError::InitError(format!("Failed to find suitable GPU adapter: {e}"))
            })?;

        Self::with_adapter(&adapter).await
    }

    /// Blocking variant of [`WgpuDevice::new`] for synchronous callers.
    pub fn new_blocking() -> Result<Self> {
        pollster::block_on(Self::new())
    }

    /// Initialize with a specific adapter.
    pub async fn with_adapter(adapter: &wgpu::Adapter) -> Result<Self> {
        let adapter_info = adapter.get_info();

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("kiln device"),
                ..Default::default()
            })
            .await
            .map_err(|e| RuntimeError::InitError(format!("Failed to create device: {e}")))?;

        let lost = Arc::new(AtomicBool::new(false));
        let lost_flag = Arc::clone(&lost);
        device.set_device_lost_callback(move |reason, message| {
            lost_flag.store(true, Ordering::SeqCst);
            tracing::error!(?reason, %message, "wgpu device lost");
        });

        tracing::debug!(adapter = %adapter_info.name, backend = ?adapter_info.backend, "wgpu device ready");

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_info,
            lost,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    fn check_alive(&self) -> Result<()> {
        if self.lost.load(Ordering::SeqCst) {
            return Err(RuntimeError::Device("wgpu device lost".to_string()));
        }
        Ok(())
    }

    fn check_queue(&self, queue: QueueId) -> Result<()> {
        if queue.0 != 0 {
            return Err(RuntimeError::Device(format!(
                "Invalid {queue}, wgpu devices have a single queue"
            )));
        }
        Ok(())
    }

    fn poll(&self, poll_type: wgpu::PollType) -> Result<()> {
        self.device
            .poll(poll_type)
            .map(|_| ())
            .map_err(|e| RuntimeError::Device(format!("Device poll failed: {e}")))
    }
}

impl fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuDevice")
            .field("adapter", &self.adapter_info.name)
            .field("backend", &self.adapter_info.backend)
            .field("lost", &self.lost.load(Ordering::SeqCst))
            .finish()
    }
}

impl DeviceRuntime for WgpuDevice {
    type Event = WgpuEvent;

    fn provider_type(&self) -> &str {
        WGPU_EXECUTION_PROVIDER
    }

    fn create_event(&self) -> Result<WgpuEvent> {
        self.check_alive()?;
        Ok(WgpuEvent::default())
    }

    fn destroy_event(&self, _event: &WgpuEvent) -> Result<()> {
        self.check_alive()
    }

    fn record_event(&self, event: &WgpuEvent, queue: QueueId) -> Result<()> {
        self.check_alive()?;
        self.check_queue(queue)?;

        let submission = self.queue.submit(std::iter::empty());
        let generation = {
            let mut state = event.state.lock();
            state.recorded += 1;
            state.submission = Some(submission);
            state.recorded
        };

        let state = Arc::clone(&event.state);
        // Submissions on the one queue finish in order.
        self.queue.on_submitted_work_done(move || {
            let mut state = state.lock();
            state.completed = state.completed.max(generation);
        });
        Ok(())
    }

    fn queue_wait_event(&self, queue: QueueId, _event: &WgpuEvent) -> Result<()> {
        self.check_alive()?;
        self.check_queue(queue)
    }

    fn synchronize_event(&self, event: &WgpuEvent) -> Result<()> {
        self.check_alive()?;
        let submission = event.state.lock().submission.clone();
        if let Some(index) = submission {
            self.poll(wgpu::PollType::WaitForSubmissionIndex(index))?;
        }
        Ok(())
    }

    fn query_event(&self, event: &WgpuEvent) -> Result<EventStatus> {
        self.check_alive()?;
        self.poll(wgpu::PollType::Poll)?;
        let state = event.state.lock();
        if state.completed >= state.recorded {
            Ok(EventStatus::Complete)
        } else {
            Ok(EventStatus::NotReady)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[pollster::test]
    #[ignore = "requires GPU"]
    async fn test_record_and_synchronize() {
        let device = WgpuDevice::new().await.unwrap();
        let event = device.create_event().unwrap();
        assert_eq!(device.query_event(&event).unwrap(), EventStatus::Complete);

        device.record_event(&event, QueueId(0)).unwrap();
        device.synchronize_event(&event).unwrap();
        assert_eq!(device.query_event(&event).unwrap(), EventStatus::Complete);
        device.destroy_event(&event).unwrap();
    }

    #[pollster::test]
    #[ignore = "requires GPU"]
    async fn test_single_queue() {
        let device = WgpuDevice::new().await.unwrap();
        let event = device.create_event().unwrap();
        assert!(device.record_event(&event, QueueId(1)).is_err());
        device.queue_wait_event(QueueId(0), &event).unwrap();
    }
}
