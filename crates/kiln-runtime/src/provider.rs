//! Execution providers.
//!
//! A provider pairs a kernel registry with the place its kernels run: the
//! calling thread for the CPU provider, or the queues of a device for the
//! asynchronous providers.

use crate::device::{HostDevice, HostDeviceOptions, QueueId, Task, WgpuDevice};
use crate::error::Result;
use crate::fence::{DeviceFence, Fence};
use kiln_core::{
    KernelRegistry, CPU_EXECUTION_PROVIDER, HOST_DEVICE_EXECUTION_PROVIDER,
    WGPU_EXECUTION_PROVIDER,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A backend the session can place nodes on.
pub trait ExecutionProvider: Send + Sync {
    fn provider_type(&self) -> &str;

    /// Kernels this provider can run.
    fn kernel_registry(&self) -> &KernelRegistry;

    fn queue_count(&self) -> usize {
        1
    }

    /// Queue to launch the next node on.
    fn next_queue(&self) -> QueueId {
        QueueId(0)
    }

    /// Fence for a buffer this provider produces, if its work is asynchronous.
    fn create_fence(&self) -> Result<Option<Arc<dyn Fence>>>;

    /// Run `task` on `queue`.
    fn launch(&self, queue: QueueId, task: Task) -> Result<()>;
}

/// Runs kernels inline on the calling thread.
#[derive(Debug)]
pub struct CpuExecutionProvider {
    registry: KernelRegistry,
}

impl CpuExecutionProvider {
    pub fn new() -> Result<Self> {
        Ok(Self {
            registry: kiln_operators::cpu_kernel_registry()?,
        })
    }
}

impl ExecutionProvider for CpuExecutionProvider {
    fn provider_type(&self) -> &str {
        CPU_EXECUTION_PROVIDER
    }

    fn kernel_registry(&self) -> &KernelRegistry {
        &self.registry
    }

    fn create_fence(&self) -> Result<Option<Arc<dyn Fence>>> {
        Ok(None)
    }

    fn launch(&self, _queue: QueueId, task: Task) -> Result<()> {
        task();
        Ok(())
    }
}

/// Runs kernels on the worker queues of a [`HostDevice`].
///
/// Nodes are spread over the queues round-robin.
#[derive(Debug)]
pub struct HostDeviceExecutionProvider {
    device: Arc<HostDevice>,
    registry: KernelRegistry,
    next_queue: AtomicUsize,
}

impl HostDeviceExecutionProvider {
    pub fn new(options: HostDeviceOptions) -> Result<Self> {
        Self::with_device(Arc::new(HostDevice::new(options)?))
    }

    /// Use an existing device.
    pub fn with_device(device: Arc<HostDevice>) -> Result<Self> {
        Ok(Self {
            device,
            registry: kiln_operators::host_device_kernel_registry()?,
            next_queue: AtomicUsize::new(0),
        })
    }

    pub fn device(&self) -> &Arc<HostDevice> {
        &self.device
    }
}

impl ExecutionProvider for HostDeviceExecutionProvider {
    fn provider_type(&self) -> &str {
        HOST_DEVICE_EXECUTION_PROVIDER
    }

    fn kernel_registry(&self) -> &KernelRegistry {
        &self.registry
    }

    fn queue_count(&self) -> usize {
        self.device.queue_count()
    }

    fn next_queue(&self) -> QueueId {
        let next = self.next_queue.fetch_add(1, Ordering::Relaxed);
        QueueId(next % self.device.queue_count())
    }

    fn create_fence(&self) -> Result<Option<Arc<dyn Fence>>> {
        let fence = DeviceFence::new(Arc::clone(&self.device))?;
        Ok(Some(Arc::new(fence)))
    }

    fn launch(&self, queue: QueueId, task: Task) -> Result<()> {
        self.device.enqueue(queue, task)
    }
}

/// Places nodes on a [`WgpuDevice`].
///
/// Kernels run on the launching thread against host memory; buffers they
/// produce are fenced with events on the device queue, so consumers on other
/// providers wait for the queue to drain past the write.
#[derive(Debug)]
pub struct WgpuExecutionProvider {
    device: Arc<WgpuDevice>,
    registry: KernelRegistry,
}

impl WgpuExecutionProvider {
    /// Use the default GPU adapter.
    pub fn new() -> Result<Self> {
        Self::with_device(Arc::new(WgpuDevice::new_blocking()?))
    }

    pub fn with_device(device: Arc<WgpuDevice>) -> Result<Self> {
        Ok(Self {
            device,
            registry: kiln_operators::wgpu_kernel_registry()?,
        })
    }

    pub fn device(&self) -> &Arc<WgpuDevice> {
        &self.device
    }
}

impl ExecutionProvider for WgpuExecutionProvider {
    fn provider_type(&self) -> &str {
        WGPU_EXECUTION_PROVIDER
    }

    fn kernel_registry(&self) -> &KernelRegistry {
        &self.registry
    }

    fn create_fence(&self) -> Result<Option<Arc<dyn Fence>>> {
        let fence = DeviceFence::new(Arc::clone(&self.device))?;
        Ok(Some(Arc::new(fence)))
    }

    fn launch(&self, _queue: QueueId, task: Task) -> Result<()> {
        task();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_provider_runs_inline() {
        let provider = CpuExecutionProvider::new().unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        provider
            .launch(
                QueueId(0),
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(provider.create_fence().unwrap().is_none());
        assert!(!provider.kernel_registry().is_empty());
    }

    #[test]
    fn test_host_device_round_robin() {
        let provider =
            HostDeviceExecutionProvider::new(HostDeviceOptions { queue_count: 3 }).unwrap();
        let queues: Vec<_> = (0..6).map(|_| provider.next_queue().0).collect();
        assert_eq!(queues, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(provider.queue_count(), 3);
        assert!(provider.create_fence().unwrap().is_some());
    }

    #[test]
    #[ignore = "requires GPU"]
    fn test_wgpu_provider_fences_outputs() {
        let provider = WgpuExecutionProvider::new().unwrap();
        assert_eq!(provider.provider_type(), WGPU_EXECUTION_PROVIDER);
        assert!(!provider.kernel_registry().is_empty());

        let fence = provider.create_fence().unwrap().unwrap();
        fence
            .before_using_as_output(WGPU_EXECUTION_PROVIDER, QueueId(0))
            .unwrap();
        provider.launch(QueueId(0), Box::new(|| {})).unwrap();
        fence.after_used_as_output(QueueId(0)).unwrap();
        fence
            .before_using_as_input(CPU_EXECUTION_PROVIDER, QueueId(0))
            .unwrap();
        assert!(fence.can_release().unwrap());
    }
}
