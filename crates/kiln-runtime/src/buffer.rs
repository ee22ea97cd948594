//! Tensor buffers shared between the session and the queues that fill them.

use crate::error::Result;
use crate::fence::Fence;
use kiln_core::TensorValue;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Default)]
enum BufferState {
    /// Not yet written by its producer.
    #[default]
    Pending,
    Ready(Arc<TensorValue>),
    /// The producer failed; holds its error message.
    Failed(String),
}

/// A tensor buffer, optionally guarded by the producing provider's fence.
///
/// Clones share the same storage.
#[derive(Clone)]
pub(crate) struct DeviceBuffer {
    state: Arc<Mutex<BufferState>>,
    fence: Option<Arc<dyn Fence>>,
}

impl DeviceBuffer {
    /// A buffer that already holds `value` and needs no fence.
    pub fn ready(value: TensorValue) -> Self {
        Self {
            state: Arc::new(Mutex::new(BufferState::Ready(Arc::new(value)))),
            fence: None,
        }
    }

    /// An empty buffer to be written by a kernel.
    pub fn pending(fence: Option<Arc<dyn Fence>>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BufferState::Pending)),
            fence,
        }
    }

    pub fn fence(&self) -> Option<&Arc<dyn Fence>> {
        self.fence.as_ref()
    }

    pub fn set(&self, value: TensorValue) {
        *self.state.lock() = BufferState::Ready(Arc::new(value));
    }

    pub fn fail(&self, message: String) {
        *self.state.lock() = BufferState::Failed(message);
    }

    /// The stored value, or why there is none.
    pub fn value(&self) -> std::result::Result<Arc<TensorValue>, String> {
        match &*self.state.lock() {
            BufferState::Ready(value) => Ok(Arc::clone(value)),
            BufferState::Failed(message) => Err(message.clone()),
            BufferState::Pending => Err("buffer read before it was written".to_string()),
        }
    }

    /// Whether the buffer may be freed or reused.
    pub fn can_release(&self) -> Result<bool> {
        match &self.fence {
            Some(fence) => fence.can_release(),
            None => Ok(true),
        }
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("state", &*self.state.lock())
            .field("fenced", &self.fence.is_some())
            .finish()
    }
}
