//! Host-queue device.
//!
//! Each queue is a worker thread fed through a crossbeam channel, so work
//! enqueued on different queues runs concurrently while work on one queue
//! runs in order. Events count recordings: each recording takes the next
//! generation and enqueues a signal for it. Recordings on different queues
//! may signal out of order, so an event tracks which generations are still
//! pending and completes only once all of them have signalled.

use super::{DeviceRuntime, EventStatus, QueueId, Task};
use crate::error::{Result, RuntimeError};
use crossbeam_channel::{unbounded, Receiver, Sender};
use kiln_core::HOST_DEVICE_EXECUTION_PROVIDER;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long a blocked waiter sleeps before rechecking for device loss.
const LOSS_CHECK_INTERVAL: Duration = Duration::from_millis(5);

/// Options for [`HostDevice`].
#[derive(Debug, Clone)]
pub struct HostDeviceOptions {
    /// Number of worker-thread queues.
    pub queue_count: usize,
}

impl Default for HostDeviceOptions {
    fn default() -> Self {
        Self { queue_count: 2 }
    }
}

#[derive(Debug, Default)]
struct EventState {
    recorded: u64,
    pending: BTreeSet<u64>,
    destroyed: bool,
}

impl EventState {
    /// Whether every generation up to and including `target` has signalled.
    fn reached(&self, target: u64) -> bool {
        self.pending.first().map_or(true, |&oldest| oldest > target)
    }

    fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}

#[derive(Debug)]
struct EventInner {
    id: u64,
    state: Mutex<EventState>,
    cond: Condvar,
}

/// Event handle of a [`HostDevice`].
#[derive(Debug, Clone)]
pub struct HostEvent(Arc<EventInner>);

impl HostEvent {
    pub fn id(&self) -> u64 {
        self.0.id
    }
}

enum Command {
    Run(Task),
    Wait { event: Arc<EventInner>, target: u64 },
    Signal { event: Arc<EventInner>, generation: u64 },
}

/// A device whose queues are host worker threads.
pub struct HostDevice {
    queues: Vec<Sender<Command>>,
    workers: Vec<JoinHandle<()>>,
    lost: Arc<AtomicBool>,
    next_event: AtomicU64,
    live_events: AtomicUsize,
}

impl HostDevice {
    /// Start the worker queues.
    pub fn new(options: HostDeviceOptions) -> Result<Self> {
        if options.queue_count == 0 {
            return Err(RuntimeError::InitError(
                "Host device needs at least one queue".to_string(),
            ));
        }

        let lost = Arc::new(AtomicBool::new(false));
        let mut queues = Vec::with_capacity(options.queue_count);
        let mut workers = Vec::with_capacity(options.queue_count);

        for index in 0..options.queue_count {
            let (sender, receiver) = unbounded();
            let worker_lost = Arc::clone(&lost);
            let handle = thread::Builder::new()
                .name(format!("kiln-host-queue-{index}"))
                .spawn(move || run_queue(index, receiver, worker_lost))
                .map_err(|e| {
                    RuntimeError::InitError(format!("Failed to spawn host queue {index}: {e}"))
                })?;
            queues.push(sender);
            workers.push(handle);
        }

        tracing::debug!(queues = options.queue_count, "host device started");

        Ok(Self {
            queues,
            workers,
            lost,
            next_event: AtomicU64::new(0),
            live_events: AtomicUsize::new(0),
        })
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Run `task` on `queue` after all work enqueued there before it.
    pub fn enqueue(&self, queue: QueueId, task: Task) -> Result<()> {
        self.check_alive()?;
        self.send(queue, Command::Run(task))
    }

    /// Simulate a lost device: every later event or queue call fails.
    pub fn mark_lost(&self) {
        self.lost.store(true, Ordering::SeqCst);
        tracing::warn!("host device marked lost");
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Events created and not yet destroyed.
    pub fn live_events(&self) -> usize {
        self.live_events.load(Ordering::SeqCst)
    }

    fn check_alive(&self) -> Result<()> {
        if self.is_lost() {
            return Err(lost_error());
        }
        Ok(())
    }

    fn check_event(&self, event: &HostEvent) -> Result<()> {
        self.check_alive()?;
        if event.0.state.lock().destroyed {
            return Err(RuntimeError::Device(format!(
                "Use of destroyed event {}",
                event.id()
            )));
        }
        Ok(())
    }

    fn sender(&self, queue: QueueId) -> Result<&Sender<Command>> {
        self.queues.get(queue.0).ok_or_else(|| {
            RuntimeError::Device(format!(
                "Invalid {queue}, device has {} queues",
                self.queues.len()
            ))
        })
    }

    fn send(&self, queue: QueueId, command: Command) -> Result<()> {
        self.sender(queue)?
            .send(command)
            .map_err(|_| stopped_error(queue))
    }
}

impl DeviceRuntime for HostDevice {
    type Event = HostEvent;

    fn provider_type(&self) -> &str {
        HOST_DEVICE_EXECUTION_PROVIDER
    }

    fn create_event(&self) -> Result<HostEvent> {
        self.check_alive()?;
        let id = self.next_event.fetch_add(1, Ordering::SeqCst);
        self.live_events.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(event = id, "created event");
        Ok(HostEvent(Arc::new(EventInner {
            id,
            state: Mutex::new(EventState::default()),
            cond: Condvar::new(),
        })))
    }

    fn destroy_event(&self, event: &HostEvent) -> Result<()> {
        self.check_event(event)?;
        event.0.state.lock().destroyed = true;
        self.live_events.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(event = event.id(), "destroyed event");
        Ok(())
    }

    fn record_event(&self, event: &HostEvent, queue: QueueId) -> Result<()> {
        self.check_event(event)?;
        let sender = self.sender(queue)?;
        let generation = {
            let mut state = event.0.state.lock();
            state.recorded += 1;
            let generation = state.recorded;
            state.pending.insert(generation);
            generation
        };
        let signal = Command::Signal {
            event: Arc::clone(&event.0),
            generation,
        };
        if sender.send(signal).is_err() {
            // Nothing will ever signal this generation.
            event.0.state.lock().pending.remove(&generation);
            event.0.cond.notify_all();
            return Err(stopped_error(queue));
        }
        Ok(())
    }

    fn queue_wait_event(&self, queue: QueueId, event: &HostEvent) -> Result<()> {
        self.check_event(event)?;
        let target = {
            let state = event.0.state.lock();
            if state.is_complete() {
                return Ok(());
            }
            state.recorded
        };
        self.send(
            queue,
            Command::Wait {
                event: Arc::clone(&event.0),
                target,
            },
        )
    }

    fn synchronize_event(&self, event: &HostEvent) -> Result<()> {
        self.check_event(event)?;
        let target = event.0.state.lock().recorded;
        wait_for_generation(&event.0, target, &self.lost)
    }

    fn query_event(&self, event: &HostEvent) -> Result<EventStatus> {
        self.check_event(event)?;
        if event.0.state.lock().is_complete() {
            Ok(EventStatus::Complete)
        } else {
            Ok(EventStatus::NotReady)
        }
    }
}

impl Drop for HostDevice {
    fn drop(&mut self) {
        // Closing the channels ends the worker loops.
        self.queues.clear();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("host queue worker panicked");
            }
        }
    }
}

impl fmt::Debug for HostDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostDevice")
            .field("queues", &self.queues.len())
            .field("lost", &self.is_lost())
            .field("live_events", &self.live_events())
            .finish()
    }
}

fn lost_error() -> RuntimeError {
    RuntimeError::Device("Host device lost".to_string())
}

fn stopped_error(queue: QueueId) -> RuntimeError {
    RuntimeError::Device(format!("Host {queue} has stopped"))
}

fn wait_for_generation(event: &EventInner, target: u64, lost: &AtomicBool) -> Result<()> {
    let mut state = event.state.lock();
    while !state.reached(target) {
        if lost.load(Ordering::SeqCst) {
            return Err(lost_error());
        }
        event.cond.wait_for(&mut state, LOSS_CHECK_INTERVAL);
    }
    Ok(())
}

fn run_queue(index: usize, receiver: Receiver<Command>, lost: Arc<AtomicBool>) {
    while let Ok(command) = receiver.recv() {
        match command {
            Command::Run(task) => {
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    tracing::error!(queue = index, "task panicked");
                }
            }
            Command::Wait { event, target } => {
                tracing::trace!(queue = index, event = event.id, target, "queue waiting");
                if wait_for_generation(&event, target, &lost).is_err() {
                    tracing::warn!(queue = index, event = event.id, "device lost during wait");
                }
            }
            Command::Signal { event, generation } => {
                event.state.lock().pending.remove(&generation);
                event.cond.notify_all();
            }
        }
    }
    tracing::trace!(queue = index, "host queue stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn device(queue_count: usize) -> HostDevice {
        HostDevice::new(HostDeviceOptions { queue_count }).unwrap()
    }

    #[test]
    fn test_zero_queues_rejected() {
        assert!(matches!(
            HostDevice::new(HostDeviceOptions { queue_count: 0 }),
            Err(RuntimeError::InitError(_))
        ));
    }

    #[test]
    fn test_queue_runs_in_order() {
        let device = device(1);
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..8 {
            let log = Arc::clone(&log);
            device
                .enqueue(QueueId(0), Box::new(move || log.lock().push(i)))
                .unwrap();
        }
        let event = device.create_event().unwrap();
        device.record_event(&event, QueueId(0)).unwrap();
        device.synchronize_event(&event).unwrap();
        assert_eq!(*log.lock(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_unrecorded_event_is_complete() {
        let device = device(1);
        let event = device.create_event().unwrap();
        assert_eq!(device.query_event(&event).unwrap(), EventStatus::Complete);
        device.synchronize_event(&event).unwrap();
    }

    #[test]
    fn test_query_not_ready_until_work_done() {
        let device = device(1);
        let (release, gate) = bounded::<()>(0);
        device
            .enqueue(
                QueueId(0),
                Box::new(move || {
                    let _ = gate.recv();
                }),
            )
            .unwrap();

        let event = device.create_event().unwrap();
        device.record_event(&event, QueueId(0)).unwrap();
        assert_eq!(device.query_event(&event).unwrap(), EventStatus::NotReady);

        release.send(()).unwrap();
        device.synchronize_event(&event).unwrap();
        assert_eq!(device.query_event(&event).unwrap(), EventStatus::Complete);
    }

    #[test]
    fn test_cross_queue_wait_orders_work() {
        let device = device(2);
        let (release, gate) = bounded::<()>(0);
        let log = Arc::new(Mutex::new(Vec::new()));

        let producer_log = Arc::clone(&log);
        device
            .enqueue(
                QueueId(0),
                Box::new(move || {
                    let _ = gate.recv();
                    producer_log.lock().push("produce");
                }),
            )
            .unwrap();
        let written = device.create_event().unwrap();
        device.record_event(&written, QueueId(0)).unwrap();

        device.queue_wait_event(QueueId(1), &written).unwrap();
        let consumer_log = Arc::clone(&log);
        device
            .enqueue(
                QueueId(1),
                Box::new(move || consumer_log.lock().push("consume")),
            )
            .unwrap();
        let read = device.create_event().unwrap();
        device.record_event(&read, QueueId(1)).unwrap();

        // Queue 1 is blocked behind queue 0's gated task.
        assert_eq!(device.query_event(&read).unwrap(), EventStatus::NotReady);

        release.send(()).unwrap();
        device.synchronize_event(&read).unwrap();
        assert_eq!(*log.lock(), vec!["produce", "consume"]);
    }

    #[test]
    fn test_invalid_queue() {
        let device = device(2);
        let event = device.create_event().unwrap();
        assert!(matches!(
            device.record_event(&event, QueueId(5)),
            Err(RuntimeError::Device(_))
        ));
        assert!(device.enqueue(QueueId(2), Box::new(|| {})).is_err());

        // The failed recording leaves nothing to wait for.
        assert_eq!(device.query_event(&event).unwrap(), EventStatus::Complete);
        device.synchronize_event(&event).unwrap();
        device.queue_wait_event(QueueId(0), &event).unwrap();
    }

    #[test]
    fn test_recordings_accumulate_across_queues() {
        let device = device(2);
        let (release, gate) = bounded::<()>(0);
        device
            .enqueue(
                QueueId(0),
                Box::new(move || {
                    let _ = gate.recv();
                }),
            )
            .unwrap();

        let event = device.create_event().unwrap();
        device.record_event(&event, QueueId(0)).unwrap();

        // A later recording on an idle queue signals first.
        let later = device.create_event().unwrap();
        device.record_event(&event, QueueId(1)).unwrap();
        device.record_event(&later, QueueId(1)).unwrap();
        device.synchronize_event(&later).unwrap();
        assert_eq!(device.query_event(&event).unwrap(), EventStatus::NotReady);

        release.send(()).unwrap();
        device.synchronize_event(&event).unwrap();
        assert_eq!(device.query_event(&event).unwrap(), EventStatus::Complete);
    }

    #[test]
    fn test_generation_reached_in_order() {
        let mut state = EventState {
            recorded: 3,
            pending: BTreeSet::from([1, 3]),
            destroyed: false,
        };
        assert!(!state.reached(1));
        assert!(!state.reached(2));

        state.pending.remove(&1);
        assert!(state.reached(2));
        assert!(!state.reached(3));
        assert!(!state.is_complete());
    }

    #[test]
    fn test_lost_device_fails_calls() {
        let device = device(1);
        let event = device.create_event().unwrap();
        device.mark_lost();

        assert!(matches!(
            device.query_event(&event),
            Err(RuntimeError::Device(_))
        ));
        assert!(device.create_event().is_err());
        assert!(device.enqueue(QueueId(0), Box::new(|| {})).is_err());
    }

    #[test]
    fn test_destroyed_event_rejected() {
        let device = device(1);
        let event = device.create_event().unwrap();
        device.destroy_event(&event).unwrap();
        assert_eq!(device.live_events(), 0);
        assert!(device.record_event(&event, QueueId(0)).is_err());
    }

    #[test]
    fn test_panicking_task_keeps_queue_alive() {
        let device = device(1);
        device
            .enqueue(QueueId(0), Box::new(|| panic!("kernel bug")))
            .unwrap();
        let event = device.create_event().unwrap();
        device.record_event(&event, QueueId(0)).unwrap();
        device.synchronize_event(&event).unwrap();
    }
}
