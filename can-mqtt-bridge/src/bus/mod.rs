//! Bus transport
//!
//! Frame delivery from the CAN side: a broker yields subscriber queues
//! with blocking-with-timeout pop semantics. Two broker kinds exist, a
//! process-global named bus (shared-memory kind) and a TCP client.

pub mod shared_mem;
pub mod tcp;

pub use shared_mem::{BusPublisher, SharedMemoryBroker};
pub use tcp::TcpBusBroker;

use crate::types::{CanDataFrame, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// A message received from the bus transport
///
/// Only data frames are decoded by the bridge; other frame kinds are
/// discarded by the consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    DataFrame(CanDataFrame),
    RemoteFrame { timestamp_ns: u64, can_id: u32 },
    ErrorFrame { timestamp_ns: u64 },
}

/// Broker kind selected from the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerKind {
    /// Process-global named bus
    SharedMemory,
    /// TCP client towards a remote bus broker
    Tcp,
}

/// Connection parameters for the broker factory
#[derive(Debug, Clone, Default)]
pub struct BusOptions {
    pub shared_mem_name: String,
    pub host: String,
    pub port: u16,
}

/// A broker that yields frame subscribers
pub trait BusBroker: Send {
    /// Create and register a new subscriber queue
    fn create_subscriber(&mut self) -> Arc<BusQueue>;
}

/// Create a broker of the requested kind
pub fn create_broker(kind: BrokerKind, options: &BusOptions) -> Result<Box<dyn BusBroker>> {
    match kind {
        BrokerKind::SharedMemory => Ok(Box::new(SharedMemoryBroker::open(
            &options.shared_mem_name,
        ))),
        BrokerKind::Tcp => Ok(Box::new(TcpBusBroker::connect(&options.host, options.port)?)),
    }
}

/// A subscriber queue with blocking-with-timeout pop semantics
///
/// Messages pushed while the queue is not started are dropped.
#[derive(Debug, Default)]
pub struct BusQueue {
    queue: Mutex<VecDeque<BusMessage>>,
    cond: Condvar,
    active: AtomicBool,
}

impl BusQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<BusMessage>> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Begin accepting messages
    pub fn start(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    /// Stop accepting messages and wake all blocked consumers
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.cond.notify_all();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Enqueue a message; dropped if the queue is not started
    pub fn push(&self, message: BusMessage) {
        if !self.is_active() {
            return;
        }
        self.lock_queue().push_back(message);
        self.cond.notify_one();
    }

    /// Pop the next message, waiting up to `timeout` for one to arrive
    pub fn pop_wait(&self, timeout: Duration) -> Option<BusMessage> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.lock_queue();
        loop {
            if let Some(message) = queue.pop_front() {
                return Some(message);
            }
            if !self.is_active() {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            queue = match self.cond.wait_timeout(queue, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    pub fn len(&self) -> usize {
        self.lock_queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_queue().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(can_id: u32) -> BusMessage {
        BusMessage::DataFrame(CanDataFrame {
            timestamp_ns: 0,
            can_id,
            is_extended: false,
            data: vec![0; 8],
        })
    }

    #[test]
    fn test_pop_wait_times_out_when_empty() {
        let queue = BusQueue::new();
        queue.start();
        let begin = Instant::now();
        assert!(queue.pop_wait(Duration::from_millis(50)).is_none());
        assert!(begin.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_push_before_start_is_dropped() {
        let queue = BusQueue::new();
        queue.push(frame(0x123));
        assert!(queue.is_empty());

        queue.start();
        queue.push(frame(0x123));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_pop_wait_wakes_on_push() {
        let queue = BusQueue::new();
        queue.start();

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_wait(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        queue.push(frame(0x1A0));

        match consumer.join().unwrap() {
            Some(BusMessage::DataFrame(f)) => assert_eq!(f.can_id, 0x1A0),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_stop_wakes_blocked_consumer() {
        let queue = BusQueue::new();
        queue.start();

        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop_wait(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        queue.stop();
        assert!(consumer.join().unwrap().is_none());
    }
}
