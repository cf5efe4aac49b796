//! Named in-process bus broker
//!
//! The shared-memory broker kind resolves a process-global named bus.
//! Every subscriber created from a broker with the same name sees every
//! message published to that name, which gives embedded producers and the
//! test suite a frame-injection path without a network hop.

use crate::bus::{BusBroker, BusMessage, BusQueue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

#[derive(Debug, Default)]
struct SharedBus {
    subscribers: Mutex<Vec<Arc<BusQueue>>>,
}

impl SharedBus {
    fn fan_out(&self, message: &BusMessage) {
        let subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for subscriber in subscribers.iter() {
            subscriber.push(message.clone());
        }
    }

    fn attach(&self, queue: Arc<BusQueue>) {
        match self.subscribers.lock() {
            Ok(mut guard) => guard.push(queue),
            Err(poisoned) => poisoned.into_inner().push(queue),
        }
    }

    fn detach(&self, queue: &Arc<BusQueue>) {
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.retain(|s| !Arc::ptr_eq(s, queue));
    }
}

fn registry() -> &'static Mutex<HashMap<String, Arc<SharedBus>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<SharedBus>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn open_bus(name: &str) -> Arc<SharedBus> {
    let mut buses = match registry().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    Arc::clone(buses.entry(name.to_string()).or_default())
}

/// Publisher handle for a named bus
#[derive(Clone)]
pub struct BusPublisher {
    bus: Arc<SharedBus>,
}

impl BusPublisher {
    /// Open a publisher towards the named bus
    pub fn open(name: &str) -> Self {
        Self {
            bus: open_bus(name),
        }
    }

    /// Deliver a message to every subscriber of the bus
    pub fn publish(&self, message: BusMessage) {
        self.bus.fan_out(&message);
    }
}

/// Broker over a process-global named bus
pub struct SharedMemoryBroker {
    name: String,
    bus: Arc<SharedBus>,
    created: Vec<Arc<BusQueue>>,
}

impl SharedMemoryBroker {
    /// Open (or create) the named bus
    pub fn open(name: &str) -> Self {
        log::debug!("Opening shared bus: {}", name);
        Self {
            name: name.to_string(),
            bus: open_bus(name),
            created: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl BusBroker for SharedMemoryBroker {
    fn create_subscriber(&mut self) -> Arc<BusQueue> {
        let queue = BusQueue::new();
        self.bus.attach(Arc::clone(&queue));
        self.created.push(Arc::clone(&queue));
        queue
    }
}

impl Drop for SharedMemoryBroker {
    fn drop(&mut self) {
        for queue in &self.created {
            queue.stop();
            self.bus.detach(queue);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CanDataFrame;
    use std::time::Duration;

    fn frame(can_id: u32) -> BusMessage {
        BusMessage::DataFrame(CanDataFrame {
            timestamp_ns: 0,
            can_id,
            is_extended: false,
            data: vec![1, 2, 3],
        })
    }

    #[test]
    fn test_publish_reaches_subscriber() {
        let mut broker = SharedMemoryBroker::open("test-bus-basic");
        let subscriber = broker.create_subscriber();
        subscriber.start();

        let publisher = BusPublisher::open("test-bus-basic");
        publisher.publish(frame(0x321));

        match subscriber.pop_wait(Duration::from_secs(1)) {
            Some(BusMessage::DataFrame(f)) => assert_eq!(f.can_id, 0x321),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_buses_are_isolated_by_name() {
        let mut broker = SharedMemoryBroker::open("test-bus-a");
        let subscriber = broker.create_subscriber();
        subscriber.start();

        BusPublisher::open("test-bus-b").publish(frame(0x100));
        assert!(subscriber.pop_wait(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn test_drop_detaches_subscribers() {
        let queue = {
            let mut broker = SharedMemoryBroker::open("test-bus-drop");
            broker.create_subscriber()
        };
        // Broker gone: its subscribers are stopped and detached.
        assert!(!queue.is_active());
        BusPublisher::open("test-bus-drop").publish(frame(0x1));
        assert!(queue.is_empty());
    }
}
