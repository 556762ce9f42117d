//! Event System
//!
//! Provides a pub/sub event bus carrying orchestration events
//! (progress, output lines, diagnostics, terminal results) from
//! background operations to their consumers.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use tracing::trace;

/// Events emitted by running operations
#[derive(Debug, Clone)]
pub enum Event {
    /// An operation or step has started
    Started { name: String },
    /// Overall progress, 0-100
    Progress { percent: u8 },
    /// A raw output line from an external tool
    Output { line: String },
    /// Human-readable progress message
    Info { message: String },
    /// Non-fatal problem; the operation continues
    Warning { message: String },
    /// Human-readable error message
    Error { message: String },
    /// Terminal result of an operation
    Finished { success: bool },
}

/// Subscriber handle for receiving events
#[derive(Clone)]
pub struct EventSubscription {
    receiver: Receiver<Event>,
}

impl EventSubscription {
    /// Receive the next event (blocking)
    pub fn recv(&self) -> Result<Event, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv(&self) -> Result<Event, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Drain everything that has been delivered so far
    pub fn drain(&self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Get an iterator over events
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.receiver.iter()
    }
}

/// Event bus for publish/subscribe pattern
///
/// Emission is synchronous fan-out, so events from a single producer are
/// observed by every subscriber in the order they were emitted.
pub struct EventBus {
    subscribers: RwLock<Vec<Sender<Event>>>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> EventSubscription {
        let (sender, receiver) = unbounded();
        self.subscribers.write().push(sender);
        EventSubscription { receiver }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: Event) -> usize {
        let subscribers = self.subscribers.read();
        let mut delivered = 0;

        for sender in subscribers.iter() {
            if sender.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }

        trace!("Event {:?} delivered to {} subscribers", event, delivered);
        delivered
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_bus() {
        let bus = EventBus::new();
        let sub1 = bus.subscribe();
        let sub2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        let delivered = bus.emit(Event::Progress { percent: 42 });
        assert_eq!(delivered, 2);

        assert!(sub1.try_recv().is_ok());
        assert!(sub2.try_recv().is_ok());
    }

    #[test]
    fn test_emission_order_preserved() {
        let bus = EventBus::new();
        let sub = bus.subscribe();

        for percent in [10u8, 20, 30] {
            bus.emit(Event::Progress { percent });
        }
        bus.emit(Event::Finished { success: true });

        let events = sub.drain();
        assert_eq!(events.len(), 4);
        match &events[0] {
            Event::Progress { percent } => assert_eq!(*percent, 10),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(events[3], Event::Finished { success: true }));
    }
}
