//! # Wire-friendly Fetch Events
//!
//! None of these events include references to live data; they are all
//! self-contained with primitives that make them easy to encode in a
//! wire-friendly format, so an embedding engine can stream them to a
//! console, a log file, or a build-event protocol.
//!
pub mod event;

use crate::events::event::Event;
use crossbeam::deque::{Injector, Worker};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct EventChannel {
    bus: Arc<Injector<Event>>,
}

impl EventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.bus.is_empty()
    }

    pub fn send<E>(&self, event: E)
    where
        E: Into<Event>,
    {
        self.bus.push(event.into())
    }

    pub fn consumer(&self) -> EventConsumer {
        EventConsumer {
            channel: self.bus.clone(),
            queue: Worker::new_fifo(),
        }
    }
}

/// A pull-based consumer over an [EventChannel]. Call [EventConsumer::fetch]
/// to steal whatever the producers have pushed so far, then drain with
/// [EventConsumer::pop] or by iterating.
///
pub struct EventConsumer {
    channel: Arc<Injector<Event>>,
    queue: Worker<Event>,
}

impl EventConsumer {
    pub fn fetch(&self) {
        let _steal = self.channel.steal_batch(&self.queue);
    }

    pub fn pop(&self) -> Option<Event> {
        self.queue.pop()
    }

    pub fn is_empty(&self) -> bool {
        let _steal = self.channel.steal_batch(&self.queue);
        self.queue.is_empty()
    }
}

impl Iterator for &EventConsumer {
    type Item = Event;

    fn next(&mut self) -> Option<Self::Item> {
        self.pop()
    }
}
