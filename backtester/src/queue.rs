use std::collections::VecDeque;

use common::Event;

/// FIFO event channel owned by the driver.
///
/// Producers get `&mut` access for the duration of a handler call; only the
/// driver dequeues. An empty queue is `None`, not an error.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: VecDeque<Event>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the tail
    pub fn enqueue(&mut self, event: Event) {
        self.events.push_back(event);
    }

    /// Pop the head without blocking
    pub fn try_dequeue(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Extend<Event> for EventQueue {
    fn extend<T: IntoIterator<Item = Event>>(&mut self, iter: T) {
        self.events.extend(iter);
    }
}
