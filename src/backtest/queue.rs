//! Priority queue enforcing the engine's total event order

use super::event::Event;
use std::collections::BinaryHeap;

/// Max-heap over [`Event`] that stamps insertion sequence numbers
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Event>,
    next_sequence: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            next_sequence: 0,
        }
    }

    /// Insert an event, assigning the next sequence number; returns it
    pub fn push(&mut self, mut event: Event) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        event.sequence = sequence;
        self.heap.push(event);
        sequence
    }

    /// Insert every event in iteration order
    pub fn extend(&mut self, events: impl IntoIterator<Item = Event>) {
        let events = events.into_iter();
        self.heap.reserve(events.size_hint().0);
        for event in events {
            self.push(event);
        }
    }

    /// Remove and return the next event in drain order
    pub fn pop(&mut self) -> Option<Event> {
        self.heap.pop()
    }

    /// Next event without removing it
    pub fn peek(&self) -> Option<&Event> {
        self.heap.peek()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop all events and restart sequence numbering
    pub fn clear(&mut self) {
        self.heap.clear();
        self.next_sequence = 0;
    }

    /// Sequence number the next push will receive
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::event::{EventPayload, EventPriority, RiskCheckEvent};

    fn event(priority: EventPriority, ts: i64, tag: &str) -> Event {
        Event::new(
            ts,
            priority,
            EventPayload::RiskCheck(RiskCheckEvent {
                reason: tag.to_string(),
            }),
        )
    }

    fn tag(e: &Event) -> String {
        match &e.payload {
            EventPayload::RiskCheck(r) => r.reason.clone(),
            _ => String::new(),
        }
    }

    #[test]
    fn test_sequence_assigned_on_push() {
        let mut queue = EventQueue::new();
        assert_eq!(queue.push(event(EventPriority::Normal, 1, "a")), 0);
        assert_eq!(queue.push(event(EventPriority::Normal, 1, "b")), 1);
        assert_eq!(queue.next_sequence(), 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_drain_order() {
        let mut queue = EventQueue::new();
        queue.push(event(EventPriority::Normal, 30, "n30"));
        queue.push(event(EventPriority::Low, 1, "l1"));
        queue.push(event(EventPriority::Normal, 10, "n10-a"));
        queue.push(event(EventPriority::Critical, 99, "c99"));
        queue.push(event(EventPriority::Normal, 10, "n10-b"));
        queue.push(event(EventPriority::High, 50, "h50"));

        let order: Vec<String> = std::iter::from_fn(|| queue.pop()).map(|e| tag(&e)).collect();
        assert_eq!(
            order,
            vec!["c99", "h50", "n10-a", "n10-b", "n30", "l1"]
        );
    }

    #[test]
    fn test_identical_timestamps_keep_insertion_order() {
        let mut queue = EventQueue::new();
        for i in 0..100 {
            queue.push(event(EventPriority::Normal, 7, &i.to_string()));
        }
        for i in 0..100 {
            assert_eq!(tag(&queue.pop().unwrap()), i.to_string());
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clear_resets_sequence() {
        let mut queue = EventQueue::new();
        queue.extend(vec![
            event(EventPriority::Normal, 1, "a"),
            event(EventPriority::Normal, 2, "b"),
        ]);
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.next_sequence(), 0);
        assert!(queue.peek().is_none());
    }
}
