//! Deferred one-shot actions
//!
//! Timed actions scheduled by message handlers and run by the engine loop
//! once their deadline passes. Actions are never cancelled by remote events;
//! only dropping the queue discards them.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use tokio::time::Instant;

/// An action to run later
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredAction {
    /// Re-broadcast the local peer's full state as UPDATE
    RebroadcastOwnState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Scheduled {
    due: Instant,
    seq: u64,
    action: DeferredAction,
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Deadline-ordered queue of pending actions
#[derive(Debug, Default)]
pub struct DeferredQueue {
    heap: BinaryHeap<Reverse<Scheduled>>,
    next_seq: u64,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule an action at a deadline
    pub fn schedule(&mut self, due: Instant, action: DeferredAction) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Scheduled { due, seq, action }));
    }

    /// Remove and return every action due at `now`, earliest first
    pub fn pop_due(&mut self, now: Instant) -> Vec<DeferredAction> {
        let mut due = Vec::new();
        while let Some(Reverse(next)) = self.heap.peek() {
            if next.due > now {
                break;
            }
            if let Some(Reverse(scheduled)) = self.heap.pop() {
                due.push(scheduled.action);
            }
        }
        due
    }

    /// Deadline of the earliest pending action
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(next)| next.due)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pop_due_respects_deadline() {
        let start = Instant::now();
        let mut queue = DeferredQueue::new();
        queue.schedule(start + Duration::from_millis(500), DeferredAction::RebroadcastOwnState);

        assert!(queue.pop_due(start).is_empty());
        assert!(queue.pop_due(start + Duration::from_millis(499)).is_empty());
        assert_eq!(
            queue.pop_due(start + Duration::from_millis(500)),
            vec![DeferredAction::RebroadcastOwnState]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_earliest_deadline_first() {
        let start = Instant::now();
        let mut queue = DeferredQueue::new();
        queue.schedule(start + Duration::from_millis(900), DeferredAction::RebroadcastOwnState);
        queue.schedule(start + Duration::from_millis(100), DeferredAction::RebroadcastOwnState);

        assert_eq!(queue.next_deadline(), Some(start + Duration::from_millis(100)));
        assert_eq!(queue.pop_due(start + Duration::from_millis(100)).len(), 1);
        assert_eq!(queue.next_deadline(), Some(start + Duration::from_millis(900)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_each_schedule_fires_once() {
        let start = Instant::now();
        let mut queue = DeferredQueue::new();
        for _ in 0..3 {
            queue.schedule(start, DeferredAction::RebroadcastOwnState);
        }
        assert_eq!(queue.pop_due(start).len(), 3);
        assert!(queue.pop_due(start + Duration::from_secs(10)).is_empty());
        assert_eq!(queue.next_deadline(), None);
    }
}
