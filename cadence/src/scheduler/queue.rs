//! Work queue and delay queue for the scheduler

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use tokio::time::Instant;
use tracing::debug;

use crate::domain::AttemptKind;

use super::limiter::{ResourceLimiter, Slot};

/// A pending admission for one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// Index of the key in the loaded key list
    pub index: usize,
    pub kind: AttemptKind,
    /// When the item became (or becomes) ready to dispatch
    pub enqueued_at: Instant,
}

impl QueueItem {
    pub fn new(index: usize, kind: AttemptKind, enqueued_at: Instant) -> Self {
        Self {
            index,
            kind,
            enqueued_at,
        }
    }
}

/// FIFO of items ready to run, waiting for a free slot
#[derive(Debug, Default)]
pub struct WorkQueue {
    items: VecDeque<QueueItem>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, item: QueueItem) {
        debug!(index = item.index, kind = %item.kind, "WorkQueue::enqueue: called");
        self.items.push_back(item);
    }

    pub fn front(&self) -> Option<&QueueItem> {
        self.items.front()
    }

    /// Remove the head without taking a slot
    pub fn pop_front(&mut self) -> Option<QueueItem> {
        self.items.pop_front()
    }

    /// Remove the head together with a slot, or leave it in place
    ///
    /// The slot is only taken when there is an item to hand it to, and the
    /// item is only removed when a slot was available.
    pub fn dequeue_if_capacity(&mut self, limiter: &ResourceLimiter) -> Option<(QueueItem, Slot)> {
        if self.items.is_empty() {
            return None;
        }
        let slot = limiter.try_acquire()?;
        let item = self.items.pop_front()?;
        debug!(index = item.index, "WorkQueue::dequeue_if_capacity: dispatching head");
        Some((item, slot))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) -> Vec<QueueItem> {
        self.items.drain(..).collect()
    }
}

/// An item waiting for its ready time
#[derive(Debug)]
struct DelayedEntry {
    seq: u64,
    item: QueueItem,
}

impl Eq for DelayedEntry {}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earliest ready time first, then insertion order (max-heap, so reversed)
        other
            .item
            .enqueued_at
            .cmp(&self.item.enqueued_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of items keyed by ready time
#[derive(Debug, Default)]
pub struct DelayQueue {
    heap: BinaryHeap<DelayedEntry>,
    next_seq: u64,
}

impl DelayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold `item` until its `enqueued_at` instant
    pub fn push(&mut self, item: QueueItem) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(DelayedEntry { seq, item });
    }

    /// Pop the earliest item whose ready time has passed
    pub fn pop_due(&mut self, now: Instant) -> Option<QueueItem> {
        if self.heap.peek()?.item.enqueued_at <= now {
            self.heap.pop().map(|entry| entry.item)
        } else {
            None
        }
    }

    pub fn next_ready_at(&self) -> Option<Instant> {
        self.heap.peek().map(|entry| entry.item.enqueued_at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueItem> {
        self.heap.iter().map(|entry| &entry.item)
    }

    pub fn clear(&mut self) -> Vec<QueueItem> {
        self.heap.drain().map(|entry| entry.item).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::limiter::Capacity;
    use std::time::Duration;

    fn item(index: usize, at: Instant) -> QueueItem {
        QueueItem::new(index, AttemptKind::Initial, at)
    }

    #[test]
    fn test_work_queue_is_fifo() {
        let now = Instant::now();
        let limiter = ResourceLimiter::new(Capacity::Unbounded);
        let mut queue = WorkQueue::new();
        queue.enqueue(item(2, now));
        queue.enqueue(item(0, now));
        queue.enqueue(item(1, now));

        let order: Vec<_> = std::iter::from_fn(|| queue.dequeue_if_capacity(&limiter))
            .map(|(item, _slot)| item.index)
            .collect();
        assert_eq!(order, vec![2, 0, 1]);
    }

    #[test]
    fn test_dequeue_without_capacity_keeps_head() {
        let now = Instant::now();
        let limiter = ResourceLimiter::new(Capacity::bounded(1).unwrap());
        let mut queue = WorkQueue::new();
        queue.enqueue(item(0, now));
        queue.enqueue(item(1, now));

        let (first, slot) = queue.dequeue_if_capacity(&limiter).unwrap();
        assert_eq!(first.index, 0);

        assert!(queue.dequeue_if_capacity(&limiter).is_none());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.front().map(|i| i.index), Some(1));

        drop(slot);
        let (second, _slot) = queue.dequeue_if_capacity(&limiter).unwrap();
        assert_eq!(second.index, 1);
    }

    #[test]
    fn test_dequeue_empty_queue_takes_no_slot() {
        let limiter = ResourceLimiter::new(Capacity::bounded(1).unwrap());
        let mut queue = WorkQueue::new();
        assert!(queue.dequeue_if_capacity(&limiter).is_none());
        assert_eq!(limiter.outstanding(), 0);
    }

    #[test]
    fn test_delay_queue_orders_by_ready_time() {
        let now = Instant::now();
        let mut delayed = DelayQueue::new();
        delayed.push(item(0, now + Duration::from_secs(30)));
        delayed.push(item(1, now + Duration::from_secs(10)));
        delayed.push(item(2, now + Duration::from_secs(20)));

        assert_eq!(delayed.next_ready_at(), Some(now + Duration::from_secs(10)));
        assert!(delayed.pop_due(now).is_none());

        let later = now + Duration::from_secs(25);
        assert_eq!(delayed.pop_due(later).map(|i| i.index), Some(1));
        assert_eq!(delayed.pop_due(later).map(|i| i.index), Some(2));
        assert!(delayed.pop_due(later).is_none());
        assert_eq!(delayed.len(), 1);
    }

    #[test]
    fn test_delay_queue_ties_are_fifo() {
        let now = Instant::now();
        let mut delayed = DelayQueue::new();
        for index in [4, 1, 3] {
            delayed.push(item(index, now));
        }

        let order: Vec<_> = std::iter::from_fn(|| delayed.pop_due(now)).map(|i| i.index).collect();
        assert_eq!(order, vec![4, 1, 3]);
    }
}
