use std::{cmp::Reverse, collections::BinaryHeap, hash::Hash};

use ordered_float::OrderedFloat;
use rustc_hash::FxHashSet;

type Priority = Reverse<OrderedFloat<f64>>;

/// Min-priority queue that also remembers every item it has discovered.
///
/// Items are marked visited as soon as they are pushed, not when they are
/// popped. Equal priorities pop in insertion order.
#[derive(Debug)]
pub struct PathfindingQueue<T> {
    heap: BinaryHeap<(Priority, Reverse<u64>, Slot<T>)>,
    visited: FxHashSet<T>,
    sequence: u64,
}

/// Heap payload that never takes part in the ordering.
#[derive(Debug)]
struct Slot<T>(T);

impl<T> PartialEq for Slot<T> {
    fn eq(&self, _: &Self) -> bool {
        true
    }
}

impl<T> Eq for Slot<T> {}

impl<T> PartialOrd for Slot<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Slot<T> {
    fn cmp(&self, _: &Self) -> std::cmp::Ordering {
        std::cmp::Ordering::Equal
    }
}

impl<T> Default for PathfindingQueue<T> {
    fn default() -> Self {
        PathfindingQueue {
            heap: BinaryHeap::new(),
            visited: FxHashSet::default(),
            sequence: 0,
        }
    }
}

impl<T: Copy + Eq + Hash> PathfindingQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `item` and mark it visited.
    pub fn push(&mut self, item: T, priority: f64) {
        self.visited.insert(item);
        self.heap
            .push((Reverse(OrderedFloat(priority)), Reverse(self.sequence), Slot(item)));
        self.sequence += 1;
    }

    /// Mark `item` visited without enqueuing it.
    pub fn mark_visited(&mut self, item: T) {
        self.visited.insert(item);
    }

    /// Remove the item with the lowest priority.
    pub fn pop(&mut self) -> Option<T> {
        self.heap.pop().map(|(_, _, Slot(item))| item)
    }

    pub fn contains(&self, item: &T) -> bool {
        self.visited.contains(item)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
