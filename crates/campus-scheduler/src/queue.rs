use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::task::Task;

/// Pending tasks, highest priority first and FIFO among equal priorities.
#[derive(Debug)]
pub(crate) struct PriorityQueue<E> {
    heap: BinaryHeap<Queued<E>>,
    next_seq: u64,
}

#[derive(Debug)]
struct Queued<E> {
    priority: i32,
    seq: u64,
    task: Task<E>,
}

impl<E> PartialEq for Queued<E> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<E> Eq for Queued<E> {}

impl<E> PartialOrd for Queued<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<E> Ord for Queued<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // max-heap: larger priority wins, then the earlier submission
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<E> PriorityQueue<E> {
    pub(crate) fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub(crate) fn push(&mut self, task: Task<E>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Queued {
            priority: task.priority,
            seq,
            task,
        });
    }

    pub(crate) fn pop(&mut self) -> Option<Task<E>> {
        self.heap.pop().map(|queued| queued.task)
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Removes every pending task in no particular order.
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = Task<E>> + '_ {
        self.heap.drain().map(|queued| queued.task)
    }
}
