// Bounded drop-newest queue
//
// Every queue in the relay (bridge output, subscriber output) uses this type.
// Producers never wait: a push into a full queue hands the item back and
// counts it as dropped. The single consumer can poll with `try_pop` or
// suspend in `pop` until an item arrives.

use crossbeam::queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Counters for queue monitoring
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub total_pushed: u64,
    pub total_popped: u64,
    pub total_dropped: u64,
    pub current_size: usize,
    pub peak_size: usize,
    pub capacity: usize,
}

/// Fixed-capacity FIFO with drop-newest overflow
pub struct BoundedQueue<T> {
    buffer: ArrayQueue<T>,
    notify: Notify,
    total_pushed: AtomicU64,
    total_popped: AtomicU64,
    total_dropped: AtomicU64,
    peak_size: AtomicUsize,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: ArrayQueue::new(capacity.max(1)),
            notify: Notify::new(),
            total_pushed: AtomicU64::new(0),
            total_popped: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
            peak_size: AtomicUsize::new(0),
        }
    }

    /// Enqueue without waiting. Returns the item back if the queue is full.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        match self.buffer.push(item) {
            Ok(()) => {
                self.total_pushed.fetch_add(1, Ordering::Relaxed);
                self.peak_size.fetch_max(self.buffer.len(), Ordering::Relaxed);
                self.notify.notify_one();
                Ok(())
            }
            Err(item) => {
                self.total_dropped.fetch_add(1, Ordering::Relaxed);
                Err(item)
            }
        }
    }

    /// Dequeue without waiting
    pub fn try_pop(&self) -> Option<T> {
        self.buffer.pop().inspect(|_| {
            self.total_popped.fetch_add(1, Ordering::Relaxed);
        })
    }

    /// Dequeue, suspending while the queue is empty
    pub async fn pop(&self) -> T {
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.try_pop() {
                return item;
            }
            notified.await;
        }
    }

    /// Drain up to `max_items`, oldest first
    pub fn drain(&self, max_items: usize) -> Vec<T> {
        let mut items = Vec::with_capacity(max_items.min(self.buffer.len()));
        while items.len() < max_items {
            match self.try_pop() {
                Some(item) => items.push(item),
                None => break,
            }
        }
        items
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buffer.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn dropped(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            total_pushed: self.total_pushed.load(Ordering::Relaxed),
            total_popped: self.total_popped.load(Ordering::Relaxed),
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
            current_size: self.buffer.len(),
            peak_size: self.peak_size.load(Ordering::Relaxed),
            capacity: self.buffer.capacity(),
        }
    }
}
