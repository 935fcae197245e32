use crate::queue::BoundedQueue;
use crate::types::{Sample, SignalKey};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Samples retained per signal
pub const HISTORY_CAPACITY: usize = 1200;

/// Default capacity of a subscriber queue
pub const SUBSCRIBER_QUEUE_SIZE: usize = 100;

/// Live queue handed to one client subscription
pub type OutputQueue = BoundedQueue<Sample>;

/// Signal statistics for the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SignalStats {
    pub key: SignalKey,
    pub history_len: usize,
    pub subscribers: usize,
    pub total_appended: u64,
    pub total_dropped: u64,
}

struct SignalInner {
    history: VecDeque<Sample>,
    subscribers: Vec<Arc<OutputQueue>>,
}

/// Recent history of one key plus its live subscribers.
///
/// History and subscriber set sit behind one lock per signal, so every
/// subscriber observes appends in the same order as the history records them.
/// Fan-out never waits on a subscriber: a full queue loses that sample.
pub struct Signal {
    key: SignalKey,
    history_capacity: usize,
    queue_size: usize,
    inner: Mutex<SignalInner>,
    total_appended: AtomicU64,
    total_dropped: AtomicU64,
}

impl Signal {
    pub fn new(key: impl Into<String>) -> Self {
        Self::with_capacity(key, HISTORY_CAPACITY, SUBSCRIBER_QUEUE_SIZE)
    }

    pub fn with_capacity(key: impl Into<String>, history_capacity: usize, queue_size: usize) -> Self {
        let history_capacity = history_capacity.max(1);
        Self {
            key: key.into(),
            history_capacity,
            queue_size,
            inner: Mutex::new(SignalInner {
                history: VecDeque::with_capacity(history_capacity),
                subscribers: Vec::new(),
            }),
            total_appended: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Record a sample and offer it to every subscriber.
    /// Returns how many subscribers accepted it.
    pub fn append(&self, sample: Sample) -> usize {
        let mut inner = self.inner.lock();

        if inner.history.len() >= self.history_capacity {
            inner.history.pop_front();
        }
        inner.history.push_back(sample.clone());

        let mut delivered = 0;
        for queue in &inner.subscribers {
            if queue.try_push(sample.clone()).is_ok() {
                delivered += 1;
            } else {
                self.total_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.total_appended.fetch_add(1, Ordering::Relaxed);
        delivered
    }

    /// Register a new live queue with the default capacity
    pub fn subscribe(&self) -> Arc<OutputQueue> {
        self.subscribe_with_capacity(self.queue_size)
    }

    pub fn subscribe_with_capacity(&self, capacity: usize) -> Arc<OutputQueue> {
        let queue = Arc::new(OutputQueue::new(capacity));
        self.inner.lock().subscribers.push(Arc::clone(&queue));
        queue
    }

    /// Remove a queue. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, queue: &Arc<OutputQueue>) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|q| !Arc::ptr_eq(q, queue));
        inner.subscribers.len() != before
    }

    /// Snapshot the history sorted by timestamp and subscribe, atomically.
    ///
    /// Samples appended after the snapshot land in the returned queue, so
    /// replay followed by the live queue has neither gaps nor duplicates.
    pub fn attach(&self) -> (Vec<Sample>, Arc<OutputQueue>) {
        let queue = Arc::new(OutputQueue::new(self.queue_size));

        let mut history = {
            let mut inner = self.inner.lock();
            inner.subscribers.push(Arc::clone(&queue));
            inner.history.iter().cloned().collect::<Vec<_>>()
        };

        sort_by_timestamp(&mut history);
        (history, queue)
    }

    /// History in insertion order
    pub fn history(&self) -> Vec<Sample> {
        self.inner.lock().history.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    pub fn stats(&self) -> SignalStats {
        let (history_len, subscribers) = {
            let inner = self.inner.lock();
            (inner.history.len(), inner.subscribers.len())
        };

        SignalStats {
            key: self.key.clone(),
            history_len,
            subscribers,
            total_appended: self.total_appended.load(Ordering::Relaxed),
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Stable sort; history is kept in arrival order, not time order
fn sort_by_timestamp(samples: &mut [Sample]) {
    samples.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: f64) -> Sample {
        Sample::new("sig", ts, ts * 10.0)
    }

    #[test]
    fn test_history_is_bounded() {
        let signal = Signal::new("sig");

        for i in 0..1500 {
            signal.append(sample(i as f64));
        }

        let history = signal.history();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.first().unwrap().timestamp, 300.0);
        assert_eq!(history.last().unwrap().timestamp, 1499.0);
    }

    #[test]
    fn test_replay_sorted_by_timestamp() {
        let signal = Signal::new("sig");
        for ts in [5.0, 1.0, 3.0] {
            signal.append(sample(ts));
        }

        let (replay, _queue) = signal.attach();
        let order: Vec<f64> = replay.iter().map(|s| s.timestamp).collect();
        assert_eq!(order, vec![1.0, 3.0, 5.0]);

        // Insertion order is untouched
        let raw: Vec<f64> = signal.history().iter().map(|s| s.timestamp).collect();
        assert_eq!(raw, vec![5.0, 1.0, 3.0]);
    }

    #[test]
    fn test_full_subscriber_does_not_block_others() {
        let signal = Signal::new("sig");
        let slow = signal.subscribe_with_capacity(1);
        let fast = signal.subscribe_with_capacity(10);

        assert_eq!(signal.append(sample(1.0)), 2);
        // slow is now full; the next sample only reaches fast
        assert_eq!(signal.append(sample(2.0)), 1);

        assert_eq!(slow.drain(10).len(), 1);
        let received: Vec<f64> = fast.drain(10).iter().map(|s| s.timestamp).collect();
        assert_eq!(received, vec![1.0, 2.0]);
        assert_eq!(signal.stats().total_dropped, 1);
    }

    #[test]
    fn test_attach_then_live() {
        let signal = Signal::new("sig");
        signal.append(sample(1.0));

        let (replay, queue) = signal.attach();
        signal.append(sample(2.0));

        assert_eq!(replay.len(), 1);
        assert_eq!(queue.try_pop().unwrap().timestamp, 2.0);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let signal = Signal::new("sig");
        let queue = signal.subscribe();
        assert_eq!(signal.subscriber_count(), 1);

        assert!(signal.unsubscribe(&queue));
        assert!(!signal.unsubscribe(&queue));
        assert_eq!(signal.subscriber_count(), 0);

        signal.append(sample(1.0));
        assert!(queue.is_empty());
    }
}
