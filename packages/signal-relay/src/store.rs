use crate::platform::VariableRegistrar;
use crate::signal::{OutputQueue, Signal, SignalStats, HISTORY_CAPACITY, SUBSCRIBER_QUEUE_SIZE};
use crate::types::{Sample, SignalKey};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

/// All signals observed on the consume side, keyed by stream key
pub struct SignalStore {
    signals: RwLock<HashMap<SignalKey, Arc<Signal>>>,
    /// Serializes first observations so each key is declared exactly once
    creation: AsyncMutex<()>,
    registrar: Arc<dyn VariableRegistrar>,
    history_capacity: usize,
    queue_size: usize,
}

impl SignalStore {
    pub fn new(registrar: Arc<dyn VariableRegistrar>) -> Self {
        Self::with_capacity(registrar, HISTORY_CAPACITY, SUBSCRIBER_QUEUE_SIZE)
    }

    pub fn with_capacity(
        registrar: Arc<dyn VariableRegistrar>,
        history_capacity: usize,
        queue_size: usize,
    ) -> Self {
        Self {
            signals: RwLock::new(HashMap::new()),
            creation: AsyncMutex::new(()),
            registrar,
            history_capacity,
            queue_size,
        }
    }

    /// Record a sample under its key, creating the signal on first sight
    pub async fn append(&self, sample: Sample) -> usize {
        let signal = self.get_or_create(&sample.key).await;
        signal.append(sample)
    }

    /// Look up or create a signal. New keys are declared to the platform first;
    /// a failed declaration is logged and the signal is created anyway.
    pub async fn get_or_create(&self, key: &str) -> Arc<Signal> {
        if let Some(signal) = self.get(key) {
            return signal;
        }

        let _guard = self.creation.lock().await;
        if let Some(signal) = self.get(key) {
            return signal;
        }

        let description = format!("{} from stream", key);
        if let Err(e) = self.registrar.declare_variable(key, &description).await {
            warn!("Failed to declare variable {}: {}", key, e);
        }

        let signal = Arc::new(Signal::with_capacity(
            key,
            self.history_capacity,
            self.queue_size,
        ));
        self.signals
            .write()
            .insert(key.to_string(), Arc::clone(&signal));
        info!("New signal observed: {}", key);

        signal
    }

    pub fn get(&self, key: &str) -> Option<Arc<Signal>> {
        self.signals.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.signals.read().contains_key(key)
    }

    /// Subscribe to a known signal
    pub fn subscribe(&self, key: &str) -> Option<Arc<OutputQueue>> {
        self.get(key).map(|signal| signal.subscribe())
    }

    /// Drop a subscription; unknown keys and queues are ignored
    pub fn unsubscribe(&self, key: &str, queue: &Arc<OutputQueue>) {
        if let Some(signal) = self.get(key) {
            signal.unsubscribe(queue);
        }
    }

    pub fn keys(&self) -> Vec<SignalKey> {
        let mut keys: Vec<SignalKey> = self.signals.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.signals.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> Vec<SignalStats> {
        let signals: Vec<Arc<Signal>> = self.signals.read().values().cloned().collect();
        let mut stats: Vec<SignalStats> = signals.iter().map(|s| s.stats()).collect();
        stats.sort_by(|a, b| a.key.cmp(&b.key));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RelayError, RelayResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingRegistrar {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl VariableRegistrar for CountingRegistrar {
        async fn declare_variable(&self, _name: &str, _description: &str) -> RelayResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Widen the race window between concurrent first appends
            tokio::time::sleep(Duration::from_millis(5)).await;
            if self.fail {
                Err(RelayError::Connection("core offline".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_append_creates_signal() {
        let registrar = Arc::new(CountingRegistrar::default());
        let store = SignalStore::new(registrar.clone());

        assert!(store.get("temp").is_none());
        store.append(Sample::new("temp", 1.0, 20.0)).await;
        store.append(Sample::new("temp", 2.0, 21.0)).await;

        assert_eq!(store.get("temp").unwrap().len(), 2);
        assert_eq!(registrar.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.keys(), vec!["temp".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_appends_declare_once() {
        let registrar = Arc::new(CountingRegistrar::default());
        let store = Arc::new(SignalStore::new(registrar.clone()));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.append(Sample::new("k", i as f64, 0.0)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registrar.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("k").unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_failed_declaration_still_creates_signal() {
        let registrar = Arc::new(CountingRegistrar {
            fail: true,
            ..Default::default()
        });
        let store = SignalStore::new(registrar);

        store.append(Sample::new("k", 1.0, 1.0)).await;
        assert!(store.contains("k"));
    }

    #[tokio::test]
    async fn test_subscribe_unknown_key() {
        let store = SignalStore::new(Arc::new(CountingRegistrar::default()));
        assert!(store.subscribe("missing").is_none());

        // Unsubscribing from an unknown key is harmless
        let stray = Arc::new(OutputQueue::new(1));
        store.unsubscribe("missing", &stray);
    }

    #[tokio::test]
    async fn test_subscribe_receives_appends() {
        let store = SignalStore::new(Arc::new(CountingRegistrar::default()));
        store.append(Sample::new("k", 1.0, 1.0)).await;

        let queue = store.subscribe("k").unwrap();
        store.append(Sample::new("k", 2.0, 2.0)).await;
        assert_eq!(queue.try_pop().unwrap().timestamp, 2.0);

        store.unsubscribe("k", &queue);
        store.append(Sample::new("k", 3.0, 3.0)).await;
        assert!(queue.is_empty());
    }
}
