use crate::bridge::{Bridge, BridgeQueue, BridgeSettings};
use crate::connector::SourceConnector;
use crate::types::{BridgeInfo, BridgeState, Variable, VariableName};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Registration result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationResult {
    /// New variable bridged
    Added,
    /// An existing bridge for the same name was replaced and stopped
    Replaced,
}

/// A bridged variable
#[derive(Clone)]
pub struct BridgeEntry {
    pub variable: Variable,
    pub bridge: Arc<Bridge>,
    pub queue: Arc<BridgeQueue>,
    pub added_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<VariableName, BridgeEntry>,
    /// Round-robin order; `cursor` points at the next entry to serve
    order: Vec<VariableName>,
    cursor: usize,
}

impl RegistryInner {
    fn detach(&mut self, name: &str) -> Option<BridgeEntry> {
        let entry = self.entries.remove(name)?;

        if let Some(pos) = self.order.iter().position(|n| n == name) {
            self.order.remove(pos);
            if pos < self.cursor {
                self.cursor -= 1;
            }
            if self.cursor >= self.order.len() {
                self.cursor = 0;
            }
        }

        Some(entry)
    }
}

/// In-memory registry of bridged variables.
///
/// The map, order list and cursor share one lock which is only held for
/// bookkeeping; bridges are started and stopped outside of it.
#[derive(Clone)]
pub struct BridgeRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    connector: Arc<dyn SourceConnector>,
    settings: BridgeSettings,
}

impl BridgeRegistry {
    pub fn new(connector: Arc<dyn SourceConnector>, settings: BridgeSettings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::default())),
            connector,
            settings,
        }
    }

    /// Bridge a variable. A second add for the same name replaces the first.
    pub async fn add(&self, variable: Variable) -> RegistrationResult {
        let bridge = Arc::new(Bridge::new(
            variable.clone(),
            self.settings.clone(),
            Arc::clone(&self.connector),
        ));
        let queue = bridge.start();
        let entry = BridgeEntry {
            variable: variable.clone(),
            bridge,
            queue,
            added_at: Utc::now(),
        };

        let replaced = {
            let mut inner = self.inner.lock();
            let previous = inner.entries.insert(variable.name.clone(), entry);
            if previous.is_none() {
                inner.order.push(variable.name.clone());
            }
            previous
        };

        match replaced {
            Some(previous) => {
                previous.bridge.stop().await;
                info!("{} re-bridged, previous bridge stopped", variable.name);
                RegistrationResult::Replaced
            }
            None => {
                info!("{} bridged with separate queue", variable.name);
                RegistrationResult::Added
            }
        }
    }

    /// Stop and forget a bridge. Returns false if the name was not registered.
    pub async fn remove(&self, name: &str) -> bool {
        let detached = self.inner.lock().detach(name);

        match detached {
            Some(entry) => {
                entry.bridge.stop().await;
                info!("{} removed from stream", name);
                true
            }
            None => false,
        }
    }

    /// Next entry in round-robin order, advancing the cursor
    pub fn next_turn(&self) -> Option<(VariableName, Arc<BridgeQueue>)> {
        let mut inner = self.inner.lock();
        if inner.order.is_empty() {
            return None;
        }

        let index = inner.cursor % inner.order.len();
        inner.cursor = (index + 1) % inner.order.len();

        let name = inner.order[index].clone();
        let queue = inner.entries.get(&name).map(|e| Arc::clone(&e.queue))?;
        Some((name, queue))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered names in round-robin order
    pub fn names(&self) -> Vec<VariableName> {
        self.inner.lock().order.clone()
    }

    pub fn get(&self, name: &str) -> Option<BridgeEntry> {
        self.inner.lock().entries.get(name).cloned()
    }

    pub fn status(&self, name: &str) -> Option<BridgeState> {
        self.get(name).map(|entry| entry.bridge.status())
    }

    /// Describe every bridge, in round-robin order
    pub fn list(&self) -> Vec<BridgeInfo> {
        let entries: Vec<BridgeEntry> = {
            let inner = self.inner.lock();
            inner
                .order
                .iter()
                .filter_map(|name| inner.entries.get(name).cloned())
                .collect()
        };

        entries
            .into_iter()
            .map(|entry| BridgeInfo {
                url: entry.bridge.url().to_string(),
                state: entry.bridge.status(),
                queued: entry.queue.len(),
                dropped: entry.queue.dropped(),
                variable: entry.variable,
                added_at: entry.added_at,
            })
            .collect()
    }

    /// Stop every bridge and empty the registry
    pub async fn shutdown(&self) {
        let entries: Vec<BridgeEntry> = {
            let mut inner = self.inner.lock();
            inner.order.clear();
            inner.cursor = 0;
            inner.entries.drain().map(|(_, entry)| entry).collect()
        };

        if entries.is_empty() {
            return;
        }

        info!("Stopping {} bridges", entries.len());
        join_all(entries.iter().map(|entry| entry.bridge.stop())).await;
    }
}
