use crate::bridge::BridgeSettings;
use crate::config::RelayConfig;
use crate::connector::SourceConnector;
use crate::error::{RelayError, RelayResult};
use crate::platform::{HostPlatform, VariableRegistrar};
use crate::registry::{BridgeRegistry, RegistrationResult};
use crate::scheduler::{FairScheduler, SchedulerSettings};
use crate::signal::SignalStats;
use crate::store::SignalStore;
use crate::types::{BridgeInfo, ConsumeMessage, StreamKind, StreamRegistration, Variable};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// The running producer loop
struct ProducerTask {
    stream_name: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Health report
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub id: String,
    pub uptime_seconds: u64,
    pub producer_stream: Option<String>,
    pub streams: BTreeMap<String, StreamKind>,
    pub bridges: Vec<BridgeInfo>,
    pub signals: Vec<SignalStats>,
}

/// Relay context shared by every handler.
///
/// Built once at startup; owns the bridge registry, the signal store and the
/// producer loop, and knows which platform streams have been registered.
pub struct RelayAgent {
    config: RelayConfig,
    platform: Arc<dyn HostPlatform>,
    registry: BridgeRegistry,
    store: Arc<SignalStore>,
    streams: RwLock<BTreeMap<String, StreamKind>>,
    producer: Mutex<Option<ProducerTask>>,
    shutdown: CancellationToken,
    start_time: Instant,
}

impl RelayAgent {
    pub fn new<P>(config: RelayConfig, platform: Arc<P>, connector: Arc<dyn SourceConnector>) -> Self
    where
        P: HostPlatform + 'static,
    {
        let bridge_settings = BridgeSettings {
            interval: config.bridge_interval(),
            queue_size: config.relay.bridge_queue_size,
            secure: config.relay.secure_bridge,
        };
        let registry = BridgeRegistry::new(connector, bridge_settings);

        let registrar: Arc<dyn VariableRegistrar> = platform.clone();
        let platform: Arc<dyn HostPlatform> = platform;
        let store = Arc::new(SignalStore::with_capacity(
            registrar,
            config.relay.history_capacity,
            config.relay.subscriber_queue_size,
        ));

        Self {
            config,
            platform,
            registry,
            store,
            streams: RwLock::new(BTreeMap::new()),
            producer: Mutex::new(None),
            shutdown: CancellationToken::new(),
            start_time: Instant::now(),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn registry(&self) -> &BridgeRegistry {
        &self.registry
    }

    pub fn store(&self) -> Arc<SignalStore> {
        Arc::clone(&self.store)
    }

    /// Cancelled when the process begins shutting down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Start relaying a remote variable
    pub async fn bridge(&self, variable: Variable) -> RegistrationResult {
        info!("{} requested to stream", variable.name);
        self.registry.add(variable).await
    }

    /// Stop relaying a remote variable
    pub async fn unbridge(&self, name: &str) -> bool {
        info!("{} requested to remove from stream", name);
        self.registry.remove(name).await
    }

    pub fn stream_kind(&self, name: &str) -> Option<StreamKind> {
        self.streams.read().get(name).copied()
    }

    pub fn producer_stream(&self) -> Option<String> {
        self.producer
            .lock()
            .as_ref()
            .map(|task| task.stream_name.clone())
    }

    /// Register a platform stream.
    ///
    /// A consumer stream feeds the signal store; a producer stream receives
    /// the fair scheduler's output. Only one producer stream can be active.
    pub async fn register_stream(&self, registration: StreamRegistration) -> RelayResult<String> {
        let StreamRegistration {
            stream_type,
            stream_name,
        } = registration;

        match self.stream_kind(&stream_name) {
            Some(kind) if kind == stream_type => {
                return Ok(format!("{} registered", stream_name));
            }
            Some(kind) => {
                return Err(RelayError::InvalidInput(format!(
                    "{} is already registered as {}",
                    stream_name, kind
                )));
            }
            None => {}
        }

        if stream_type == StreamKind::Producer {
            if let Some(active) = self.producer_stream() {
                return Err(RelayError::ProducerActive(active));
            }
        }

        let producer = self.platform.open_stream(&stream_name).await?;

        if stream_type == StreamKind::Producer {
            let mut slot = self.producer.lock();
            if let Some(active) = slot.as_ref() {
                return Err(RelayError::ProducerActive(active.stream_name.clone()));
            }

            let scheduler = FairScheduler::new(
                self.registry.clone(),
                producer,
                SchedulerSettings {
                    write_interval: self.config.write_interval(),
                    ..Default::default()
                },
            );
            let cancel = self.shutdown.child_token();
            let handle = tokio::spawn(scheduler.run(cancel.clone()));

            *slot = Some(ProducerTask {
                stream_name: stream_name.clone(),
                cancel,
                handle,
            });
        }

        self.streams.write().insert(stream_name.clone(), stream_type);
        info!("{} registered as {}", stream_name, stream_type);

        Ok(format!("{} registered", stream_name))
    }

    /// Consume callback for a registered consumer stream
    pub async fn consume(&self, stream_name: &str, message: ConsumeMessage) -> RelayResult<()> {
        if self.stream_kind(stream_name) != Some(StreamKind::Consumer) {
            return Err(RelayError::StreamNotRegistered(stream_name.to_string()));
        }

        self.store.append(message.payload.into()).await;
        Ok(())
    }

    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            id: self.config.id.clone(),
            uptime_seconds: self.uptime_seconds(),
            producer_stream: self.producer_stream(),
            streams: self.streams.read().clone(),
            bridges: self.registry.list(),
            signals: self.store.stats(),
        }
    }

    /// Stop the producer loop and every bridge
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let producer = self.producer.lock().take();
        if let Some(task) = producer {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                error!("Producer loop for {} failed: {}", task.stream_name, e);
            }
        }

        self.registry.shutdown().await;
        info!("Relay agent stopped");
    }
}
