pub mod agent;
pub mod backoff;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod connector;
pub mod endpoint;
pub mod error;
pub mod form;
pub mod platform;
pub mod queue;
pub mod registry;
pub mod routes;
pub mod scheduler;
pub mod signal;
pub mod store;
pub mod types;

pub use agent::{HealthResponse, RelayAgent};
pub use bridge::{Bridge, BridgeMessage, BridgeQueue, BridgeSettings};
pub use config::{ConfigError, RelayConfig};
pub use connector::{Frame, FrameStream, SourceConnector, WebSocketConnector};
pub use error::{RelayError, RelayResult};
pub use platform::{CoreClient, HostPlatform, StreamProducer, VariableRegistrar};
pub use queue::{BoundedQueue, QueueMetrics};
pub use registry::{BridgeRegistry, RegistrationResult};
pub use routes::router;
pub use scheduler::{FairScheduler, SchedulerSettings, Turn};
pub use signal::{OutputQueue, Signal, SignalStats};
pub use store::SignalStore;
pub use types::*;
