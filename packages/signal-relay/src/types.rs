use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::net::IpAddr;

/// Name of a remote variable, unique within the bridge registry
pub type VariableName = String;

/// Key of an observed stream signal
pub type SignalKey = String;

/// Remote measurement source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: VariableName,
    pub source_ip: String,
    pub source_port: u16,
}

impl Variable {
    pub fn new(name: impl Into<String>, source_ip: impl Into<String>, source_port: u16) -> Self {
        Self {
            name: name.into(),
            source_ip: source_ip.into(),
            source_port,
        }
    }

    /// Whether the source lives on this host
    pub fn is_loopback(&self) -> bool {
        if self.source_ip.eq_ignore_ascii_case("localhost") {
            return true;
        }
        self.source_ip
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
    }

    /// Endpoint the bridge subscribes to.
    ///
    /// Encrypted transport is used only for non-loopback sources when `secure` is set.
    pub fn fetch_url(&self, secure: bool) -> String {
        let scheme = if secure && !self.is_loopback() {
            "wss"
        } else {
            "ws"
        };
        format!(
            "{}://{}:{}/fetch/{}",
            scheme, self.source_ip, self.source_port, self.name
        )
    }
}

/// A single timestamped measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(rename = "signal_name", alias = "key")]
    pub key: SignalKey,
    pub timestamp: f64,
    pub value: f64,
}

impl Sample {
    pub fn new(key: impl Into<String>, timestamp: f64, value: f64) -> Self {
        Self {
            key: key.into(),
            timestamp,
            value,
        }
    }

    pub fn point(&self) -> StreamPoint {
        StreamPoint {
            timestamp: self.timestamp,
            value: self.value,
        }
    }
}

/// What a client stream receives for every sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamPoint {
    pub timestamp: f64,
    pub value: f64,
}

/// Inbound message handed over by the platform's consume callback
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumeMessage {
    pub payload: ConsumePayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumePayload {
    pub key: SignalKey,
    #[serde(deserialize_with = "number_or_string")]
    pub time: f64,
    #[serde(deserialize_with = "number_or_string")]
    pub value: f64,
}

impl From<ConsumePayload> for Sample {
    fn from(payload: ConsumePayload) -> Self {
        Sample::new(payload.key, payload.time, payload.value)
    }
}

/// The platform emits numbers either as JSON numbers or as numeric strings
fn number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

/// Connection phase of a bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Read-only snapshot of a bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeState {
    pub connection_status: ConnectionStatus,
    pub backoff_seconds: f64,
    pub running: bool,
}

impl Default for BridgeState {
    fn default() -> Self {
        Self {
            connection_status: ConnectionStatus::Disconnected,
            backoff_seconds: 1.0,
            running: false,
        }
    }
}

/// Bridge entry as reported by the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct BridgeInfo {
    pub variable: Variable,
    pub url: String,
    pub state: BridgeState,
    pub queued: usize,
    pub dropped: u64,
    pub added_at: DateTime<Utc>,
}

/// Direction of a registered platform stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Consumer,
    Producer,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Consumer => write!(f, "consumer"),
            StreamKind::Producer => write!(f, "producer"),
        }
    }
}

/// Submitted stream registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRegistration {
    pub stream_type: StreamKind,
    pub stream_name: String,
}
