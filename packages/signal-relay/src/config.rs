use serde::{de, Deserialize, Deserializer, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file used when none is given explicitly
pub const DEFAULT_CONFIG_FILE: &str = "plugin.json";

/// Relay configuration, read once at startup from the plugin JSON file
/// with environment overrides applied on top
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Extension identifier reported to the platform
    #[serde(default = "default_id")]
    pub id: String,
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Tuning options (the `configuration` section of the plugin file)
    #[serde(default, rename = "configuration")]
    pub relay: RelaySettings,
}

/// Where the relay listens and where the platform core lives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub ip: String,
    #[serde(default = "default_port", deserialize_with = "port_number")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub target: String,
    #[serde(default = "default_target_port", deserialize_with = "port_number")]
    pub target_port: u16,
}

/// Relay tuning options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Seconds between scheduler forwards
    pub write_interval: f64,
    /// Seconds of pacing inside each bridge's message loop
    pub bridge_interval: f64,
    /// Force encrypted transport for non-loopback sources
    pub secure_bridge: bool,
    pub bridge_queue_size: usize,
    pub subscriber_queue_size: usize,
    pub history_capacity: usize,
}

fn default_id() -> String {
    "signal-relay".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_target_port() -> u16 {
    8000
}

/// Ports appear both as numbers and as strings in plugin files
fn port_number<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u16),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ip: default_host(),
            port: default_port(),
            target: default_host(),
            target_port: default_target_port(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            write_interval: 0.2,
            bridge_interval: 0.02,
            secure_bridge: false,
            bridge_queue_size: 100,
            subscriber_queue_size: 100,
            history_capacity: 1200,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            id: default_id(),
            connection: ConnectionConfig::default(),
            relay: RelaySettings::default(),
        }
    }
}

impl RelayConfig {
    /// Load configuration for the process.
    ///
    /// Reads `path`, or `plugin.json` next to the working directory when it
    /// exists, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let path = path.map(Path::to_path_buf).or_else(|| {
            let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
            fallback.exists().then_some(fallback)
        });

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        // Plugin files are often written with a UTF-8 byte order mark
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        Ok(serde_json::from_str(text)?)
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// `USE_AVAILABLE_PORT` (default true) lets the OS pick the listen port;
    /// otherwise `SERVER_PORT` (default 9000) is used. `SECURE_BRIDGE`
    /// overrides the file setting.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let use_available_port = lookup("USE_AVAILABLE_PORT")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(true);

        self.connection.port = if use_available_port {
            0
        } else {
            lookup("SERVER_PORT")
                .unwrap_or_else(|| default_port().to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?
        };

        if let Some(secure) = lookup("SECURE_BRIDGE") {
            self.relay.secure_bridge = secure.to_lowercase() == "true";
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("write_interval", self.relay.write_interval),
            ("bridge_interval", self.relay.bridge_interval),
        ] {
            if Duration::try_from_secs_f64(value).is_err() {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be a non-negative number of seconds",
                    name
                )));
            }
        }

        for (name, value) in [
            ("bridge_queue_size", self.relay.bridge_queue_size),
            ("subscriber_queue_size", self.relay.subscriber_queue_size),
            ("history_capacity", self.relay.history_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        Ok(())
    }

    /// Full bind address (addr:port)
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.connection.ip, self.connection.port)
    }

    /// Base URL of the platform core
    pub fn core_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.connection.target, self.connection.target_port
        )
    }

    /// Base URL the relay is reachable at
    pub fn public_url(&self) -> String {
        format!("http://{}:{}", self.connection.ip, self.connection.port)
    }

    /// Falls back to the default when the value is not a valid duration
    pub fn write_interval(&self) -> Duration {
        seconds(
            self.relay.write_interval,
            RelaySettings::default().write_interval,
        )
    }

    /// Falls back to the default when the value is not a valid duration
    pub fn bridge_interval(&self) -> Duration {
        seconds(
            self.relay.bridge_interval,
            RelaySettings::default().bridge_interval,
        )
    }
}

fn seconds(value: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_else(|_| Duration::from_secs_f64(fallback))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid port number")]
    InvalidPort,
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
