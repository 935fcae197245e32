use crate::error::{RelayError, RelayResult};
use crate::types::Sample;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT_SECS: u64 = 5;

/// Publishes samples onto one platform stream
#[async_trait]
pub trait StreamProducer: Send + Sync {
    async fn produce(&self, sample: &Sample) -> RelayResult<()>;
}

/// Makes newly observed keys known to the platform
#[async_trait]
pub trait VariableRegistrar: Send + Sync {
    async fn declare_variable(&self, name: &str, description: &str) -> RelayResult<()>;
}

/// Host platform the relay runs inside
#[async_trait]
pub trait HostPlatform: VariableRegistrar {
    /// Create the named stream if needed, make sure it is running, and return
    /// a producer bound to it
    async fn open_stream(&self, name: &str) -> RelayResult<Arc<dyn StreamProducer>>;
}

#[derive(Serialize)]
struct OpenStreamRequest<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct ProduceRequest<'a> {
    key: &'a str,
    timestamp: f64,
    value: f64,
}

#[derive(Serialize)]
struct DeclareVariableRequest<'a> {
    name: &'a str,
    description: &'a str,
}

/// HTTP client for the platform core
#[derive(Clone)]
pub struct CoreClient {
    http: reqwest::Client,
    base_url: String,
}

impl CoreClient {
    pub fn new(base_url: impl Into<String>) -> RelayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> RelayResult<()> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.http.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RelayError::Platform {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl VariableRegistrar for CoreClient {
    async fn declare_variable(&self, name: &str, description: &str) -> RelayResult<()> {
        debug!("Declaring variable {}", name);
        self.post_json("/api/variables", &DeclareVariableRequest { name, description })
            .await
    }
}

#[async_trait]
impl HostPlatform for CoreClient {
    async fn open_stream(&self, name: &str) -> RelayResult<Arc<dyn StreamProducer>> {
        self.post_json("/api/streams", &OpenStreamRequest { name }).await?;
        Ok(Arc::new(PlatformStream {
            client: self.clone(),
            path: format!("/api/streams/{}/produce", name),
        }))
    }
}

/// Producer half of a stream opened through [`CoreClient`]
pub struct PlatformStream {
    client: CoreClient,
    path: String,
}

#[async_trait]
impl StreamProducer for PlatformStream {
    async fn produce(&self, sample: &Sample) -> RelayResult<()> {
        self.client
            .post_json(
                &self.path,
                &ProduceRequest {
                    key: &sample.key,
                    timestamp: sample.timestamp,
                    value: sample.value,
                },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let client = CoreClient::new("http://127.0.0.1:8000/").unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:8000");
    }

    #[test]
    fn test_produce_body_shape() {
        let body = ProduceRequest {
            key: "temp",
            timestamp: 1.5,
            value: 20.0,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"key": "temp", "timestamp": 1.5, "value": 20.0})
        );
    }
}
