use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

/// Why a remote call did not produce a result. Timeouts are surfaced, never
/// retried; retry policy belongs to the collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("remote call timed out")]
    Timeout,
    #[error("transport failure: {0}")]
    Io(String),
    #[error("remote rejected call: {description}")]
    Remote { description: String },
}

/// The wire beneath the router. One method call per invocation; the
/// implementation owns connection handling and timeouts.
#[async_trait]
pub trait BotTransport: Send + Sync {
    async fn call(&self, method: &str, params: &Map<String, Value>)
    -> Result<Value, TransportError>;
}

/// Standard Bot-API response envelope.
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    description: Option<String>,
}

/// HTTP transport speaking `POST {base}/bot{token}/{method}` with a JSON
/// parameter body.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    token: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, TransportError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| TransportError::Io(format!("invalid base url '{base_url}': {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            token: token.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/bot{}/{method}", self.token)
    }
}

#[async_trait]
impl BotTransport for HttpTransport {
    async fn call(
        &self,
        method: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, TransportError> {
        let resp = self
            .client
            .post(self.method_url(method))
            .json(params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Io(e.to_string())
                }
            })?;

        let envelope: ApiEnvelope = resp
            .json()
            .await
            .map_err(|e| TransportError::Io(format!("non-JSON response: {e}")))?;

        if !envelope.ok {
            return Err(TransportError::Remote {
                description: envelope
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            });
        }
        Ok(envelope.result)
    }
}
