//! Transport seam between the service clients and the backend.
//!
//! [`HttpGateway`] only moves JSON bodies; it does not interpret the backend's `success` flag.
//! That is done by [`check_envelope`], which every service client applies to the bodies it
//! receives, so fake gateways in tests can return raw server bodies.

use async_trait::async_trait;
use reqwest::{Client, Response, header};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::{DetectError, REJECTED_FALLBACK_MESSAGE, Result};

/// Performs network calls against the configured backend.
///
/// `path` is relative to the base URL and may carry an already-encoded query string.
#[async_trait]
pub trait HttpGateway: Send + Sync {
    async fn get(&self, path: &str) -> Result<Value>;
    async fn post_json(&self, path: &str, body: Value) -> Result<Value>;
    async fn delete(&self, path: &str) -> Result<Value>;
}

/// Apply the backend's response convention: `success: false` is an application-level failure.
pub fn check_envelope(body: Value) -> Result<Value> {
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(DetectError::rejected(message_of(&body)));
    }
    Ok(body)
}

fn message_of(body: &Value) -> String {
    body.get("message")
        .or_else(|| body.get("error"))
        .and_then(Value::as_str)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(REJECTED_FALLBACK_MESSAGE)
        .to_string()
}

/// Build `path?userId=...` with the value percent-encoded.
pub fn with_user_query(path: &str, user_id: &str) -> String {
    format!("{}?userId={}", path, urlencoding::encode(user_id))
}

/// HttpGateway backed by a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestGateway {
    base_url: String,
    client: Client,
}

impl ReqwestGateway {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DetectError::NetworkFailure(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn read_body(response: Response) -> Result<Value> {
        let status = response.status();
        let bytes = response.bytes().await?;
        let parsed = if bytes.is_empty() {
            Ok(Value::Null)
        } else {
            serde_json::from_slice::<Value>(&bytes)
        };

        if !status.is_success() {
            let message = match &parsed {
                Ok(body) if body.get("message").is_some() || body.get("error").is_some() => {
                    message_of(body)
                }
                _ => format!("HTTP {}", status.as_u16()),
            };
            debug!(status = status.as_u16(), %message, "Backend returned error status");
            return Err(DetectError::rejected(message));
        }

        parsed.map_err(|e| DetectError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl HttpGateway for ReqwestGateway {
    async fn get(&self, path: &str) -> Result<Value> {
        let url = self.url(path);
        debug!(%url, "GET");
        let response = self.client.get(&url).send().await?;
        Self::read_body(response).await
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value> {
        let url = self.url(path);
        debug!(%url, "POST");
        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?;
        Self::read_body(response).await
    }

    async fn delete(&self, path: &str) -> Result<Value> {
        let url = self.url(path);
        debug!(%url, "DELETE");
        let response = self.client.delete(&url).send().await?;
        Self::read_body(response).await
    }
}
