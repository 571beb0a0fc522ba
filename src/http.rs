//! JSON-over-HTTP plumbing shared by the provider clients.
//!
//! Retry strategy (same for embedding, reranker and completion):
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ResolvedEndpoint;
use crate::error::{RagError, Result};

#[derive(Debug, Clone)]
pub(crate) struct JsonEndpoint {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
    backoff: Duration,
    /// Names the provider in error messages.
    stage: &'static str,
}

impl JsonEndpoint {
    pub(crate) fn new(endpoint: &ResolvedEndpoint, stage: &'static str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .build()
            .map_err(|e| RagError::config(format!("cannot build {} client: {}", stage, e)))?;
        Ok(Self {
            client,
            base_url: endpoint.base_url.clone(),
            api_key: endpoint.api_key.clone(),
            max_retries: endpoint.max_retries,
            backoff: Duration::from_secs(1),
            stage,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// POSTs `body` to `{base_url}{path}` and decodes the JSON response.
    pub(crate) async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff * (1u32 << (attempt - 1).min(5));
                tracing::warn!(stage = self.stage, attempt, ?delay, "retrying provider call");
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(&url).json(body);
            if let Some(ref key) = self.api_key {
                request = request.bearer_auth(key);
            }
            tracing::debug!(stage = self.stage, %url, "provider request");

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let bytes = response.bytes().await.map_err(|e| {
                            RagError::upstream(self.stage, format!("reading response: {}", e))
                        })?;
                        return serde_json::from_slice(&bytes).map_err(|e| {
                            RagError::upstream(self.stage, format!("malformed response: {}", e))
                        });
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = RagError::upstream(
                        self.stage,
                        format!("HTTP {} from {}: {}", status, url, body_text.trim()),
                    );

                    // Rate limited or server error, retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(err);
                        continue;
                    }

                    // Client error (not 429), don't retry
                    return Err(err);
                }
                Err(e) => {
                    last_err = Some(RagError::upstream(
                        self.stage,
                        format!("request to {} failed: {}", url, e),
                    ));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| RagError::upstream(self.stage, "request failed after retries")))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{endpoint, serve};
    use super::*;
    use axum::http::StatusCode;
    use serde_json::{json, Value};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_success_decodes_json() {
        let fake = serve("/echo", StatusCode::OK, json!({"ok": true})).await;
        let ep = JsonEndpoint::new(&endpoint(&fake.base_url, 0), "test").unwrap();
        let out: Value = ep.post("/echo", &json!({})).await.unwrap();
        assert_eq!(out["ok"], true);
    }

    #[tokio::test]
    async fn test_server_error_retried_then_reported() {
        let fake = serve("/x", StatusCode::SERVICE_UNAVAILABLE, json!({})).await;
        let ep = JsonEndpoint::new(&endpoint(&fake.base_url, 2), "test")
            .unwrap()
            .with_backoff(Duration::from_millis(1));
        let err = ep.post::<_, Value>("/x", &json!({})).await.unwrap_err();
        assert!(matches!(err, RagError::Upstream { stage: "test", .. }));
        assert_eq!(fake.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let fake = serve("/x", StatusCode::BAD_REQUEST, json!({"error": "bad"})).await;
        let ep = JsonEndpoint::new(&endpoint(&fake.base_url, 3), "test")
            .unwrap()
            .with_backoff(Duration::from_millis(1));
        let err = ep.post::<_, Value>("/x", &json!({})).await.unwrap_err();
        assert!(err.to_string().contains("400"));
        assert_eq!(fake.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_is_upstream() {
        let ep = JsonEndpoint::new(&endpoint("http://127.0.0.1:9", 0), "test").unwrap();
        let err = ep.post::<_, Value>("/x", &json!({})).await.unwrap_err();
        assert!(matches!(err, RagError::Upstream { .. }));
    }
}
