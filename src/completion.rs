//! Text-completion client.
//!
//! The core only uses completion for health verification; generation on top
//! of retrieved chunks belongs to callers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ResolvedEndpoint;
use crate::error::{RagError, Result};
use crate::http::JsonEndpoint;

#[async_trait]
pub trait CompletionClient: Send + Sync {
    fn model_name(&self) -> &str;

    /// Returns the text of the first choice. Empty output is an
    /// [`Upstream`](RagError::Upstream) error.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    text: String,
}

/// Client for OpenAI-compatible `POST {base_url}/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiCompletionClient {
    endpoint: JsonEndpoint,
    model: String,
}

impl OpenAiCompletionClient {
    pub fn new(endpoint: &ResolvedEndpoint) -> Result<Self> {
        Ok(Self {
            endpoint: JsonEndpoint::new(endpoint, "completion")?,
            model: endpoint.model.clone(),
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = CompletionRequest {
            model: &self.model,
            prompt,
        };
        let response: CompletionResponse = self.endpoint.post("/completions", &request).await?;
        first_choice(response)
    }
}

fn first_choice(response: CompletionResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.text)
        .filter(|text| !text.is_empty())
        .ok_or_else(|| RagError::upstream("completion", "empty response"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_support::{endpoint, serve};
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn test_no_choices_is_error() {
        let response: CompletionResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(first_choice(response).is_err());
    }

    #[test]
    fn test_empty_text_is_error() {
        let response: CompletionResponse =
            serde_json::from_value(json!({"choices": [{"text": ""}]})).unwrap();
        assert!(first_choice(response).is_err());
    }

    #[tokio::test]
    async fn test_http_client() {
        let fake = serve(
            "/completions",
            StatusCode::OK,
            json!({"id": "cmpl-1", "choices": [{"index": 0, "text": ", and welcome."}]}),
        )
        .await;
        let client = OpenAiCompletionClient::new(&endpoint(&fake.base_url, 0)).unwrap();
        assert_eq!(client.complete("Hello world").await.unwrap(), ", and welcome.");
    }
}
