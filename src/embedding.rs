//! Embedding client abstraction and vector utilities.
//!
//! Defines the [`EmbeddingClient`] trait and its HTTP implementation:
//! - **[`OpenAiEmbeddingClient`]**: calls an OpenAI-compatible
//!   `POST {base_url}/embeddings` endpoint with `encoding_format: "base64"`.
//!
//! Also provides vector utilities for the store:
//! - [`cosine_similarity`] / [`l2_distance`]: compare two vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a BLOB (or a base64-decoded payload) back into a `Vec<f32>`

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::ResolvedEndpoint;
use crate::error::{RagError, Result};
use crate::http::JsonEndpoint;

/// Turns text into fixed-length vectors.
///
/// Implementations return one vector per input text, in input order.
/// Callers go through [`embed_checked`], which enforces that contract.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Identifies the model that produced a vector; stored next to it so a
    /// model change can be detected.
    fn model_name(&self) -> &str;

    /// Largest number of texts accepted in one request.
    fn max_batch_size(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embeds `texts` and verifies the response: one non-empty vector per
/// input, all with the same dimensionality.
pub async fn embed_checked(client: &dyn EmbeddingClient, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let vectors = client.embed(texts).await?;
    if vectors.len() != texts.len() {
        return Err(RagError::upstream(
            "embedding",
            format!("expected {} vectors, got {}", texts.len(), vectors.len()),
        ));
    }
    if vectors.iter().any(|v| v.is_empty()) {
        return Err(RagError::upstream("embedding", "empty response"));
    }
    if let Some(first) = vectors.first() {
        if vectors.iter().any(|v| v.len() != first.len()) {
            return Err(RagError::upstream("embedding", "inconsistent vector dimensions"));
        }
    }
    Ok(vectors)
}

/// Embeds a single query text.
pub async fn embed_query(client: &dyn EmbeddingClient, text: &str) -> Result<Vec<f32>> {
    embed_checked(client, &[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| RagError::upstream("embedding", "empty response"))
}

// ============ OpenAI-compatible client ============

#[derive(Serialize)]
#[serde(untagged)]
enum EmbeddingInput<'a> {
    Single(&'a str),
    Batch(&'a [String]),
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: EmbeddingInput<'a>,
    encoding_format: &'static str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: Option<usize>,
    embedding: EmbeddingPayload,
}

/// Providers honour `encoding_format: "base64"` to different degrees, so
/// both encodings are accepted.
#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddingPayload {
    Base64(String),
    Floats(Vec<f32>),
}

impl EmbeddingPayload {
    fn into_vec(self) -> Result<Vec<f32>> {
        match self {
            EmbeddingPayload::Floats(v) => Ok(v),
            EmbeddingPayload::Base64(s) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(s.as_bytes())
                    .map_err(|e| RagError::upstream("embedding", format!("bad base64: {}", e)))?;
                if bytes.len() % 4 != 0 {
                    return Err(RagError::upstream(
                        "embedding",
                        "base64 payload is not a whole number of f32 values",
                    ));
                }
                Ok(blob_to_vec(&bytes))
            }
        }
    }
}

/// Embedding client for OpenAI-compatible servers (OpenAI, Infinity, vLLM, TEI).
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingClient {
    endpoint: JsonEndpoint,
    model: String,
    max_batch_size: usize,
}

impl OpenAiEmbeddingClient {
    pub fn new(endpoint: &ResolvedEndpoint, max_batch_size: usize) -> Result<Self> {
        Ok(Self {
            endpoint: JsonEndpoint::new(endpoint, "embedding")?,
            model: endpoint.model.clone(),
            max_batch_size: max_batch_size.max(1),
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let input = match texts {
            [single] => EmbeddingInput::Single(single),
            many => EmbeddingInput::Batch(many),
        };
        let request = EmbeddingRequest {
            model: &self.model,
            input,
            encoding_format: "base64",
        };
        let response: EmbeddingResponse = self.endpoint.post("/embeddings", &request).await?;
        parse_embedding_response(response)
    }
}

/// Decodes every datum and restores input order using `index`.
///
/// The indices must cover `0..data.len()` exactly once.
fn parse_embedding_response(response: EmbeddingResponse) -> Result<Vec<Vec<f32>>> {
    let count = response.data.len();
    let mut indexed = Vec::with_capacity(count);
    for (position, datum) in response.data.into_iter().enumerate() {
        let index = datum.index.unwrap_or(position);
        if index >= count {
            return Err(RagError::upstream(
                "embedding",
                format!("index {} out of range for {} vectors", index, count),
            ));
        }
        indexed.push((index, datum.embedding.into_vec()?));
    }
    indexed.sort_by_key(|(index, _)| *index);
    for (position, (index, _)) in indexed.iter().enumerate() {
        if *index != position {
            return Err(RagError::upstream(
                "embedding",
                format!("duplicate index {} in response", index),
            ));
        }
    }
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use srag::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]: reads 4-byte little-endian `f32` values
/// from the byte slice. Trailing bytes that do not form a full value are
/// ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Euclidean distance; `f32::INFINITY` for mismatched lengths.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_support::{endpoint, serve};
    use axum::http::StatusCode;
    use serde_json::json;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_base64_payload_decodes_le_floats() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(vec_to_blob(&[0.5, -1.0]));
        let v = EmbeddingPayload::Base64(encoded).into_vec().unwrap();
        assert_eq!(v, vec![0.5, -1.0]);
    }

    #[test]
    fn test_base64_payload_rejects_partial_float() {
        let encoded = base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]);
        assert!(EmbeddingPayload::Base64(encoded).into_vec().is_err());
    }

    #[test]
    fn test_response_reordered_by_index() {
        let response: EmbeddingResponse = serde_json::from_value(json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        }))
        .unwrap();
        let vectors = parse_embedding_response(response).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_response_rejects_bad_indices() {
        let parse = |data: serde_json::Value| {
            let response: EmbeddingResponse =
                serde_json::from_value(json!({ "data": data })).unwrap();
            parse_embedding_response(response)
        };

        let duplicate = parse(json!([
            {"index": 1, "embedding": [0.0, 1.0]},
            {"index": 1, "embedding": [1.0, 0.0]}
        ]))
        .unwrap_err();
        assert!(matches!(duplicate, RagError::Upstream { stage: "embedding", .. }));
        assert!(duplicate.to_string().contains("duplicate"));

        let out_of_range = parse(json!([
            {"index": 0, "embedding": [0.0, 1.0]},
            {"index": 2, "embedding": [1.0, 0.0]}
        ]))
        .unwrap_err();
        assert!(matches!(out_of_range, RagError::Upstream { stage: "embedding", .. }));
        assert!(out_of_range.to_string().contains("out of range"));
    }

    #[tokio::test]
    async fn test_http_client_round_trip() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(vec_to_blob(&[0.25, 0.75]));
        let fake = serve(
            "/embeddings",
            StatusCode::OK,
            json!({"object": "list", "data": [{"object": "embedding", "index": 0, "embedding": encoded}]}),
        )
        .await;
        let client = OpenAiEmbeddingClient::new(&endpoint(&fake.base_url, 0), 8).unwrap();
        let v = embed_query(&client, "Hello world").await.unwrap();
        assert_eq!(v, vec![0.25, 0.75]);
        assert_eq!(client.model_name(), "test-model");
    }

    #[tokio::test]
    async fn test_empty_data_is_upstream_error() {
        let fake = serve("/embeddings", StatusCode::OK, json!({"data": []})).await;
        let client = OpenAiEmbeddingClient::new(&endpoint(&fake.base_url, 0), 8).unwrap();
        let err = embed_query(&client, "Hello world").await.unwrap_err();
        assert!(matches!(err, RagError::Upstream { stage: "embedding", .. }));
    }

    #[tokio::test]
    async fn test_empty_vector_is_upstream_error() {
        let fake = serve(
            "/embeddings",
            StatusCode::OK,
            json!({"data": [{"index": 0, "embedding": []}]}),
        )
        .await;
        let client = OpenAiEmbeddingClient::new(&endpoint(&fake.base_url, 0), 8).unwrap();
        let err = embed_query(&client, "Hello world").await.unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}
