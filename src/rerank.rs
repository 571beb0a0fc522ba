//! Cross-encoder reranking client.
//!
//! [`InfinityRerankerClient`] speaks the `POST {base_url}/rerank` protocol
//! served by Infinity, TEI and Cohere-compatible gateways.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ResolvedEndpoint;
use crate::error::{RagError, Result};
use crate::http::JsonEndpoint;

/// One scored document, referring back to its position in the request.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RerankResult {
    #[serde(alias = "index")]
    pub document_index: usize,
    #[serde(alias = "relevance_score")]
    pub score: f32,
}

#[async_trait]
pub trait RerankerClient: Send + Sync {
    fn model_name(&self) -> &str;

    /// Scores `documents` against `query`, returning at most `top_n`
    /// results. Order of the returned list is not relied upon.
    async fn rerank(&self, query: &str, documents: &[String], top_n: usize)
        -> Result<Vec<RerankResult>>;
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
    return_documents: bool,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Debug, Clone)]
pub struct InfinityRerankerClient {
    endpoint: JsonEndpoint,
    model: String,
}

impl InfinityRerankerClient {
    pub fn new(endpoint: &ResolvedEndpoint) -> Result<Self> {
        Ok(Self {
            endpoint: JsonEndpoint::new(endpoint, "rerank")?,
            model: endpoint.model.clone(),
        })
    }
}

#[async_trait]
impl RerankerClient for InfinityRerankerClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankResult>> {
        let request = RerankRequest {
            model: &self.model,
            query,
            documents,
            top_n,
            return_documents: false,
        };
        let response: RerankResponse = self.endpoint.post("/rerank", &request).await?;
        Ok(response.results)
    }
}

/// Checks a reranker response against the request it answers.
///
/// Every index must point into `documents`, no index may repeat, and the
/// list may not exceed `top_n`.
pub fn validate_results(results: &[RerankResult], documents: usize, top_n: usize) -> Result<()> {
    if results.len() > top_n {
        return Err(RagError::upstream(
            "rerank",
            format!("asked for {} results, got {}", top_n, results.len()),
        ));
    }
    let mut seen = vec![false; documents];
    for r in results {
        match seen.get_mut(r.document_index) {
            Some(flag) if !*flag => *flag = true,
            Some(_) => {
                return Err(RagError::upstream(
                    "rerank",
                    format!("document index {} returned twice", r.document_index),
                ))
            }
            None => {
                return Err(RagError::upstream(
                    "rerank",
                    format!(
                        "document index {} out of range (0..{})",
                        r.document_index, documents
                    ),
                ))
            }
        }
        if !r.score.is_finite() {
            return Err(RagError::upstream("rerank", "non-finite relevance score"));
        }
    }
    Ok(())
}
