//! Two-stage retrieval: vector search, then cross-encoder rerank.
//!
//! # Algorithm
//!
//! 1. Reject an empty query.
//! 2. Embed the query.
//! 3. Fetch `k = max(limit × overfetch, limit)` nearest chunks.
//! 4. No candidates → empty result.
//! 5. Rerank the candidate texts with `top_n = limit`; order by score
//!    descending, ties by first-stage position.
//! 6. Resolve each reranked candidate to its full chunk record.
//!
//! A reranker failure fails the query. There is no fallback to the
//! first-stage order.

use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, EmbeddingClient};
use crate::error::{RagError, Result};
use crate::models::{Chunk, RankedChunk, RerankCandidate, SimilarChunk};
use crate::rerank::{validate_results, RerankerClient};
use crate::store::ChunkStore;

pub struct RetrievalPipeline {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingClient>,
    reranker: Arc<dyn RerankerClient>,
    overfetch: usize,
    default_limit: usize,
    max_limit: usize,
}

impl RetrievalPipeline {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingClient>,
        reranker: Arc<dyn RerankerClient>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            reranker,
            overfetch: config.overfetch.max(1),
            default_limit: config.default_limit.max(1),
            max_limit: config.max_limit.max(1),
        }
    }

    pub fn default_limit(&self) -> usize {
        self.default_limit
    }

    /// Answers `text` with at most `limit` chunks, most relevant first.
    pub async fn query(
        &self,
        text: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<RankedChunk>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RagError::invalid("query must not be empty"));
        }
        if limit == 0 || limit > self.max_limit {
            return Err(RagError::invalid(format!(
                "limit must be in 1..={}",
                self.max_limit
            )));
        }
        cancel.run(self.run(text, limit)).await
    }

    async fn run(&self, text: &str, limit: usize) -> Result<Vec<RankedChunk>> {
        let query_vector = embed_query(self.embedder.as_ref(), text).await?;

        let k = limit.saturating_mul(self.overfetch).max(limit);
        let candidates = self.store.similarity_search(&query_vector, k).await?;
        tracing::debug!(k, candidates = candidates.len(), "first-stage search");
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let reranked = self.rerank(text, &candidates, limit).await?;

        let mut results = Vec::with_capacity(reranked.len());
        for (position, candidate) in reranked {
            let chunk = self.store.get_chunk(&candidate.chunk_id).await?;
            results.push(RankedChunk {
                chunk,
                score: candidate.score,
                distance: candidates[position].distance,
            });
        }
        Ok(results)
    }

    /// Reranks `candidates`, returning `(first-stage position, candidate)`
    /// pairs in final order.
    async fn rerank(
        &self,
        query: &str,
        candidates: &[SimilarChunk],
        limit: usize,
    ) -> Result<Vec<(usize, RerankCandidate)>> {
        let documents: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();
        let top_n = limit.min(documents.len());
        let results = self.reranker.rerank(query, &documents, top_n).await?;
        validate_results(&results, documents.len(), top_n)?;

        let mut ranked: Vec<(usize, RerankCandidate)> = results
            .into_iter()
            .map(|r| {
                let chunk = &candidates[r.document_index].chunk;
                (
                    r.document_index,
                    RerankCandidate {
                        chunk_id: chunk.id.clone(),
                        text: chunk.text.clone(),
                        score: r.score,
                    },
                )
            })
            .collect();
        ranked.sort_by(|(pa, a), (pb, b)| b.score.total_cmp(&a.score).then(pa.cmp(pb)));
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// Point lookup outside the ranking flow.
    pub async fn get_document_chunk(&self, id: &str) -> Result<Chunk> {
        self.store.get_chunk(id).await
    }
}
