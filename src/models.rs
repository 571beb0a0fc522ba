//! Core data models.
//!
//! These types represent the documents, chunks, and ranked results that flow
//! through ingestion, embedding sync and retrieval.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{RagError, Result};

/// One chunk record inside a document descriptor.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ChunkRecord {
    pub chunk_index: i64,
    pub text: String,
}

/// Document descriptor as read from a `*.chunks.json` file.
///
/// `id` is optional; when absent the document id is derived from
/// `raw_document` so re-ingesting the same source is idempotent.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Document {
    #[serde(default)]
    pub id: Option<String>,
    pub raw_document: String,
    pub chunks: Vec<ChunkRecord>,
}

impl Document {
    /// Parses a descriptor, rejecting unknown fields, then validates it.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let doc: Document = serde_json::from_slice(bytes)?;
        doc.validate()?;
        Ok(doc)
    }

    /// Stable document identifier: the explicit `id`, else a content
    /// address of `raw_document`.
    pub fn document_id(&self) -> String {
        match self.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let digest = hash_text(&self.raw_document);
                digest[..32].to_string()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.raw_document.trim().is_empty() && self.id.is_none() {
            return Err(RagError::invalid(
                "document needs an id or a non-empty raw_document",
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for chunk in &self.chunks {
            if chunk.chunk_index < 0 {
                return Err(RagError::invalid(format!(
                    "chunk_index must be >= 0, got {}",
                    chunk.chunk_index
                )));
            }
            if chunk.text.trim().is_empty() {
                return Err(RagError::invalid(format!(
                    "chunk {} has empty text",
                    chunk.chunk_index
                )));
            }
            if !seen.insert(chunk.chunk_index) {
                return Err(RagError::invalid(format!(
                    "duplicate chunk_index {}",
                    chunk.chunk_index
                )));
            }
        }
        Ok(())
    }
}

/// The atomic retrieval unit as stored.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub raw_document: String,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`.
    #[serde(skip)]
    pub hash: String,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    /// Milliseconds since the Unix epoch of the last text or embedding write.
    pub updated_at: i64,
}

/// A chunk that needs an embedding, as handed to the sync engine.
#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub id: String,
    pub text: String,
    pub hash: String,
    pub updated_at: i64,
}

/// A first-stage search hit.
#[derive(Debug, Clone)]
pub struct SimilarChunk {
    pub chunk: Chunk,
    /// Smaller is closer.
    pub distance: f32,
}

/// Reranker output for one candidate; lives for a single query.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankCandidate {
    pub chunk_id: String,
    pub text: String,
    pub score: f32,
}

/// A final query result.
#[derive(Debug, Clone, Serialize)]
pub struct RankedChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    /// Cross-encoder relevance score.
    pub score: f32,
    /// First-stage vector distance.
    pub distance: f32,
}

/// Result of [`WriteEmbedding`](crate::store::ChunkStore::write_embedding).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The chunk text changed after the vector was computed; nothing written.
    Superseded,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct StoreStats {
    pub documents: i64,
    pub chunks: i64,
    pub embedded: i64,
}

/// Deterministic chunk id so re-ingestion is idempotent.
pub fn chunk_id(document_id: &str, chunk_index: i64) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}", document_id, chunk_index).as_bytes(),
    )
    .to_string()
}

pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
