//! Chunk storage abstraction.
//!
//! The [`ChunkStore`] trait defines every storage operation the sync engine,
//! retrieval pipeline and health probe need, so components receive a store
//! handle instead of a concrete database. Two backends ship:
//!
//! - [`SqliteStore`]: pooled SQLite, used by the CLI and server.
//! - [`InMemoryStore`]: `RwLock`-guarded maps for tests and embedding.
//!
//! Implementations must be `Send + Sync`; handles are shared across request
//! tasks behind `Arc`.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert_document_chunks`](ChunkStore::upsert_document_chunks) | Transactional insert-or-update of a document's chunks |
//! | [`chunks_missing_embedding`](ChunkStore::chunks_missing_embedding) | Oldest-first page of chunks needing a vector |
//! | [`write_embedding`](ChunkStore::write_embedding) | Atomic single-row vector write |
//! | [`similarity_search`](ChunkStore::similarity_search) | Exact top-k by distance |
//! | [`get_chunk`](ChunkStore::get_chunk) | Point lookup |
//! | [`delete_document`](ChunkStore::delete_document) | Cascade delete |

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::config::DistanceMetric;
use crate::embedding::{cosine_similarity, l2_distance};
use crate::error::Result;
use crate::models::{Chunk, Document, PendingChunk, SimilarChunk, StoreStats, WriteOutcome};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Cheap connectivity check.
    async fn ping(&self) -> Result<()>;

    /// Insert-or-update every chunk of `doc` by `(document_id, chunk_index)`.
    ///
    /// All chunks commit together or not at all. A chunk whose text changed
    /// has its embedding cleared; an unchanged chunk is left untouched.
    /// Returns the number of chunk rows inserted or changed.
    async fn upsert_document_chunks(&self, doc: &Document) -> Result<u64>;

    /// Up to `limit` chunks whose embedding is missing or was produced by a
    /// model other than `model`, oldest `updated_at` first.
    ///
    /// With `force_run = Some(run)`, every chunk not yet written by `run`
    /// also counts as stale (force recomputation).
    async fn chunks_missing_embedding(
        &self,
        model: &str,
        limit: usize,
        force_run: Option<&str>,
    ) -> Result<Vec<PendingChunk>>;

    /// Store `vector` for `chunk_id` if its text still hashes to
    /// `source_hash`, tagging it with the sync run that produced it.
    /// Fails with `NotFound` when the chunk is gone.
    async fn write_embedding(
        &self,
        chunk_id: &str,
        vector: &[f32],
        model: &str,
        source_hash: &str,
        run_id: &str,
    ) -> Result<WriteOutcome>;

    /// The `k` embedded chunks closest to `query_vector`, nearest first.
    ///
    /// Only vectors with the query's dimensionality are compared. Ties are
    /// broken by chunk id so results are deterministic.
    async fn similarity_search(&self, query_vector: &[f32], k: usize) -> Result<Vec<SimilarChunk>>;

    async fn get_chunk(&self, id: &str) -> Result<Chunk>;

    /// Deletes a document and all its chunks. Returns the number of chunks removed.
    async fn delete_document(&self, id: &str) -> Result<u64>;

    /// Row counts; `embedded` counts vectors produced by `model` when given.
    async fn stats(&self, model: Option<&str>) -> Result<StoreStats>;
}

impl DistanceMetric {
    /// Distance between two equal-length vectors; smaller is closer.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b),
            DistanceMetric::L2 => l2_distance(a, b),
        }
    }
}

/// Sorts hits nearest-first (ties by chunk id) and keeps `k`.
pub(crate) fn top_k(mut hits: Vec<SimilarChunk>, k: usize) -> Vec<SimilarChunk> {
    hits.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    hits.truncate(k);
    hits
}
