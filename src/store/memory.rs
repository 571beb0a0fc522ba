//! In-memory [`ChunkStore`] for tests and embedding into other programs.
//!
//! Uses `HashMap`s behind one `std::sync::RwLock`; the lock is never held
//! across an `.await`. Vector search is a brute-force scan, like the SQLite
//! backend.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{top_k, ChunkStore};
use crate::config::DistanceMetric;
use crate::error::{RagError, Result};
use crate::models::{
    chunk_id, hash_text, now_millis, Chunk, Document, PendingChunk, SimilarChunk, StoreStats,
    WriteOutcome,
};

struct StoredChunk {
    chunk: Chunk,
    /// Sync run that wrote the current embedding.
    embedding_run: Option<String>,
}

#[derive(Default)]
struct Tables {
    /// document id -> raw document reference
    documents: HashMap<String, String>,
    chunks: HashMap<String, StoredChunk>,
}

pub struct InMemoryStore {
    tables: RwLock<Tables>,
    metric: DistanceMetric,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_metric(DistanceMetric::Cosine)
    }

    pub fn with_metric(metric: DistanceMetric) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            metric,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| RagError::storage("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| RagError::storage("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("metric", &self.metric)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ChunkStore for InMemoryStore {
    async fn ping(&self) -> Result<()> {
        self.read().map(|_| ())
    }

    async fn upsert_document_chunks(&self, doc: &Document) -> Result<u64> {
        doc.validate()?;
        let doc_id = doc.document_id();
        let now = now_millis();

        // Validation happened up front, so every mutation below succeeds and
        // the document is applied as a unit under a single write lock.
        let mut guard = self.write()?;
        let tables = &mut *guard;
        let raw_document = doc.raw_document.clone();
        tables
            .documents
            .insert(doc_id.clone(), raw_document.clone());

        let mut changed = 0u64;
        for record in &doc.chunks {
            let id = chunk_id(&doc_id, record.chunk_index);
            let hash = hash_text(&record.text);
            match tables.chunks.get_mut(&id) {
                Some(stored) if stored.chunk.hash == hash => {
                    stored.chunk.raw_document = raw_document.clone();
                }
                Some(stored) => {
                    stored.chunk.text = record.text.clone();
                    stored.chunk.hash = hash;
                    stored.chunk.embedding = None;
                    stored.chunk.embedding_model = None;
                    stored.chunk.updated_at = now;
                    stored.chunk.raw_document = raw_document.clone();
                    stored.embedding_run = None;
                    changed += 1;
                }
                None => {
                    tables.chunks.insert(
                        id.clone(),
                        StoredChunk {
                            chunk: Chunk {
                                id,
                                document_id: doc_id.clone(),
                                raw_document: raw_document.clone(),
                                chunk_index: record.chunk_index,
                                text: record.text.clone(),
                                hash,
                                embedding: None,
                                embedding_model: None,
                                updated_at: now,
                            },
                            embedding_run: None,
                        },
                    );
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn chunks_missing_embedding(
        &self,
        model: &str,
        limit: usize,
        force_run: Option<&str>,
    ) -> Result<Vec<PendingChunk>> {
        let tables = self.read()?;
        let mut pending: Vec<PendingChunk> = tables
            .chunks
            .values()
            .filter(|sc| {
                sc.chunk.embedding.is_none()
                    || sc.chunk.embedding_model.as_deref() != Some(model)
                    || force_run.is_some_and(|run| sc.embedding_run.as_deref() != Some(run))
            })
            .map(|sc| PendingChunk {
                id: sc.chunk.id.clone(),
                text: sc.chunk.text.clone(),
                hash: sc.chunk.hash.clone(),
                updated_at: sc.chunk.updated_at,
            })
            .collect();
        pending.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn write_embedding(
        &self,
        chunk_id: &str,
        vector: &[f32],
        model: &str,
        source_hash: &str,
        run_id: &str,
    ) -> Result<WriteOutcome> {
        if vector.is_empty() {
            return Err(RagError::invalid("refusing to store an empty embedding"));
        }
        let mut tables = self.write()?;
        let stored = tables
            .chunks
            .get_mut(chunk_id)
            .ok_or_else(|| RagError::not_found(format!("chunk {}", chunk_id)))?;
        if stored.chunk.hash != source_hash {
            return Ok(WriteOutcome::Superseded);
        }
        let now = now_millis();
        stored.chunk.embedding = Some(vector.to_vec());
        stored.chunk.embedding_model = Some(model.to_string());
        stored.chunk.updated_at = now;
        stored.embedding_run = Some(run_id.to_string());
        Ok(WriteOutcome::Written)
    }

    async fn similarity_search(&self, query_vector: &[f32], k: usize) -> Result<Vec<SimilarChunk>> {
        if query_vector.is_empty() {
            return Err(RagError::invalid("query vector must not be empty"));
        }
        let tables = self.read()?;
        let hits: Vec<SimilarChunk> = tables
            .chunks
            .values()
            .filter_map(|sc| {
                let vector = sc.chunk.embedding.as_deref()?;
                if vector.len() != query_vector.len() {
                    return None;
                }
                Some(SimilarChunk {
                    distance: self.metric.distance(query_vector, vector),
                    chunk: sc.chunk.clone(),
                })
            })
            .collect();
        Ok(top_k(hits, k))
    }

    async fn get_chunk(&self, id: &str) -> Result<Chunk> {
        let tables = self.read()?;
        tables
            .chunks
            .get(id)
            .map(|sc| sc.chunk.clone())
            .ok_or_else(|| RagError::not_found(format!("chunk {}", id)))
    }

    async fn delete_document(&self, id: &str) -> Result<u64> {
        let mut tables = self.write()?;
        if tables.documents.remove(id).is_none() {
            return Err(RagError::not_found(format!("document {}", id)));
        }
        let before = tables.chunks.len();
        tables.chunks.retain(|_, sc| sc.chunk.document_id != id);
        Ok((before - tables.chunks.len()) as u64)
    }

    async fn stats(&self, model: Option<&str>) -> Result<StoreStats> {
        let tables = self.read()?;
        let embedded = tables
            .chunks
            .values()
            .filter(|sc| {
                sc.chunk.embedding.is_some()
                    && model.map_or(true, |m| sc.chunk.embedding_model.as_deref() == Some(m))
            })
            .count();
        Ok(StoreStats {
            documents: tables.documents.len() as i64,
            chunks: tables.chunks.len() as i64,
            embedded: embedded as i64,
        })
    }
}
