//! SQLite-backed [`ChunkStore`].
//!
//! Vectors are stored inline on the chunk row as little-endian `f32` BLOBs.
//! Similarity search is an exact scan in Rust over every vector with the
//! query's dimensionality, so there is no approximation error.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{top_k, ChunkStore};
use crate::config::DistanceMetric;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{RagError, Result};
use crate::models::{
    chunk_id, hash_text, now_millis, Chunk, Document, PendingChunk, SimilarChunk, StoreStats,
    WriteOutcome,
};

/// SQLite implementation of [`ChunkStore`].
///
/// Wraps a [`SqlitePool`]; the pool is safe to share between concurrent
/// pipeline invocations.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    metric: DistanceMetric,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, metric: DistanceMetric) -> Self {
        Self { pool, metric }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

const CHUNK_COLUMNS: &str = "c.id, c.document_id, d.raw_document, c.chunk_index, c.text, c.hash, \
     c.embedding, c.embedding_model, c.updated_at";

fn row_to_chunk(row: &SqliteRow) -> Chunk {
    let blob: Option<Vec<u8>> = row.get("embedding");
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        raw_document: row.get("raw_document"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        hash: row.get("hash"),
        embedding: blob.map(|b| blob_to_vec(&b)),
        embedding_model: row.get("embedding_model"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert_document_chunks(&self, doc: &Document) -> Result<u64> {
        doc.validate()?;
        let doc_id = doc.document_id();
        let now = now_millis();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, raw_document, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                raw_document = excluded.raw_document,
                updated_at = excluded.updated_at
            WHERE documents.raw_document != excluded.raw_document
            "#,
        )
        .bind(&doc_id)
        .bind(&doc.raw_document)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let mut changed = 0u64;
        for record in &doc.chunks {
            let result = sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, text, hash, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(document_id, chunk_index) DO UPDATE SET
                    text = excluded.text,
                    hash = excluded.hash,
                    embedding = NULL,
                    embedding_model = NULL,
                    embedding_dims = NULL,
                    embedded_at = NULL,
                    embedding_run = NULL,
                    updated_at = excluded.updated_at
                WHERE chunks.hash != excluded.hash
                "#,
            )
            .bind(chunk_id(&doc_id, record.chunk_index))
            .bind(&doc_id)
            .bind(record.chunk_index)
            .bind(&record.text)
            .bind(hash_text(&record.text))
            .bind(now)
            .execute(&mut *tx)
            .await?;
            changed += result.rows_affected();
        }

        tx.commit().await?;
        Ok(changed)
    }

    async fn chunks_missing_embedding(
        &self,
        model: &str,
        limit: usize,
        force_run: Option<&str>,
    ) -> Result<Vec<PendingChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, text, hash, updated_at
            FROM chunks
            WHERE embedding IS NULL
               OR embedding_model IS NULL
               OR embedding_model != ?
               OR (? IS NOT NULL AND (embedding_run IS NULL OR embedding_run != ?))
            ORDER BY updated_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(model)
        .bind(force_run)
        .bind(force_run)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PendingChunk {
                id: row.get("id"),
                text: row.get("text"),
                hash: row.get("hash"),
                updated_at: row.get("updated_at"),
            })
            .collect())
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
        let now = now_millis();

        let result = sqlx::query(
            r#"
            UPDATE chunks SET
                embedding = ?,
                embedding_model = ?,
                embedding_dims = ?,
                embedded_at = ?,
                embedding_run = ?,
                updated_at = ?
            WHERE id = ? AND hash = ?
            "#,
        )
        .bind(vec_to_blob(vector))
        .bind(model)
        .bind(vector.len() as i64)
        .bind(now)
        .bind(run_id)
        .bind(now)
        .bind(chunk_id)
        .bind(source_hash)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(WriteOutcome::Written);
        }

        let exists: Option<String> = sqlx::query_scalar("SELECT id FROM chunks WHERE id = ?")
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => Ok(WriteOutcome::Superseded),
            None => Err(RagError::not_found(format!("chunk {}", chunk_id))),
        }
    }

    async fn similarity_search(&self, query_vector: &[f32], k: usize) -> Result<Vec<SimilarChunk>> {
        if query_vector.is_empty() {
            return Err(RagError::invalid("query vector must not be empty"));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE c.embedding IS NOT NULL AND c.embedding_dims = ?
            "#,
            CHUNK_COLUMNS
        ))
        .bind(query_vector.len() as i64)
        .fetch_all(&self.pool)
        .await?;

        let hits: Vec<SimilarChunk> = rows
            .iter()
            .filter_map(|row| {
                let chunk = row_to_chunk(row);
                let distance = self
                    .metric
                    .distance(query_vector, chunk.embedding.as_deref()?);
                Some(SimilarChunk { chunk, distance })
            })
            .collect();

        Ok(top_k(hits, k))
    }

    async fn get_chunk(&self, id: &str) -> Result<Chunk> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM chunks c JOIN documents d ON d.id = c.document_id WHERE c.id = ?",
            CHUNK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(row_to_chunk)
            .ok_or_else(|| RagError::not_found(format!("chunk {}", id)))
    }

    async fn delete_document(&self, id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RagError::not_found(format!("document {}", id)));
        }

        tx.commit().await?;
        Ok(chunk_count as u64)
    }

    async fn stats(&self, model: Option<&str>) -> Result<StoreStats> {
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let embedded: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL AND (? IS NULL OR embedding_model = ?)",
        )
        .bind(model)
        .bind(model)
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            documents,
            chunks,
            embedded,
        })
    }
}
