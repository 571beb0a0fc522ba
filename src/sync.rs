//! Embedding backfill.
//!
//! [`EmbeddingSyncEngine::sync`] pages through chunks whose embedding is
//! missing or was produced by another model, embeds them in batches no
//! larger than the provider allows, and writes each vector back.
//!
//! # Paging
//!
//! Each round fetches a window of `page_size × workers` pending chunks
//! (oldest first) and splits it into pages. With `workers = 1` pages run
//! strictly in order; with more, the pages of one window are embedded
//! concurrently on a [`JoinSet`]. Rounds repeat until the store reports
//! nothing pending.
//!
//! # Failure
//!
//! A failed batch is not retried here. Vectors already written stay
//! written; the round finishes, the run stops, and the first error is
//! returned in the [`SyncReport`]. Running `sync` again picks up exactly
//! the chunks that are still pending.
//!
//! # Force mode
//!
//! Every run gets a fresh id that is stored next to each vector it writes.
//! `skip_existing = false` asks the store for every chunk not yet written
//! by *this* run, so each chunk is embedded exactly once per forced run
//! and paging still terminates, however close together runs happen.

use std::sync::Arc;

use tokio::task::JoinSet;
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::config::{SyncConfig, MAX_SYNC_WORKERS};
use crate::embedding::{embed_checked, EmbeddingClient};
use crate::error::{RagError, Result};
use crate::models::{PendingChunk, WriteOutcome};
use crate::store::ChunkStore;

/// Outcome of one [`EmbeddingSyncEngine::sync`] run.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Vectors written.
    pub embedded: u64,
    /// Vectors dropped because the chunk text changed while embedding.
    pub superseded: u64,
    /// Chunks deleted while their page was in flight.
    pub vanished: u64,
    /// Pages processed, including the failed one.
    pub pages: u64,
    pub first_error: Option<RagError>,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.first_error.is_none()
    }

    /// Converts to `Err` when a batch failed, discarding the counts.
    pub fn into_result(self) -> Result<u64> {
        match self.first_error {
            Some(e) => Err(e),
            None => Ok(self.embedded),
        }
    }
}

#[derive(Debug, Default)]
struct PageOutcome {
    embedded: u64,
    superseded: u64,
    vanished: u64,
    error: Option<RagError>,
}

pub struct EmbeddingSyncEngine {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingClient>,
    page_size: usize,
    workers: usize,
}

impl EmbeddingSyncEngine {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingClient>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            page_size: config.page_size.max(1),
            workers: config.workers.clamp(1, MAX_SYNC_WORKERS),
        }
    }

    /// Backfills embeddings until nothing is pending, a batch fails, or
    /// `cancel` fires.
    ///
    /// Storage errors while listing pending chunks end the run the same
    /// way as batch failures: the report carries them in `first_error`.
    pub async fn sync(&self, skip_existing: bool, cancel: &CancellationToken) -> SyncReport {
        let model = self.embedder.model_name().to_string();
        let run_id = Uuid::new_v4().to_string();
        let force_run = (!skip_existing).then_some(run_id.as_str());
        let window = self.page_size * self.workers;
        let mut report = SyncReport::default();

        tracing::info!(
            model = %model,
            run = %run_id,
            force = !skip_existing,
            page_size = self.page_size,
            workers = self.workers,
            "embedding sync started"
        );

        loop {
            if cancel.is_cancelled() {
                report.first_error = Some(RagError::Cancelled);
                break;
            }

            let pending = match cancel
                .run(
                    self.store
                        .chunks_missing_embedding(&model, window, force_run),
                )
                .await
            {
                Ok(pending) => pending,
                Err(e) => {
                    report.first_error = Some(e);
                    break;
                }
            };
            if pending.is_empty() {
                break;
            }

            let pages: Vec<Vec<PendingChunk>> = pending
                .chunks(self.page_size)
                .map(|page| page.to_vec())
                .collect();
            let outcomes = self.run_pages(pages, &model, &run_id, cancel).await;

            for outcome in outcomes {
                report.pages += 1;
                report.embedded += outcome.embedded;
                report.superseded += outcome.superseded;
                report.vanished += outcome.vanished;
                if report.first_error.is_none() {
                    report.first_error = outcome.error;
                }
            }
            tracing::info!(
                embedded = report.embedded,
                pages = report.pages,
                "embedding sync progress"
            );
            if report.first_error.is_some() {
                break;
            }
        }

        match &report.first_error {
            None => tracing::info!(
                embedded = report.embedded,
                superseded = report.superseded,
                "embedding sync finished"
            ),
            Some(e) => tracing::warn!(
                embedded = report.embedded,
                error = %e,
                "embedding sync stopped"
            ),
        }
        report
    }

    /// Runs one window of pages; outcomes come back in page order.
    async fn run_pages(
        &self,
        pages: Vec<Vec<PendingChunk>>,
        model: &str,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> Vec<PageOutcome> {
        if self.workers == 1 || pages.len() == 1 {
            let mut outcomes = Vec::with_capacity(pages.len());
            for page in pages {
                let outcome = embed_page(
                    self.store.as_ref(),
                    self.embedder.as_ref(),
                    &page,
                    model,
                    run_id,
                    cancel,
                )
                .await;
                let failed = outcome.error.is_some();
                outcomes.push(outcome);
                if failed {
                    break;
                }
            }
            return outcomes;
        }

        let mut set = JoinSet::new();
        let count = pages.len();
        for (position, page) in pages.into_iter().enumerate() {
            let store = self.store.clone();
            let embedder = self.embedder.clone();
            let model = model.to_string();
            let run_id = run_id.to_string();
            let cancel = cancel.clone();
            set.spawn(async move {
                let outcome = embed_page(
                    store.as_ref(),
                    embedder.as_ref(),
                    &page,
                    &model,
                    &run_id,
                    &cancel,
                )
                .await;
                (position, outcome)
            });
        }

        let mut slots: Vec<Option<PageOutcome>> = (0..count).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((position, outcome)) => slots[position] = Some(outcome),
                Err(e) => {
                    tracing::warn!(error = %e, "sync worker aborted");
                }
            }
        }
        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| PageOutcome {
                    error: Some(RagError::storage("sync worker aborted")),
                    ..Default::default()
                })
            })
            .collect()
    }
}

/// Embeds one page in provider-sized batches and writes the vectors.
///
/// Stops at the first failed batch; earlier batches stay committed.
async fn embed_page(
    store: &dyn ChunkStore,
    embedder: &dyn EmbeddingClient,
    page: &[PendingChunk],
    model: &str,
    run_id: &str,
    cancel: &CancellationToken,
) -> PageOutcome {
    let mut outcome = PageOutcome::default();
    let batch_size = embedder.max_batch_size().max(1);

    for batch in page.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
        let vectors = match cancel.run(embed_checked(embedder, &texts)).await {
            Ok(vectors) => vectors,
            Err(e) => {
                tracing::warn!(batch = batch.len(), error = %e, "embedding batch failed");
                outcome.error = Some(e);
                return outcome;
            }
        };

        for (item, vector) in batch.iter().zip(vectors.iter()) {
            match store
                .write_embedding(&item.id, vector, model, &item.hash, run_id)
                .await
            {
                Ok(WriteOutcome::Written) => outcome.embedded += 1,
                Ok(WriteOutcome::Superseded) => {
                    tracing::debug!(chunk = %item.id, "chunk text changed during embedding");
                    outcome.superseded += 1;
                }
                Err(RagError::NotFound(_)) => {
                    tracing::debug!(chunk = %item.id, "chunk deleted during embedding");
                    outcome.vanished += 1;
                }
                Err(e) => {
                    outcome.error = Some(e);
                    return outcome;
                }
            }
        }
    }
    outcome
}
