//! Deterministic in-process providers for unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::completion::CompletionClient;
use crate::embedding::EmbeddingClient;
use crate::error::{RagError, Result};
use crate::models::{ChunkRecord, Document};
use crate::rerank::{RerankResult, RerankerClient};

const DIMS: usize = 64;

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Bag-of-words vector: each word bumps one FNV-hashed slot.
pub(crate) fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for w in words(text) {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in w.bytes() {
            h ^= b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        v[(h % DIMS as u64) as usize] += 1.0;
    }
    v
}

/// Counts batches and texts; can be told to fail from a given call on.
pub(crate) struct FakeEmbedder {
    pub calls: AtomicUsize,
    pub texts: AtomicUsize,
    pub max_batch: usize,
    pub model: String,
    fail_from_call: Mutex<Option<usize>>,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self::with_model("fake-embed")
    }

    pub fn with_model(model: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
            max_batch: 64,
            model: model.to_string(),
            fail_from_call: Mutex::new(None),
        }
    }

    pub fn batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch;
        self
    }

    /// Calls numbered `n` and later (1-based) fail; `None` heals.
    pub fn fail_from(&self, n: Option<usize>) {
        *self.fail_from_call.lock().unwrap() = n;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingClient for FakeEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if matches!(*self.fail_from_call.lock().unwrap(), Some(n) if call >= n) {
            return Err(RagError::upstream("embedding", "HTTP 503 from fake"));
        }
        assert!(texts.len() <= self.max_batch, "batch larger than max_batch_size");
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| bag_of_words(t)).collect())
    }
}

/// Scores by the number of distinct query words found in each document.
pub(crate) struct OverlapReranker {
    pub fail: bool,
}

#[async_trait]
impl RerankerClient for OverlapReranker {
    fn model_name(&self) -> &str {
        "fake-rerank"
    }

    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankResult>> {
        if self.fail {
            return Err(RagError::upstream("rerank", "HTTP 500 from fake"));
        }
        let q: HashSet<String> = words(query).into_iter().collect();
        let mut results: Vec<RerankResult> = documents
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let d: HashSet<String> = words(d).into_iter().collect();
                RerankResult {
                    document_index: i,
                    score: q.intersection(&d).count() as f32,
                }
            })
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(top_n);
        Ok(results)
    }
}

pub(crate) struct EchoCompletion {
    pub reply: String,
}

#[async_trait]
impl CompletionClient for EchoCompletion {
    fn model_name(&self) -> &str {
        "fake-complete"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        if self.reply.is_empty() {
            return Err(RagError::upstream("completion", "empty response"));
        }
        Ok(self.reply.clone())
    }
}

pub(crate) fn document(id: &str, texts: &[&str]) -> Document {
    Document {
        id: Some(id.to_string()),
        raw_document: format!("{}.pdf", id),
        chunks: texts
            .iter()
            .enumerate()
            .map(|(i, t)| ChunkRecord {
                chunk_index: i as i64,
                text: t.to_string(),
            })
            .collect(),
    }
}

pub(crate) fn munich() -> Document {
    document("d1", &["Munich is in Germany.", "The sky is blue."])
}
