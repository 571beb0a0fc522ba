//! Shared fakes for integration tests.
//!
//! `FakeProviders` serves OpenAI-style `/embeddings` and `/completions` and
//! an Infinity-style `/rerank` on a real local port. Embeddings are
//! bag-of-words vectors; rerank scores count shared query words.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};

const DIMS: usize = 64;

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

pub fn bag_of_words(text: &str) -> Vec<f32> {
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

pub fn overlap(query: &str, doc: &str) -> f32 {
    let q: HashSet<String> = words(query).into_iter().collect();
    let d: HashSet<String> = words(doc).into_iter().collect();
    q.intersection(&d).count() as f32
}

#[derive(Clone, Default)]
pub struct Counters {
    pub embedding_calls: Arc<AtomicUsize>,
    pub embedded_texts: Arc<AtomicUsize>,
    pub rerank_calls: Arc<AtomicUsize>,
}

impl Counters {
    pub fn embedding_calls(&self) -> usize {
        self.embedding_calls.load(Ordering::SeqCst)
    }

    pub fn embedded_texts(&self) -> usize {
        self.embedded_texts.load(Ordering::SeqCst)
    }
}

pub struct FakeProviders {
    pub base_url: String,
    pub counters: Counters,
}

async fn embeddings(State(c): State<Counters>, Json(req): Json<Value>) -> Json<Value> {
    c.embedding_calls.fetch_add(1, Ordering::SeqCst);
    let inputs: Vec<String> = match &req["input"] {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => vec![],
    };
    c.embedded_texts.fetch_add(inputs.len(), Ordering::SeqCst);
    let data: Vec<Value> = inputs
        .iter()
        .enumerate()
        .map(|(i, t)| json!({"object": "embedding", "index": i, "embedding": bag_of_words(t)}))
        .collect();
    Json(json!({"object": "list", "data": data}))
}

async fn rerank(State(c): State<Counters>, Json(req): Json<Value>) -> Json<Value> {
    c.rerank_calls.fetch_add(1, Ordering::SeqCst);
    let query = req["query"].as_str().unwrap_or_default();
    let top_n = req["top_n"].as_u64().unwrap_or(u64::MAX) as usize;
    let docs: Vec<&str> = req["documents"]
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let mut scored: Vec<(usize, f32)> = docs
        .iter()
        .enumerate()
        .map(|(i, d)| (i, overlap(query, d)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(top_n);
    let results: Vec<Value> = scored
        .into_iter()
        .map(|(i, s)| json!({"index": i, "relevance_score": s}))
        .collect();
    Json(json!({"object": "rerank", "results": results}))
}

async fn completions(Json(_req): Json<Value>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({"choices": [{"index": 0, "text": " and welcome"}]})),
    )
}

impl FakeProviders {
    pub async fn start() -> Self {
        let counters = Counters::default();
        let app = Router::new()
            .route("/embeddings", post(embeddings))
            .route("/rerank", post(rerank))
            .route("/completions", post(completions))
            .with_state(counters.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        FakeProviders {
            base_url: format!("http://{}", addr),
            counters,
        }
    }
}

pub const MUNICH: &str = r#"{"id": "d1", "raw_document": "geo.pdf", "chunks": [
    {"chunk_index": 0, "text": "Munich is in Germany."},
    {"chunk_index": 1, "text": "The sky is blue."}]}"#;
