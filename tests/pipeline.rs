//! End-to-end library scenarios: SQLite store, HTTP provider clients and a
//! local fake provider server.

mod common;

use std::sync::Arc;

use common::{FakeProviders, MUNICH};
use srag::cancel::CancellationToken;
use srag::completion::OpenAiCompletionClient;
use srag::config::{
    DbConfig, DistanceMetric, EndpointConfig, HealthConfig, RetrievalConfig, SyncConfig,
};
use srag::embedding::OpenAiEmbeddingClient;
use srag::error::{Dependency, RagError};
use srag::health::HealthProbe;
use srag::models::{chunk_id, Document};
use srag::rerank::InfinityRerankerClient;
use srag::retrieval::RetrievalPipeline;
use srag::store::{ChunkStore, SqliteStore};
use srag::sync::EmbeddingSyncEngine;
use tempfile::TempDir;

async fn sqlite_store(tmp: &TempDir) -> Arc<SqliteStore> {
    let dsn = tmp.path().join("data/rag.sqlite");
    let pool = srag::db::connect(dsn.to_str().unwrap(), &DbConfig::default())
        .await
        .unwrap();
    srag::migrate::run_migrations(&pool).await.unwrap();
    Arc::new(SqliteStore::new(pool, DistanceMetric::Cosine))
}

fn endpoint(base_url: &str) -> EndpointConfig {
    EndpointConfig {
        base_url: Some(base_url.to_string()),
        model: Some("fake-model".to_string()),
        max_retries: 0,
        ..Default::default()
    }
}

fn embedder(base_url: &str) -> Arc<OpenAiEmbeddingClient> {
    let ep = endpoint(base_url).require("embedding").unwrap();
    Arc::new(OpenAiEmbeddingClient::new(&ep, 16).unwrap())
}

fn reranker(base_url: &str) -> Arc<InfinityRerankerClient> {
    let ep = endpoint(base_url).require("reranker").unwrap();
    Arc::new(InfinityRerankerClient::new(&ep).unwrap())
}

fn munich() -> Document {
    Document::from_json(MUNICH.as_bytes()).unwrap()
}

#[tokio::test]
async fn test_munich_scenario_over_http_providers() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let fake = FakeProviders::start().await;
    let cancel = CancellationToken::new();

    store.upsert_document_chunks(&munich()).await.unwrap();
    let engine = EmbeddingSyncEngine::new(
        store.clone(),
        embedder(&fake.base_url),
        &SyncConfig::default(),
    );
    assert_eq!(engine.sync(true, &cancel).await.into_result().unwrap(), 2);

    let pipeline = RetrievalPipeline::new(
        store.clone(),
        embedder(&fake.base_url),
        reranker(&fake.base_url),
        &RetrievalConfig::default(),
    );
    let results = pipeline.query("Where is Munich?", 1, &cancel).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.chunk_index, 0);
    assert_eq!(results[0].chunk.document_id, "d1");
}

#[tokio::test]
async fn test_sync_twice_makes_no_second_provider_call() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let fake = FakeProviders::start().await;
    let cancel = CancellationToken::new();
    store.upsert_document_chunks(&munich()).await.unwrap();

    let engine = EmbeddingSyncEngine::new(
        store.clone(),
        embedder(&fake.base_url),
        &SyncConfig::default(),
    );
    engine.sync(true, &cancel).await.into_result().unwrap();
    let calls = fake.counters.embedding_calls();
    let before = store.get_chunk(&chunk_id("d1", 0)).await.unwrap().embedding;

    let report = engine.sync(true, &cancel).await;
    assert_eq!(report.into_result().unwrap(), 0);
    assert_eq!(fake.counters.embedding_calls(), calls);
    let after = store.get_chunk(&chunk_id("d1", 0)).await.unwrap().embedding;
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_force_recomputes_every_chunk() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let fake = FakeProviders::start().await;
    let cancel = CancellationToken::new();
    store.upsert_document_chunks(&munich()).await.unwrap();

    let engine = EmbeddingSyncEngine::new(
        store.clone(),
        embedder(&fake.base_url),
        &SyncConfig {
            page_size: 1,
            workers: 1,
        },
    );
    engine.sync(true, &cancel).await.into_result().unwrap();
    assert_eq!(fake.counters.embedded_texts(), 2);

    assert_eq!(engine.sync(false, &cancel).await.into_result().unwrap(), 2);
    assert_eq!(fake.counters.embedded_texts(), 4);
}

#[tokio::test]
async fn test_reingest_only_invalidates_changed_chunk() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let fake = FakeProviders::start().await;
    let cancel = CancellationToken::new();
    store.upsert_document_chunks(&munich()).await.unwrap();
    EmbeddingSyncEngine::new(store.clone(), embedder(&fake.base_url), &SyncConfig::default())
        .sync(true, &cancel)
        .await
        .into_result()
        .unwrap();

    assert_eq!(store.upsert_document_chunks(&munich()).await.unwrap(), 0);
    assert!(store.get_chunk(&chunk_id("d1", 0)).await.unwrap().embedding.is_some());

    let mut changed = munich();
    changed.chunks[1].text = "The sky is grey.".to_string();
    assert_eq!(store.upsert_document_chunks(&changed).await.unwrap(), 1);
    assert!(store.get_chunk(&chunk_id("d1", 0)).await.unwrap().embedding.is_some());
    assert!(store.get_chunk(&chunk_id("d1", 1)).await.unwrap().embedding.is_none());
}

#[tokio::test]
async fn test_delete_cascades_to_chunks() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    store.upsert_document_chunks(&munich()).await.unwrap();

    assert_eq!(store.delete_document("d1").await.unwrap(), 2);
    for index in 0..2 {
        let err = store.get_chunk(&chunk_id("d1", index)).await.unwrap_err();
        assert!(matches!(err, RagError::NotFound(_)));
    }
}

#[tokio::test]
async fn test_health_unreachable_completion_tagged() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let fake = FakeProviders::start().await;

    let completion_ep = endpoint("http://127.0.0.1:9").require("assistant").unwrap();
    let probe = HealthProbe::new(
        store,
        embedder(&fake.base_url),
        reranker(&fake.base_url),
        Arc::new(OpenAiCompletionClient::new(&completion_ep).unwrap()),
        HealthConfig::default(),
    );
    let err = probe.check(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.dependency(), Some(Dependency::Completion));
}

#[tokio::test]
async fn test_health_all_reachable() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;
    let fake = FakeProviders::start().await;

    let completion_ep = endpoint(&fake.base_url).require("assistant").unwrap();
    let probe = HealthProbe::new(
        store,
        embedder(&fake.base_url),
        reranker(&fake.base_url),
        Arc::new(OpenAiCompletionClient::new(&completion_ep).unwrap()),
        HealthConfig::default(),
    );
    let report = probe.check(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.checks.len(), 4);
}
