//! Dependency health probe.
//!
//! Checks storage, embedding, reranker and completion in that order with
//! one canary request each and stops at the first failure, which is
//! returned as [`RagError::Dependency`] tagged with the failing service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::cancel::CancellationToken;
use crate::completion::CompletionClient;
use crate::config::HealthConfig;
use crate::embedding::{embed_query, EmbeddingClient};
use crate::error::{Dependency, RagError, Result};
use crate::rerank::{validate_results, RerankerClient};
use crate::store::ChunkStore;

#[derive(Debug, Clone, Serialize)]
pub struct DependencyCheck {
    pub dependency: &'static str,
    pub model: Option<String>,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    pub checks: Vec<DependencyCheck>,
}

pub struct HealthProbe {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn EmbeddingClient>,
    reranker: Arc<dyn RerankerClient>,
    completion: Arc<dyn CompletionClient>,
    canaries: HealthConfig,
}

impl HealthProbe {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn EmbeddingClient>,
        reranker: Arc<dyn RerankerClient>,
        completion: Arc<dyn CompletionClient>,
        canaries: HealthConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            reranker,
            completion,
            canaries,
        }
    }

    pub async fn check(&self, cancel: &CancellationToken) -> Result<HealthReport> {
        let mut report = HealthReport::default();

        let elapsed = step(Dependency::Storage, cancel, self.store.ping()).await?;
        report.push(Dependency::Storage, None, elapsed);

        let elapsed = step(Dependency::Embedding, cancel, async {
            embed_query(self.embedder.as_ref(), &self.canaries.canary_text)
                .await
                .map(|_| ())
        })
        .await?;
        report.push(
            Dependency::Embedding,
            Some(self.embedder.model_name()),
            elapsed,
        );

        let elapsed = step(Dependency::Reranker, cancel, async {
            let docs = &self.canaries.canary_documents;
            let results = self
                .reranker
                .rerank(&self.canaries.canary_query, docs, docs.len())
                .await?;
            validate_results(&results, docs.len(), docs.len())
        })
        .await?;
        report.push(
            Dependency::Reranker,
            Some(self.reranker.model_name()),
            elapsed,
        );

        let elapsed = step(Dependency::Completion, cancel, async {
            self.completion
                .complete(&self.canaries.canary_prompt)
                .await
                .map(|_| ())
        })
        .await?;
        report.push(
            Dependency::Completion,
            Some(self.completion.model_name()),
            elapsed,
        );

        Ok(report)
    }
}

impl HealthReport {
    fn push(&mut self, dependency: Dependency, model: Option<&str>, elapsed: Duration) {
        tracing::info!(%dependency, ?elapsed, "dependency healthy");
        self.checks.push(DependencyCheck {
            dependency: dependency.as_str(),
            model: model.map(str::to_string),
            elapsed_ms: elapsed.as_millis(),
        });
    }
}

async fn step<F>(dependency: Dependency, cancel: &CancellationToken, fut: F) -> Result<Duration>
where
    F: std::future::Future<Output = Result<()>>,
{
    let started = Instant::now();
    match cancel.run(fut).await {
        Ok(()) => Ok(started.elapsed()),
        Err(RagError::Cancelled) => Err(RagError::Cancelled),
        Err(e) => {
            tracing::warn!(%dependency, error = %e, "dependency unhealthy");
            Err(e.for_dependency(dependency))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::OpenAiCompletionClient;
    use crate::http::test_support::endpoint;
    use crate::store::InMemoryStore;
    use crate::testing::{EchoCompletion, FakeEmbedder, OverlapReranker};

    fn probe(
        embedder: FakeEmbedder,
        reranker: OverlapReranker,
        completion: Arc<dyn CompletionClient>,
    ) -> HealthProbe {
        HealthProbe::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(embedder),
            Arc::new(reranker),
            completion,
            HealthConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_all_healthy() {
        let p = probe(
            FakeEmbedder::new(),
            OverlapReranker { fail: false },
            Arc::new(EchoCompletion {
                reply: "hi".to_string(),
            }),
        );
        let report = p.check(&CancellationToken::new()).await.unwrap();
        let order: Vec<&str> = report.checks.iter().map(|c| c.dependency).collect();
        assert_eq!(order, vec!["storage", "embedding", "reranker", "completion"]);
    }

    #[tokio::test]
    async fn test_unreachable_completion_is_tagged() {
        let unreachable =
            OpenAiCompletionClient::new(&endpoint("http://127.0.0.1:9", 0)).unwrap();
        let p = probe(
            FakeEmbedder::new(),
            OverlapReranker { fail: false },
            Arc::new(unreachable),
        );
        let err = p.check(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.dependency(), Some(Dependency::Completion));
    }

    #[tokio::test]
    async fn test_first_failure_wins() {
        let embedder = FakeEmbedder::new();
        embedder.fail_from(Some(1));
        let p = probe(
            embedder,
            OverlapReranker { fail: true },
            Arc::new(EchoCompletion {
                reply: String::new(),
            }),
        );
        let err = p.check(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.dependency(), Some(Dependency::Embedding));
    }

    #[tokio::test]
    async fn test_reranker_failure_is_tagged() {
        let p = probe(
            FakeEmbedder::new(),
            OverlapReranker { fail: true },
            Arc::new(EchoCompletion {
                reply: "hi".to_string(),
            }),
        );
        let err = p.check(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.dependency(), Some(Dependency::Reranker));
    }
}
