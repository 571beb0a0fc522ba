//! Configuration loading.
//!
//! Settings come from an optional TOML file; the CLI then layers environment
//! variables and flags on top (see `main.rs`). Components never read the
//! environment themselves: they receive the sections they need through
//! their constructors.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::RagError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reranker: EndpointConfig,
    #[serde(default, alias = "assistant")]
    pub completion: EndpointConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    /// SQLite file path or `sqlite:` URL.
    #[serde(default)]
    pub dsn: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub distance: DistanceMetric,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            dsn: None,
            max_connections: default_max_connections(),
            distance: DistanceMetric::default(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

/// Distance used by similarity search. Fixed for the lifetime of a store.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    L2,
}

/// Base URL + model of one OpenAI-style provider.
#[derive(Debug, Deserialize, Clone)]
pub struct EndpointConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Optional bearer token.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: None,
            api_key: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

/// An [`EndpointConfig`] whose base URL and model are known to be present.
#[derive(Debug, Clone)]
pub struct ResolvedEndpoint {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl EndpointConfig {
    /// Checks that base URL and model are set. `name` is the section name
    /// used in the error message (e.g. `"embedding"`).
    pub fn require(&self, name: &str) -> Result<ResolvedEndpoint, RagError> {
        let base_url = self
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RagError::config(format!("{}.base_url is required", name)))?;
        let model = self
            .model
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RagError::config(format!("{}.model is required", name)))?;
        Ok(ResolvedEndpoint {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: self.api_key.clone(),
            timeout_secs: self.timeout_secs,
            max_retries: self.max_retries,
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(flatten)]
    pub endpoint: EndpointConfig,
    /// Largest number of texts the provider accepts in one request.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

fn default_max_batch_size() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// First-stage over-fetch multiplier: `k = max(limit * overfetch, limit)`.
    #[serde(default = "default_overfetch")]
    pub overfetch: usize,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            overfetch: default_overfetch(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

fn default_overfetch() -> usize {
    4
}
fn default_limit() -> usize {
    3
}
fn default_max_limit() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Pages embedded concurrently. 1 means strictly sequential.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            workers: default_workers(),
        }
    }
}

fn default_page_size() -> usize {
    64
}
fn default_workers() -> usize {
    1
}

pub const MAX_SYNC_WORKERS: usize = 8;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// How long in-flight requests may drain after a shutdown signal.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}
fn default_shutdown_grace_secs() -> u64 {
    10
}
fn default_request_timeout_secs() -> u64 {
    60
}

/// Canary requests used by the health probe.
#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    #[serde(default = "default_canary_text")]
    pub canary_text: String,
    #[serde(default = "default_canary_query")]
    pub canary_query: String,
    #[serde(default = "default_canary_documents")]
    pub canary_documents: Vec<String>,
    #[serde(default = "default_canary_text")]
    pub canary_prompt: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            canary_text: default_canary_text(),
            canary_query: default_canary_query(),
            canary_documents: default_canary_documents(),
            canary_prompt: default_canary_text(),
        }
    }
}

fn default_canary_text() -> String {
    "Hello world".to_string()
}
fn default_canary_query() -> String {
    "Where is Munich?".to_string()
}
fn default_canary_documents() -> Vec<String> {
    vec![
        "Munich is in Germany.".to_string(),
        "The sky is blue.".to_string(),
    ]
}

impl Config {
    pub fn require_dsn(&self) -> Result<&str, RagError> {
        self.db
            .dsn
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| RagError::config("db.dsn is required (or set RAG_DSN)"))
    }

    pub fn validate(&self) -> Result<(), RagError> {
        if self.db.max_connections == 0 {
            return Err(RagError::config("db.max_connections must be > 0"));
        }
        if self.embedding.max_batch_size == 0 {
            return Err(RagError::config("embedding.max_batch_size must be > 0"));
        }
        if self.sync.page_size == 0 {
            return Err(RagError::config("sync.page_size must be > 0"));
        }
        if !(1..=MAX_SYNC_WORKERS).contains(&self.sync.workers) {
            return Err(RagError::config(format!(
                "sync.workers must be in 1..={}",
                MAX_SYNC_WORKERS
            )));
        }
        if self.retrieval.overfetch == 0 {
            return Err(RagError::config("retrieval.overfetch must be >= 1"));
        }
        if self.retrieval.default_limit == 0
            || self.retrieval.default_limit > self.retrieval.max_limit
        {
            return Err(RagError::config(
                "retrieval.default_limit must be in 1..=retrieval.max_limit",
            ));
        }
        if self.health.canary_documents.is_empty() {
            return Err(RagError::config("health.canary_documents must not be empty"));
        }
        Ok(())
    }
}

/// Reads `path` if it exists; a missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
