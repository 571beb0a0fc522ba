//! # srag CLI
//!
//! ## Usage
//!
//! ```bash
//! srag --config ./config/srag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `srag init` | Create the SQLite database and schema |
//! | `srag scan <path>` | Ingest `*.chunks.json` descriptors |
//! | `srag compute` | Backfill missing or stale embeddings |
//! | `srag search "<query>"` | Ranked chunks for a query |
//! | `srag get <chunk-id>` | Print one chunk's text |
//! | `srag delete <document-id>` | Delete a document and its chunks |
//! | `srag serve` | Start the HTTP query server |
//! | `srag health` | Probe storage, embedding, reranker and completion |
//!
//! Connection settings come from the config file, then environment
//! (`RAG_DSN`, `EMBEDDING_BASE_URL`, `EMBEDDING_MODEL`, `RERANKER_BASE_URL`,
//! `RERANKER_MODEL`, `ASSISTANT_BASE_URL`, `ASSISTANT_MODEL`,
//! `RAG_API_KEY`), then flags.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use srag::cancel::CancellationToken;
use srag::completion::OpenAiCompletionClient;
use srag::config::{self, Config};
use srag::embedding::{EmbeddingClient, OpenAiEmbeddingClient};
use srag::health::HealthProbe;
use srag::ingest;
use srag::rerank::InfinityRerankerClient;
use srag::retrieval::RetrievalPipeline;
use srag::server::QueryServer;
use srag::store::{ChunkStore, SqliteStore};
use srag::sync::EmbeddingSyncEngine;
use srag::{db, migrate};

/// srag: chunk store, embedding sync and two-stage retrieval.
#[derive(Parser)]
#[command(name = "srag", version, about)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/srag.toml")]
    config: PathBuf,

    /// Log at debug level (overrides RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

/// Connection settings layered over the config file.
#[derive(Args)]
struct Overrides {
    /// SQLite path or `sqlite:` URL.
    #[arg(long, env = "RAG_DSN", global = true)]
    dsn: Option<String>,

    #[arg(long, env = "EMBEDDING_BASE_URL", global = true)]
    embedding_base_url: Option<String>,

    #[arg(long, env = "EMBEDDING_MODEL", global = true)]
    embedding_model: Option<String>,

    #[arg(long, env = "RERANKER_BASE_URL", global = true)]
    reranker_base_url: Option<String>,

    #[arg(long, env = "RERANKER_MODEL", global = true)]
    reranker_model: Option<String>,

    #[arg(long, env = "ASSISTANT_BASE_URL", global = true)]
    assistant_base_url: Option<String>,

    #[arg(long, env = "ASSISTANT_MODEL", global = true)]
    assistant_model: Option<String>,

    /// Bearer token sent to every provider.
    #[arg(long, env = "RAG_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema. Safe to run repeatedly.
    Init,

    /// Ingest chunk descriptors from a file or directory.
    ///
    /// Each descriptor is upserted on its own; a malformed file is reported
    /// and skipped, and the command exits non-zero at the end.
    Scan {
        path: PathBuf,

        /// File-name pattern to ingest.
        #[arg(long, default_value = ingest::DEFAULT_GLOB)]
        glob: String,
    },

    /// Compute embeddings for chunks that lack one for the current model.
    Compute {
        /// Re-embed every chunk, even ones already up to date.
        #[arg(long)]
        force: bool,
    },

    /// Query the index and print the ranked chunks.
    Search {
        query: String,

        #[arg(long, default_value_t = 3)]
        limit: usize,
    },

    /// Print the text of one chunk.
    Get { id: String },

    /// Delete a document and all of its chunks.
    Delete { id: String },

    /// Serve the HTTP query API.
    Serve {
        /// Address to listen on (overrides `[server].bind`).
        #[arg(long)]
        bind: Option<String>,
    },

    /// Check every dependency with a canary request.
    Health,
}

impl Overrides {
    fn apply(self, cfg: &mut Config) {
        fn set(slot: &mut Option<String>, value: Option<String>) {
            if value.is_some() {
                *slot = value;
            }
        }
        set(&mut cfg.db.dsn, self.dsn);
        set(&mut cfg.embedding.endpoint.base_url, self.embedding_base_url);
        set(&mut cfg.embedding.endpoint.model, self.embedding_model);
        set(&mut cfg.reranker.base_url, self.reranker_base_url);
        set(&mut cfg.reranker.model, self.reranker_model);
        set(&mut cfg.completion.base_url, self.assistant_base_url);
        set(&mut cfg.completion.model, self.assistant_model);
        if self.api_key.is_some() {
            cfg.embedding.endpoint.api_key = self.api_key.clone();
            cfg.reranker.api_key = self.api_key.clone();
            cfg.completion.api_key = self.api_key;
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Cancels `token` on SIGINT or SIGTERM.
fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        tracing::info!("signal received, shutting down");
        token.cancel();
    });
}

async fn open_store(cfg: &Config) -> Result<Arc<SqliteStore>> {
    let dsn = cfg.require_dsn()?;
    let pool = db::connect(dsn, &cfg.db)
        .await
        .with_context(|| format!("cannot open database {}", dsn))?;
    migrate::run_migrations(&pool).await?;
    Ok(Arc::new(SqliteStore::new(pool, cfg.db.distance)))
}

fn embedder(cfg: &Config) -> Result<Arc<OpenAiEmbeddingClient>> {
    let endpoint = cfg.embedding.endpoint.require("embedding")?;
    Ok(Arc::new(OpenAiEmbeddingClient::new(
        &endpoint,
        cfg.embedding.max_batch_size,
    )?))
}

fn reranker(cfg: &Config) -> Result<Arc<InfinityRerankerClient>> {
    let endpoint = cfg.reranker.require("reranker")?;
    Ok(Arc::new(InfinityRerankerClient::new(&endpoint)?))
}

fn completion(cfg: &Config) -> Result<Arc<OpenAiCompletionClient>> {
    let endpoint = cfg.completion.require("assistant")?;
    Ok(Arc::new(OpenAiCompletionClient::new(&endpoint)?))
}

fn pipeline(cfg: &Config, store: Arc<SqliteStore>) -> Result<RetrievalPipeline> {
    Ok(RetrievalPipeline::new(
        store,
        embedder(cfg)?,
        reranker(cfg)?,
        &cfg.retrieval,
    ))
}

async fn run(cli: Cli) -> Result<()> {
    let mut cfg = config::load_config(&cli.config)?;
    cli.overrides.apply(&mut cfg);

    let cancel = CancellationToken::new();

    match cli.command {
        Commands::Init => {
            let store = open_store(&cfg).await?;
            store.close().await;
            println!("Database initialized successfully.");
        }

        Commands::Scan { path, glob } => {
            let store = open_store(&cfg).await?;
            cancel_on_signal(cancel.clone());
            let report = ingest::scan(store.as_ref(), &path, &glob, &cancel).await?;
            store.close().await;

            println!("scan {}", path.display());
            println!("  files: {}", report.files);
            println!("  documents ingested: {}", report.documents);
            println!("  chunks changed: {}", report.chunks_changed);
            for failure in &report.failures {
                println!("  failed: {}: {}", failure.path.display(), failure.error);
            }
            if !report.failures.is_empty() {
                bail!("{} descriptor(s) failed to ingest", report.failures.len());
            }
        }

        Commands::Compute { force } => {
            let store = open_store(&cfg).await?;
            let embedder = embedder(&cfg)?;
            let model = embedder.model_name().to_string();
            let engine = EmbeddingSyncEngine::new(store.clone(), embedder, &cfg.sync);
            cancel_on_signal(cancel.clone());

            let report = engine.sync(!force, &cancel).await;
            let stats = store.stats(Some(model.as_str())).await?;
            store.close().await;

            println!("compute{}", if force { " (force)" } else { "" });
            println!("  embedded: {}", report.embedded);
            if report.superseded > 0 {
                println!("  superseded: {}", report.superseded);
            }
            println!("  up to date: {}/{}", stats.embedded, stats.chunks);
            if let Some(e) = report.first_error {
                return Err(e).context("embedding sync stopped early; rerun to resume");
            }
        }

        Commands::Search { query, limit } => {
            let store = open_store(&cfg).await?;
            let pipeline = pipeline(&cfg, store.clone())?;
            cancel_on_signal(cancel.clone());
            let results = pipeline.query(&query, limit, &cancel).await?;
            store.close().await;

            if results.is_empty() {
                println!("No results.");
                return Ok(());
            }
            println!(
                "{:<4} {:<36} {:<32} {:>5} {:>8}",
                "RANK", "CHUNK", "DOCUMENT", "INDEX", "SCORE"
            );
            for (rank, r) in results.iter().enumerate() {
                println!(
                    "{:<4} {:<36} {:<32} {:>5} {:>8.4}",
                    rank + 1,
                    r.chunk.id,
                    truncate(&r.chunk.raw_document, 32),
                    r.chunk.chunk_index,
                    r.score
                );
            }
        }

        Commands::Get { id } => {
            let store = open_store(&cfg).await?;
            let chunk = store.get_chunk(&id).await?;
            store.close().await;
            println!("{}", chunk.text);
        }

        Commands::Delete { id } => {
            let store = open_store(&cfg).await?;
            let removed = store.delete_document(&id).await?;
            store.close().await;
            println!("Deleted document {} ({} chunks).", id, removed);
        }

        Commands::Serve { bind } => {
            let store = open_store(&cfg).await?;
            let pipeline = Arc::new(pipeline(&cfg, store.clone())?);
            let bind = bind.unwrap_or_else(|| cfg.server.bind.clone());
            let server = QueryServer::new(pipeline, cfg.server.clone());

            let handle = server.shutdown_handle();
            cancel_on_signal(cancel.clone());
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    cancel.cancelled().await;
                    handle.shutdown();
                }
            });

            println!("Query server listening on http://{}", bind);
            server.start(&bind).await?;
            store.close().await;
        }

        Commands::Health => {
            let store = open_store(&cfg).await?;
            let probe = HealthProbe::new(
                store.clone(),
                embedder(&cfg)?,
                reranker(&cfg)?,
                completion(&cfg)?,
                cfg.health.clone(),
            );
            cancel_on_signal(cancel.clone());
            let outcome = probe.check(&cancel).await;
            store.close().await;

            let report = outcome?;
            for check in &report.checks {
                println!(
                    "ok  {:<10} {:<24} {:>6} ms",
                    check.dependency,
                    check.model.as_deref().unwrap_or("-"),
                    check.elapsed_ms
                );
            }
            println!("All dependencies healthy.");
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
