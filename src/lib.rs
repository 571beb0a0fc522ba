//! # srag
//!
//! A retrieval-augmented-generation backend: ingest pre-chunked documents,
//! keep their embeddings in sync, and answer queries with two-stage
//! retrieval (vector search, then cross-encoder reranking) over a CLI and
//! an HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │ descriptors │──▶│  ChunkStore  │◀──│ Sync      │◀── EmbeddingClient
//! │  (ingest)   │   │ SQLite / mem │   │ engine    │
//! └─────────────┘   └──────┬───────┘   └───────────┘
//!                          │
//!                          ▼
//!                   ┌──────────────┐
//!                   │  Retrieval   │◀── EmbeddingClient + RerankerClient
//!                   │  pipeline    │
//!                   └──────┬───────┘
//!                 ┌────────┴────────┐
//!                 ▼                 ▼
//!            ┌─────────┐      ┌──────────┐
//!            │   CLI   │      │   HTTP   │
//!            │ (srag)  │      │ (axum)   │
//!            └─────────┘      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! srag init                          # create the schema
//! srag scan ./chunks                 # ingest *.chunks.json descriptors
//! srag compute                       # backfill embeddings
//! srag search "Where is Munich?"     # ranked chunks
//! srag serve                         # HTTP API on 127.0.0.1:5000
//! srag health                        # probe every dependency
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration |
//! | [`error`] | Error taxonomy |
//! | [`cancel`] | Cooperative cancellation |
//! | [`models`] | Core data types |
//! | [`db`] | SQLite pool |
//! | [`migrate`] | Schema creation |
//! | [`store`] | Chunk storage trait and backends |
//! | [`embedding`] | Embedding client and vector utilities |
//! | [`rerank`] | Reranker client |
//! | [`completion`] | Completion client |
//! | [`sync`] | Embedding backfill |
//! | [`retrieval`] | Two-stage query pipeline |
//! | [`health`] | Dependency health probe |
//! | [`server`] | HTTP query server |
//! | [`ingest`] | Descriptor scanning |

pub mod cancel;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
mod http;
pub mod health;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod rerank;
pub mod retrieval;
pub mod server;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;

pub use error::{RagError, Result};
