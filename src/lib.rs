//! # Workspace Indexer
//!
//! A local, deterministic workspace-indexing pipeline: walk a directory
//! tree, content-address every file and directory, split file text into
//! token-bounded chunks, obtain vector embeddings for each chunk from an
//! external embedding executor, and persist the resulting metadata/vector
//! graph into an external multi-model store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌──────────────┐   ┌───────────────┐   ┌─────────┐
//! │ Caller  │──▶│  Pipeline     │──▶│ Scan          │──▶│  Store   │
//! │ (CLI)   │   │  Coordinator │   │ Chunk + Embed │   │ (graph) │
//! └─────────┘   └──────┬───────┘   └───────┬───────┘   └─────────┘
//!                      │                   │
//!                      ▼                   ▼
//!                 ┌──────────┐       ┌───────────┐
//!                 │ RunReport│       │ NDJSON     │
//!                 │ (pass /  │       │ artifacts │
//!                 │  fail)   │       │ per run   │
//!                 └──────────┘       └───────────┘
//! ```
//!
//! Every record written to the store is keyed by a content-addressed
//! identifier, so repeated runs over an unchanged workspace converge to
//! no-ops instead of accumulating duplicates. Each run leaves NDJSON
//! evidence artifacts (`files.ndjson`, `dirs.ndjson`, `vectors.ndjson`)
//! under its own artifact directory for audit and replay.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with env overrides |
//! | [`models`] | Record types at the store boundary |
//! | [`ident`] | Content addressing and hashing |
//! | [`runctx`] | Run lifecycle and artifact accounting |
//! | [`chunker`] | Token-aware lossless chunking |
//! | [`scan`] | Workspace tree scanner |
//! | [`embed`] | Embedding orchestration |
//! | [`embedding`] | Embedding executor client |
//! | [`store`] | Storage backend abstraction |
//! | [`pipeline`] | Scan/Embed/All coordination |

pub mod chunker;
pub mod config;
pub mod embed;
pub mod embedding;
pub mod ident;
pub mod models;
pub mod pipeline;
pub mod runctx;
pub mod scan;
pub mod store;
