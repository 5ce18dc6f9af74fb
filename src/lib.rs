//! # codectx
//!
//! A code context indexing and retrieval pipeline.
//!
//! codectx ingests source trees supplied by a caller, splits each file into
//! boundary-aware chunks, embeds the chunks in rate-limited batches, and
//! maintains a vector index for similarity search. At query time it embeds
//! the question, retrieves the closest chunks, and generates an answer with
//! conversation continuity, persisting everything in SQLite.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌───────────────┐
//! │  Indexer   │──▶│   Chunker    │──▶│    SQLite     │
//! │ force/     │   │ boundary-    │   │ projects/     │
//! │ append     │   │ aware spans  │   │ files/chunks  │
//! └─────┬──────┘   └──────────────┘   └───────┬───────┘
//!       │                                     │
//!       ▼                                     ▼
//! ┌────────────┐   ┌──────────────┐   ┌───────────────┐
//! │ Embedding  │──▶│ VectorStore  │◀──│   Retriever   │
//! │ + quota    │   │ batched      │   │ query + LLM   │
//! └────────────┘   └──────────────┘   └───────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunker`] | Boundary-aware text chunking |
//! | [`languages`] | Per-language boundary patterns |
//! | [`indexer`] | Indexing orchestration and state machine |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Answer generation provider abstraction |
//! | [`quota`] | Daily usage counters over a KV cache |
//! | [`vector_store`] | Vector index interface and batch manager |
//! | [`retriever`] | Query-time retrieval and conversations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunker;
pub mod config;
pub mod db;
pub mod digest;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod languages;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod quota;
pub mod retriever;
pub mod vector_store;

pub use error::{Error, Result};
