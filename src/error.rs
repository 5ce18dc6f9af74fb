//! Error taxonomy for the indexing and retrieval pipeline.
//!
//! Validation and not-found conditions are reported synchronously with no
//! side effects. Quota exhaustion is a distinct, user-visible condition and
//! is never retried. Partial-batch failures (embedding, vector upsert) are
//! counted rather than raised — see [`crate::indexer`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed caller input. No work was performed.
    #[error("validation: {0}")]
    Validation(String),

    /// Referenced project, file, or conversation does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The daily usage ceiling for a capability was hit before the call.
    #[error("daily {capability} quota exceeded: {used}/{limit} used, {requested} requested")]
    QuotaExceeded {
        capability: String,
        used: u64,
        limit: u64,
        requested: u64,
    },

    /// Embedding provider failure (network, API, or response shape).
    #[error("embedding provider: {0}")]
    Embedding(String),

    /// LLM provider failure during answer generation.
    #[error("llm provider: {0}")]
    Llm(String),

    /// Configuration file could not be read, parsed, or validated.
    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
