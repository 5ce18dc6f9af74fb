use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Token budget per chunk; the effective character budget is
    /// `max_tokens * chars_per_token`.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: usize,
    /// Trailing lines carried into the next fixed-size window.
    #[serde(default = "default_overlap_lines")]
    pub overlap_lines: usize,
    /// Minimum line distance between accepted code boundaries.
    #[serde(default = "default_min_boundary_gap")]
    pub min_boundary_gap: usize,
}

impl ChunkingConfig {
    pub fn max_chars(&self) -> usize {
        self.max_tokens * self.chars_per_token
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            chars_per_token: default_chars_per_token(),
            overlap_lines: default_overlap_lines(),
            min_boundary_gap: default_min_boundary_gap(),
        }
    }
}

fn default_max_tokens() -> usize {
    512
}
fn default_chars_per_token() -> usize {
    4
}
fn default_overlap_lines() -> usize {
    3
}
fn default_min_boundary_gap() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    /// Upper bound on statements per write transaction.
    #[serde(default = "default_write_batch")]
    pub write_batch_size: usize,
    #[serde(default = "default_embed_batch")]
    pub embed_batch_size: usize,
    #[serde(default = "default_upsert_batch")]
    pub upsert_batch_size: usize,
    /// A project re-indexed without flags within this window is skipped.
    #[serde(default = "default_cooldown")]
    pub reindex_cooldown_secs: i64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            write_batch_size: default_write_batch(),
            embed_batch_size: default_embed_batch(),
            upsert_batch_size: default_upsert_batch(),
            reindex_cooldown_secs: default_cooldown(),
        }
    }
}

fn default_write_batch() -> usize {
    100
}
fn default_embed_batch() -> usize {
    50
}
fn default_upsert_batch() -> usize {
    100
}
fn default_cooldown() -> i64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"` or `"mock"`.
    #[serde(default = "default_embed_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Texts embedded per UTC day before calls are rejected.
    #[serde(default = "default_embed_daily_limit")]
    pub daily_limit: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embed_provider(),
            model: None,
            dims: None,
            daily_limit: default_embed_daily_limit(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embed_provider() -> String {
    "mock".to_string()
}
fn default_embed_daily_limit() -> u64 {
    10_000
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `"openai"` or `"mock"`.
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Answer generations per UTC day.
    #[serde(default = "default_llm_daily_limit")]
    pub daily_limit: u64,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: None,
            daily_limit: default_llm_daily_limit(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_llm_provider() -> String {
    "mock".to_string()
}
fn default_llm_daily_limit() -> u64 {
    1_000
}
fn default_llm_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Conversation messages loaded as history context.
    #[serde(default = "default_history_limit")]
    pub history_limit: i64,
    #[serde(default = "default_title_max_chars")]
    pub title_max_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            history_limit: default_history_limit(),
            title_max_chars: default_title_max_chars(),
        }
    }
}

fn default_top_k() -> usize {
    8
}
fn default_history_limit() -> i64 {
    10
}
fn default_title_max_chars() -> usize {
    60
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let config: Config =
        toml::from_str(&content).map_err(|e| Error::Config(format!("failed to parse: {e}")))?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 || config.chunking.chars_per_token == 0 {
        return Err(Error::Config(
            "chunking.max_tokens and chunking.chars_per_token must be > 0".into(),
        ));
    }
    if config.indexing.write_batch_size == 0
        || config.indexing.embed_batch_size == 0
        || config.indexing.upsert_batch_size == 0
    {
        return Err(Error::Config("indexing batch sizes must be > 0".into()));
    }
    if config.retrieval.top_k == 0 {
        return Err(Error::Config("retrieval.top_k must be >= 1".into()));
    }

    match config.embedding.provider.as_str() {
        "mock" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                return Err(Error::Config(
                    "embedding.model required for the openai provider".into(),
                ));
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                return Err(Error::Config(
                    "embedding.dims must be > 0 for the openai provider".into(),
                ));
            }
        }
        other => {
            return Err(Error::Config(format!(
                "unknown embedding provider: '{other}'. Must be openai or mock."
            )))
        }
    }

    match config.llm.provider.as_str() {
        "mock" => {}
        "openai" => {
            if config.llm.model.is_none() {
                return Err(Error::Config(
                    "llm.model required for the openai provider".into(),
                ));
            }
        }
        other => {
            return Err(Error::Config(format!(
                "unknown llm provider: '{other}'. Must be openai or mock."
            )))
        }
    }

    Ok(())
}
