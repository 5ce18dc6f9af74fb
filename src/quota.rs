//! Daily usage quotas backed by a key-value cache.
//!
//! Each capability (embedding, llm) keeps one counter per UTC calendar day,
//! keyed `"{capability}:{YYYY-MM-DD}"` with a 24-hour expiry. The counter is
//! read-then-write (last-write-wins under concurrent writers): the quota is
//! a soft cost control, not a hard correctness boundary.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

const COUNTER_TTL_SECS: i64 = 24 * 60 * 60;

/// Narrow key-value cache interface. The pipeline uses it only for quota
/// counters.
#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str, ttl_secs: i64) -> Result<()>;
}

/// Cache implementation over the `kv_cache` table. Expired entries are
/// treated as absent and overwritten in place on the next put.
pub struct SqliteKvCache {
    pool: SqlitePool,
}

impl SqliteKvCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvCache for SqliteKvCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM kv_cache WHERE key = ? AND expires_at > ?")
                .bind(key)
                .bind(Utc::now().timestamp())
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: i64) -> Result<()> {
        let expires_at = Utc::now().timestamp() + ttl_secs;
        sqlx::query(
            r#"
            INSERT INTO kv_cache (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// In-memory cache for tests and embedded use.
#[derive(Default)]
pub struct MemoryKvCache {
    entries: Mutex<HashMap<String, (String, i64)>>,
}

impl MemoryKvCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvCache for MemoryKvCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Utc::now().timestamp();
        let entries = self.entries.lock().expect("kv cache lock");
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(value, _)| value.clone()))
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: i64) -> Result<()> {
        let expires_at = Utc::now().timestamp() + ttl_secs;
        let mut entries = self.entries.lock().expect("kv cache lock");
        entries.insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }
}

/// Rolling daily counter for one capability.
#[derive(Clone)]
pub struct QuotaCounter {
    cache: Arc<dyn KvCache>,
    capability: String,
    daily_limit: u64,
}

impl QuotaCounter {
    pub fn new(cache: Arc<dyn KvCache>, capability: impl Into<String>, daily_limit: u64) -> Self {
        Self {
            cache,
            capability: capability.into(),
            daily_limit,
        }
    }

    pub fn daily_limit(&self) -> u64 {
        self.daily_limit
    }

    fn key(&self) -> String {
        format!("{}:{}", self.capability, Utc::now().format("%Y-%m-%d"))
    }

    /// Usage recorded so far today. Unparsable stored values count as zero.
    pub async fn used(&self) -> Result<u64> {
        let value = self.cache.get(&self.key()).await?;
        Ok(value.and_then(|v| v.parse::<u64>().ok()).unwrap_or(0))
    }

    /// Fail fast when the request would push today's usage over the limit.
    /// The counter is left unchanged on failure.
    pub async fn check(&self, requested: u64) -> Result<()> {
        let used = self.used().await?;
        if used + requested > self.daily_limit {
            return Err(Error::QuotaExceeded {
                capability: self.capability.clone(),
                used,
                limit: self.daily_limit,
                requested,
            });
        }
        Ok(())
    }

    /// Record completed usage. Read-then-write; see module docs.
    pub async fn record(&self, count: u64) -> Result<()> {
        let used = self.used().await?;
        self.cache
            .put(&self.key(), &(used + count).to_string(), COUNTER_TTL_SECS)
            .await
    }
}
