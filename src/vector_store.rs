//! Vector index interface and batch-oriented manager.
//!
//! [`VectorIndex`] is the narrow contract to the similarity-search service:
//! upsert-by-id, filtered top-K query, delete-by-id. [`SqliteVectorIndex`]
//! implements it over the `chunk_vectors` table with cosine similarity
//! computed in process.
//!
//! [`VectorStoreManager`] layers batching and partial-failure accounting on
//! top: upserts run in fixed-size batches and a failing batch is counted
//! rather than aborting the rest (retried upserts overwrite by id, so the
//! operation is idempotent per record). Deletion is best-effort — a failing
//! delete batch is logged and skipped, which can leave orphaned vectors.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::warn;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::Result;
use crate::models::ChunkType;

/// One embedded chunk with the denormalized metadata used for filtering.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub chunk_id: String,
    pub project_id: String,
    pub file_path: String,
    pub file_type: ChunkType,
    pub start_line: i64,
    pub end_line: i64,
    pub embedding: Vec<f32>,
}

/// A ranked query hit.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub chunk_id: String,
    pub score: f32,
    pub project_id: String,
    pub file_path: String,
    pub file_type: ChunkType,
    pub start_line: i64,
    pub end_line: i64,
}

/// Equality filters over denormalized metadata.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub project_id: Option<String>,
    pub file_type: Option<ChunkType>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted: usize,
    pub errors: usize,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite records by chunk id. All-or-nothing per call.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    /// Top-K matches by descending similarity. Tie order is unspecified.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<VectorMatch>>;

    /// Delete records by chunk id. Missing ids are not an error.
    async fn delete(&self, chunk_ids: &[String]) -> Result<()>;
}

// ============ SQLite implementation ============

pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO chunk_vectors
                    (chunk_id, project_id, file_path, file_type, start_line, end_line, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    project_id = excluded.project_id,
                    file_path = excluded.file_path,
                    file_type = excluded.file_type,
                    start_line = excluded.start_line,
                    end_line = excluded.end_line,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&record.chunk_id)
            .bind(&record.project_id)
            .bind(&record.file_path)
            .bind(record.file_type.as_str())
            .bind(record.start_line)
            .bind(record.end_line)
            .bind(vec_to_blob(&record.embedding))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<VectorMatch>> {
        let mut sql = String::from(
            "SELECT chunk_id, project_id, file_path, file_type, start_line, end_line, embedding \
             FROM chunk_vectors WHERE 1 = 1",
        );
        if filter.project_id.is_some() {
            sql.push_str(" AND project_id = ?");
        }
        if filter.file_type.is_some() {
            sql.push_str(" AND file_type = ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(ref project_id) = filter.project_id {
            query = query.bind(project_id);
        }
        if let Some(file_type) = filter.file_type {
            query = query.bind(file_type.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;

        let mut matches: Vec<VectorMatch> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let embedding = blob_to_vec(&blob);
                let file_type: String = row.get("file_type");
                VectorMatch {
                    chunk_id: row.get("chunk_id"),
                    score: cosine_similarity(vector, &embedding),
                    project_id: row.get("project_id"),
                    file_path: row.get("file_path"),
                    file_type: ChunkType::parse(&file_type),
                    start_line: row.get("start_line"),
                    end_line: row.get("end_line"),
                }
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, chunk_ids: &[String]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let placeholders = vec!["?"; chunk_ids.len()].join(", ");
        let sql = format!("DELETE FROM chunk_vectors WHERE chunk_id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in chunk_ids {
            query = query.bind(id);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }
}

// ============ Batch manager ============

pub struct VectorStoreManager {
    index: Arc<dyn VectorIndex>,
    batch_size: usize,
}

impl VectorStoreManager {
    pub fn new(index: Arc<dyn VectorIndex>, batch_size: usize) -> Self {
        Self {
            index,
            batch_size: batch_size.max(1),
        }
    }

    /// Upsert in batches. A failing batch counts entirely as errors but does
    /// not abort subsequent batches.
    pub async fn upsert(&self, records: &[VectorRecord]) -> Result<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();
        for batch in records.chunks(self.batch_size) {
            match self.index.upsert(batch).await {
                Ok(()) => outcome.inserted += batch.len(),
                Err(e) => {
                    warn!(batch_len = batch.len(), error = %e, "vector upsert batch failed");
                    outcome.errors += batch.len();
                }
            }
        }
        Ok(outcome)
    }

    pub async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<VectorMatch>> {
        self.index.query(vector, top_k, filter).await
    }

    /// Delete every vector belonging to a project. Chunk ids are resolved
    /// from the relational store first, then deleted in batches; a failing
    /// batch is logged and skipped (orphaned vectors are possible).
    pub async fn delete_by_project(&self, pool: &SqlitePool, project_id: &str) -> Result<()> {
        let chunk_ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM chunks WHERE project_id = ?")
                .bind(project_id)
                .fetch_all(pool)
                .await?;

        for batch in chunk_ids.chunks(self.batch_size) {
            if let Err(e) = self.index.delete(batch).await {
                warn!(batch_len = batch.len(), error = %e, "vector delete batch failed; vectors orphaned");
            }
        }
        Ok(())
    }
}
