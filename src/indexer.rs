//! Indexing pipeline orchestration.
//!
//! Coordinates the full flow for one request: eligibility filtering →
//! chunking → file/chunk persistence → batch embedding → vector upsert →
//! project status transition. Three modes: full (new project, `force`, or a
//! stale project with no flags), append (skip paths already present), and a
//! cooldown short-circuit (no flags, indexed within the last hour).
//!
//! Embedding and upsert batch failures are counted, not raised: processing
//! continues and the final project status reflects whether any occurred.
//! The caller supplies file contents; this module never reads a filesystem.
//!
//! Concurrent requests for one project can race the cooldown and append
//! checks (read-then-act, no locking) — an accepted limitation. A crash
//! mid-run leaves the project at `indexing`; recovery is a `force` re-index.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunker;
use crate::config::Config;
use crate::digest;
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::models::{Chunk, FileRecord, Project, ProjectStatus};
use crate::vector_store::{VectorRecord, VectorStoreManager};

/// One (relative path, content) pair supplied by the caller.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct IndexRequest {
    /// Unique source path identifying the project.
    pub path: String,
    /// Display name; defaults to the last path segment.
    pub name: Option<String>,
    pub files: Vec<SourceFile>,
    /// Delete and regenerate everything for the project.
    pub force: bool,
    /// Add only files whose path is not already present. Path identity
    /// only: an already-present file with changed content is skipped.
    pub append: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Completed,
    /// Indexed within the cooldown window; nothing was done.
    RecentlyIndexed,
    /// Append mode with every incoming path already present.
    NoNewFiles,
}

#[derive(Debug, Clone)]
pub struct IndexReport {
    pub project_id: String,
    pub outcome: IndexOutcome,
    pub status: ProjectStatus,
    pub files_indexed: usize,
    pub chunks_created: usize,
    pub embed_errors: usize,
    pub upsert_errors: usize,
}

const INDEXABLE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "jsx", "ts", "tsx", "go", "java", "c", "h", "cc", "cpp", "hpp", "cs", "rb",
    "php", "swift", "kt", "scala", "sh", "sql", "md", "markdown", "json", "yaml", "yml", "toml",
    "ini", "cfg", "conf", "txt", "html", "css",
];

const EXCLUDED_SEGMENTS: &[&str] = &[
    "node_modules",
    "target",
    "dist",
    "build",
    "out",
    ".git",
    ".svn",
    ".hg",
    "vendor",
    "__pycache__",
    ".venv",
    "venv",
    ".next",
    "coverage",
];

const LOCK_FILES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Cargo.lock",
    "poetry.lock",
    "Pipfile.lock",
    "Gemfile.lock",
    "composer.lock",
    "go.sum",
];

/// Eligibility filter: allow-listed extension, not under an excluded
/// directory, not a lock file.
pub fn should_index(path: &str) -> bool {
    let normalized = path.replace('\\', "/");
    if normalized
        .split('/')
        .any(|segment| EXCLUDED_SEGMENTS.contains(&segment))
    {
        return false;
    }

    let file_name = normalized.rsplit('/').next().unwrap_or(&normalized);
    if LOCK_FILES.contains(&file_name) {
        return false;
    }

    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            INDEXABLE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        }
        _ => false,
    }
}

/// Run one indexing request end to end.
pub async fn run_index(
    pool: &SqlitePool,
    embedder: &EmbeddingClient,
    vectors: &VectorStoreManager,
    config: &Config,
    request: IndexRequest,
) -> Result<IndexReport> {
    if request.path.trim().is_empty() {
        return Err(Error::Validation("project path must not be empty".into()));
    }

    let now = Utc::now().timestamp();
    let existing = fetch_project_by_path(pool, &request.path).await?;

    let mut append = false;
    let project = match existing {
        None => {
            let name = request
                .name
                .clone()
                .unwrap_or_else(|| derive_name(&request.path));
            create_project(pool, &request.path, &name, now).await?
        }
        Some(project) => {
            if request.force {
                wipe_project(pool, vectors, &project.id).await?;
            } else if request.append {
                append = true;
            } else {
                if let Some(last) = project.last_indexed_at {
                    if now - last < config.indexing.reindex_cooldown_secs {
                        return Ok(IndexReport {
                            project_id: project.id,
                            outcome: IndexOutcome::RecentlyIndexed,
                            status: project.status,
                            files_indexed: 0,
                            chunks_created: 0,
                            embed_errors: 0,
                            upsert_errors: 0,
                        });
                    }
                }
                // Stale with no flags: full re-index.
                wipe_project(pool, vectors, &project.id).await?;
            }
            set_status(pool, &project.id, ProjectStatus::Indexing).await?;
            project
        }
    };

    let mut files: Vec<SourceFile> = request
        .files
        .into_iter()
        .filter(|f| should_index(&f.path))
        .collect();

    if append {
        let existing_paths: HashSet<String> =
            sqlx::query_scalar("SELECT path FROM files WHERE project_id = ?")
                .bind(&project.id)
                .fetch_all(pool)
                .await?
                .into_iter()
                .collect();
        files.retain(|f| !existing_paths.contains(&f.path));

        if files.is_empty() {
            finalize(pool, &project.id, ProjectStatus::Ready, FileCount::Increment(0), now).await?;
            return Ok(IndexReport {
                project_id: project.id,
                outcome: IndexOutcome::NoNewFiles,
                status: ProjectStatus::Ready,
                files_indexed: 0,
                chunks_created: 0,
                embed_errors: 0,
                upsert_errors: 0,
            });
        }
    }

    // Chunk everything before touching storage.
    let mut file_rows: Vec<FileRecord> = Vec::with_capacity(files.len());
    let mut chunk_rows: Vec<Chunk> = Vec::new();
    let mut paths_by_file: HashMap<String, String> = HashMap::new();

    for file in &files {
        let file_id = Uuid::new_v4().to_string();
        let spans = chunker::chunk(&file.content, &file.path, &config.chunking);
        debug!(path = %file.path, chunks = spans.len(), "chunked file");

        file_rows.push(FileRecord {
            id: file_id.clone(),
            project_id: project.id.clone(),
            path: file.path.clone(),
            content_hash: digest::content_hash(&file.content),
            chunk_count: spans.len() as i64,
            indexed_at: now,
        });
        paths_by_file.insert(file_id.clone(), file.path.clone());

        for span in spans {
            chunk_rows.push(Chunk {
                id: Uuid::new_v4().to_string(),
                file_id: file_id.clone(),
                project_id: project.id.clone(),
                content: span.content,
                start_line: span.start_line as i64,
                end_line: span.end_line as i64,
                chunk_type: span.chunk_type,
            });
        }
    }

    persist_files(pool, &file_rows, config.indexing.write_batch_size).await?;
    persist_chunks(pool, &chunk_rows, config.indexing.write_batch_size).await?;

    // Embed in batches; a failed batch is skipped and counted.
    let mut embed_errors = 0usize;
    let mut records: Vec<VectorRecord> = Vec::with_capacity(chunk_rows.len());

    for batch in chunk_rows.chunks(config.indexing.embed_batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        match embedder.embed(&texts).await {
            Ok(embeddings) => {
                for (chunk, embedding) in batch.iter().zip(embeddings) {
                    let file_path = paths_by_file
                        .get(&chunk.file_id)
                        .cloned()
                        .unwrap_or_default();
                    records.push(VectorRecord {
                        chunk_id: chunk.id.clone(),
                        project_id: project.id.clone(),
                        file_type: chunker::classify_path(&file_path),
                        file_path,
                        start_line: chunk.start_line,
                        end_line: chunk.end_line,
                        embedding,
                    });
                }
            }
            Err(e) => {
                warn!(batch_len = batch.len(), error = %e, "embedding batch failed; skipping");
                embed_errors += 1;
            }
        }
    }

    let upsert = vectors.upsert(&records).await?;

    let status = if embed_errors == 0 && upsert.errors == 0 {
        ProjectStatus::Ready
    } else {
        ProjectStatus::Error
    };
    let file_count = if append {
        FileCount::Increment(files.len() as i64)
    } else {
        FileCount::Replace(files.len() as i64)
    };
    finalize(pool, &project.id, status, file_count, now).await?;

    info!(
        project_id = %project.id,
        files = files.len(),
        chunks = chunk_rows.len(),
        embed_errors,
        upsert_errors = upsert.errors,
        "indexing complete"
    );

    Ok(IndexReport {
        project_id: project.id,
        outcome: IndexOutcome::Completed,
        status,
        files_indexed: files.len(),
        chunks_created: chunk_rows.len(),
        embed_errors,
        upsert_errors: upsert.errors,
    })
}

fn derive_name(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .rev()
        .find(|s| !s.is_empty())
        .unwrap_or("project")
        .to_string()
}

async fn fetch_project_by_path(pool: &SqlitePool, path: &str) -> Result<Option<Project>> {
    let row = sqlx::query(
        "SELECT id, name, path, status, file_count, last_indexed_at, created_at \
         FROM projects WHERE path = ?",
    )
    .bind(path)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| {
        let status: String = row.get("status");
        Project {
            id: row.get("id"),
            name: row.get("name"),
            path: row.get("path"),
            status: ProjectStatus::parse(&status),
            file_count: row.get("file_count"),
            last_indexed_at: row.get("last_indexed_at"),
            created_at: row.get("created_at"),
        }
    }))
}

async fn create_project(
    pool: &SqlitePool,
    path: &str,
    name: &str,
    now: i64,
) -> Result<Project> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO projects (id, name, path, status, file_count, created_at) \
         VALUES (?, ?, ?, ?, 0, ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(path)
    .bind(ProjectStatus::Indexing.as_str())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(Project {
        id,
        name: name.to_string(),
        path: path.to_string(),
        status: ProjectStatus::Indexing,
        file_count: 0,
        last_indexed_at: None,
        created_at: now,
    })
}

async fn set_status(pool: &SqlitePool, project_id: &str, status: ProjectStatus) -> Result<()> {
    sqlx::query("UPDATE projects SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(project_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Full-reindex cleanup. Vectors are deleted first because their ids are
/// resolved from the chunks table; deleting files cascades to chunks.
async fn wipe_project(
    pool: &SqlitePool,
    vectors: &VectorStoreManager,
    project_id: &str,
) -> Result<()> {
    vectors.delete_by_project(pool, project_id).await?;
    sqlx::query("DELETE FROM files WHERE project_id = ?")
        .bind(project_id)
        .execute(pool)
        .await?;
    sqlx::query("UPDATE projects SET file_count = 0 WHERE id = ?")
        .bind(project_id)
        .execute(pool)
        .await?;
    Ok(())
}

enum FileCount {
    Replace(i64),
    Increment(i64),
}

async fn finalize(
    pool: &SqlitePool,
    project_id: &str,
    status: ProjectStatus,
    file_count: FileCount,
    now: i64,
) -> Result<()> {
    match file_count {
        FileCount::Replace(count) => {
            sqlx::query(
                "UPDATE projects SET status = ?, file_count = ?, last_indexed_at = ? WHERE id = ?",
            )
            .bind(status.as_str())
            .bind(count)
            .bind(now)
            .bind(project_id)
            .execute(pool)
            .await?;
        }
        FileCount::Increment(count) => {
            sqlx::query(
                "UPDATE projects SET status = ?, file_count = file_count + ?, last_indexed_at = ? \
                 WHERE id = ?",
            )
            .bind(status.as_str())
            .bind(count)
            .bind(now)
            .bind(project_id)
            .execute(pool)
            .await?;
        }
    }
    Ok(())
}

/// Persist file rows in transactions of at most `batch_size` statements.
async fn persist_files(pool: &SqlitePool, rows: &[FileRecord], batch_size: usize) -> Result<()> {
    for batch in rows.chunks(batch_size.max(1)) {
        let mut tx = pool.begin().await?;
        for row in batch {
            sqlx::query(
                "INSERT INTO files (id, project_id, path, content_hash, chunk_count, indexed_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&row.id)
            .bind(&row.project_id)
            .bind(&row.path)
            .bind(&row.content_hash)
            .bind(row.chunk_count)
            .bind(row.indexed_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
    }
    Ok(())
}

async fn persist_chunks(pool: &SqlitePool, rows: &[Chunk], batch_size: usize) -> Result<()> {
    for batch in rows.chunks(batch_size.max(1)) {
        let mut tx = pool.begin().await?;
        for row in batch {
            sqlx::query(
                "INSERT INTO chunks (id, file_id, project_id, content, start_line, end_line, chunk_type) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&row.id)
            .bind(&row.file_id)
            .bind(&row.project_id)
            .bind(&row.content)
            .bind(row.start_line)
            .bind(row.end_line)
            .bind(row.chunk_type.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
    }
    Ok(())
}
