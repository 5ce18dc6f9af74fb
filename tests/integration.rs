use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use codectx::config::{
    ChunkingConfig, Config, DbConfig, EmbeddingConfig, IndexingConfig, LlmConfig, RetrievalConfig,
};
use codectx::db;
use codectx::digest;
use codectx::embedding::{EmbeddingClient, EmbeddingProvider, MockProvider};
use codectx::error::{Error, Result};
use codectx::indexer::{run_index, IndexOutcome, IndexRequest, SourceFile};
use codectx::llm::{LlmClient, MockLlm};
use codectx::migrate;
use codectx::models::{ProjectStatus, SourceRef};
use codectx::quota::{KvCache, MemoryKvCache, QuotaCounter, SqliteKvCache};
use codectx::retriever::{retrieve, RetrieveRequest};
use codectx::vector_store::{SqliteVectorIndex, VectorStoreManager};

struct Harness {
    _tmp: TempDir,
    pool: SqlitePool,
    config: Config,
    embedder: EmbeddingClient,
    vectors: VectorStoreManager,
    llm: LlmClient,
}

async fn setup() -> Harness {
    let tmp = TempDir::new().unwrap();
    let config = Config {
        db: DbConfig {
            path: tmp.path().join("data").join("codectx.sqlite"),
        },
        chunking: ChunkingConfig::default(),
        indexing: IndexingConfig::default(),
        embedding: EmbeddingConfig::default(),
        llm: LlmConfig::default(),
        retrieval: RetrievalConfig::default(),
    };

    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let cache: Arc<dyn KvCache> = Arc::new(SqliteKvCache::new(pool.clone()));
    let embed_quota = QuotaCounter::new(cache.clone(), "embedding", config.embedding.daily_limit);
    let embedder = EmbeddingClient::new(Box::new(MockProvider::new(16)), embed_quota);
    let vectors = VectorStoreManager::new(
        Arc::new(SqliteVectorIndex::new(pool.clone())),
        config.indexing.upsert_batch_size,
    );
    let llm_quota = QuotaCounter::new(cache, "llm", config.llm.daily_limit);
    let llm = LlmClient::new(Box::new(MockLlm), llm_quota);

    Harness {
        _tmp: tmp,
        pool,
        config,
        embedder,
        vectors,
        llm,
    }
}

fn file(path: &str, content: &str) -> SourceFile {
    SourceFile {
        path: path.to_string(),
        content: content.to_string(),
    }
}

fn request(path: &str, files: Vec<SourceFile>) -> IndexRequest {
    IndexRequest {
        path: path.to_string(),
        name: None,
        files,
        force: false,
        append: false,
    }
}

async fn count(pool: &SqlitePool, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
}

fn sample_files() -> Vec<SourceFile> {
    vec![
        file(
            "src/auth.rs",
            "fn login(user: &str) -> bool {\n    verify_token(user)\n}\n\nfn verify_token(user: &str) -> bool {\n    !user.is_empty()\n}\n",
        ),
        file(
            "docs/guide.md",
            "# Setup\ninstall the binary\n# Authentication\ntokens are verified per request\n# Deployment\nrun behind a proxy\n",
        ),
        file("config/app.toml", "[server]\nport = 8080\n"),
    ]
}

#[tokio::test]
async fn index_then_retrieve_end_to_end() {
    let h = setup().await;

    let report = run_index(
        &h.pool,
        &h.embedder,
        &h.vectors,
        &h.config,
        request("/repos/demo", sample_files()),
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, IndexOutcome::Completed);
    assert_eq!(report.status, ProjectStatus::Ready);
    assert_eq!(report.files_indexed, 3);
    assert!(report.chunks_created >= 5);
    assert_eq!(report.embed_errors, 0);
    assert_eq!(report.upsert_errors, 0);
    assert_eq!(
        count(&h.pool, "SELECT COUNT(*) FROM chunk_vectors").await,
        report.chunks_created as i64
    );

    let response = retrieve(
        &h.pool,
        &h.embedder,
        &h.vectors,
        &h.llm,
        &h.config,
        RetrieveRequest {
            query: "how does authentication work?".to_string(),
            project_id: Some(report.project_id.clone()),
            conversation_id: None,
        },
    )
    .await
    .unwrap();

    assert!(!response.answer.is_empty());
    assert!(!response.sources.is_empty());
    for source in &response.sources {
        assert_eq!(source.project_name, "demo");
        assert!(source.start_line >= 1);
        assert!(source.end_line >= source.start_line);
    }

    let message_count: i64 = sqlx::query_scalar(
        "SELECT message_count FROM conversations WHERE id = ?",
    )
    .bind(&response.conversation_id)
    .fetch_one(&h.pool)
    .await
    .unwrap();
    assert_eq!(message_count, 2);

    // The assistant message carries its sources as JSON.
    let sources_json: String = sqlx::query_scalar(
        "SELECT sources_json FROM messages WHERE conversation_id = ? AND role = 'assistant'",
    )
    .bind(&response.conversation_id)
    .fetch_one(&h.pool)
    .await
    .unwrap();
    let parsed: Vec<SourceRef> = serde_json::from_str(&sources_json).unwrap();
    assert_eq!(parsed.len(), response.sources.len());

    // Follow-up in the same conversation.
    let follow_up = retrieve(
        &h.pool,
        &h.embedder,
        &h.vectors,
        &h.llm,
        &h.config,
        RetrieveRequest {
            query: "and where are tokens verified?".to_string(),
            project_id: Some(report.project_id),
            conversation_id: Some(response.conversation_id.clone()),
        },
    )
    .await
    .unwrap();
    assert_eq!(follow_up.conversation_id, response.conversation_id);

    let message_count: i64 = sqlx::query_scalar(
        "SELECT message_count FROM conversations WHERE id = ?",
    )
    .bind(&response.conversation_id)
    .fetch_one(&h.pool)
    .await
    .unwrap();
    assert_eq!(message_count, 4);
}

#[tokio::test]
async fn markdown_files_split_on_headings() {
    let h = setup().await;
    let content = "# One\nalpha body\n# Two\nbeta body\n# Three\ngamma body";

    run_index(
        &h.pool,
        &h.embedder,
        &h.vectors,
        &h.config,
        request("/repos/md", vec![file("notes.md", content)]),
    )
    .await
    .unwrap();

    let rows: Vec<(String, i64, i64)> = sqlx::query_as(
        "SELECT content, start_line, end_line FROM chunks ORDER BY start_line",
    )
    .fetch_all(&h.pool)
    .await
    .unwrap();
    assert_eq!(rows.len(), 3);

    // Each stored chunk reproduces exactly its line range of the file.
    let lines: Vec<&str> = content.lines().collect();
    for (chunk_content, start, end) in &rows {
        let expected = lines[(*start as usize - 1)..*end as usize].join("\n");
        assert_eq!(chunk_content, &expected);
    }
    assert_eq!(rows[0].1, 1);
    assert_eq!(rows[2].2, lines.len() as i64);
}

#[tokio::test]
async fn stored_code_chunks_reproduce_file_lines() {
    let h = setup().await;
    let content: String = (0..200)
        .map(|i| {
            if i % 40 == 0 {
                format!("fn section_{i}() {{\n")
            } else {
                format!("    let v{i} = {i};\n")
            }
        })
        .collect();

    run_index(
        &h.pool,
        &h.embedder,
        &h.vectors,
        &h.config,
        request("/repos/code", vec![file("src/gen.rs", &content)]),
    )
    .await
    .unwrap();

    let rows: Vec<(String, i64, i64)> =
        sqlx::query_as("SELECT content, start_line, end_line FROM chunks ORDER BY start_line")
            .fetch_all(&h.pool)
            .await
            .unwrap();
    assert!(rows.len() > 1);

    let lines: Vec<&str> = content.lines().collect();
    for (chunk_content, start, end) in &rows {
        let expected = lines[(*start as usize - 1)..*end as usize].join("\n");
        assert_eq!(chunk_content, &expected);
    }

    // The chunks cover the file with no gaps, so skipping any overlap
    // reconstructs the original exactly.
    assert_eq!(rows[0].1, 1);
    assert_eq!(rows.last().unwrap().2, lines.len() as i64);
    let mut reconstructed: Vec<&str> = Vec::new();
    let mut covered_through = 0i64;
    for (_, start, end) in &rows {
        assert!(*start <= covered_through + 1, "gap before line {start}");
        let from = (covered_through.max(*start - 1)) as usize;
        reconstructed.extend(&lines[from..*end as usize]);
        covered_through = covered_through.max(*end);
    }
    assert_eq!(reconstructed.join("\n"), lines.join("\n"));
}

#[tokio::test]
async fn force_reindex_replaces_without_growth() {
    let h = setup().await;

    let first = run_index(
        &h.pool,
        &h.embedder,
        &h.vectors,
        &h.config,
        request("/repos/demo", sample_files()),
    )
    .await
    .unwrap();

    let mut second_request = request("/repos/demo", sample_files());
    second_request.force = true;
    let second = run_index(&h.pool, &h.embedder, &h.vectors, &h.config, second_request)
        .await
        .unwrap();

    assert_eq!(second.project_id, first.project_id);
    assert_eq!(second.outcome, IndexOutcome::Completed);
    assert_eq!(second.chunks_created, first.chunks_created);

    assert_eq!(count(&h.pool, "SELECT COUNT(*) FROM projects").await, 1);
    assert_eq!(count(&h.pool, "SELECT COUNT(*) FROM files").await, 3);
    assert_eq!(
        count(&h.pool, "SELECT COUNT(*) FROM chunks").await,
        first.chunks_created as i64
    );
    assert_eq!(
        count(&h.pool, "SELECT COUNT(*) FROM chunk_vectors").await,
        first.chunks_created as i64
    );

    let (status, file_count): (String, i64) =
        sqlx::query_as("SELECT status, file_count FROM projects WHERE id = ?")
            .bind(&first.project_id)
            .fetch_one(&h.pool)
            .await
            .unwrap();
    assert_eq!(status, "ready");
    assert_eq!(file_count, 3);
}

#[tokio::test]
async fn append_skips_existing_paths_even_with_changed_content() {
    let h = setup().await;

    let original_b = "export const b = 1;\n";
    run_index(
        &h.pool,
        &h.embedder,
        &h.vectors,
        &h.config,
        request(
            "/repos/app",
            vec![file("a.rs", "fn a() {}\n"), file("b.ts", original_b)],
        ),
    )
    .await
    .unwrap();

    let mut append_request = request(
        "/repos/app",
        vec![
            file("b.ts", "export const b = 999; // changed\n"),
            file("c.py", "def c():\n    pass\n"),
        ],
    );
    append_request.append = true;
    let report = run_index(&h.pool, &h.embedder, &h.vectors, &h.config, append_request)
        .await
        .unwrap();

    assert_eq!(report.outcome, IndexOutcome::Completed);
    assert_eq!(report.files_indexed, 1);
    assert_eq!(count(&h.pool, "SELECT COUNT(*) FROM files").await, 3);

    // Dedup is by path: the changed b.ts was not re-indexed.
    let stored_hash: String =
        sqlx::query_scalar("SELECT content_hash FROM files WHERE path = 'b.ts'")
            .fetch_one(&h.pool)
            .await
            .unwrap();
    assert_eq!(stored_hash, digest::content_hash(original_b));

    let (status, file_count): (String, i64) =
        sqlx::query_as("SELECT status, file_count FROM projects WHERE id = ?")
            .bind(&report.project_id)
            .fetch_one(&h.pool)
            .await
            .unwrap();
    assert_eq!(status, "ready");
    assert_eq!(file_count, 3);
}

#[tokio::test]
async fn append_with_no_new_files_still_finishes_ready() {
    let h = setup().await;

    run_index(
        &h.pool,
        &h.embedder,
        &h.vectors,
        &h.config,
        request("/repos/app", vec![file("a.rs", "fn a() {}\n")]),
    )
    .await
    .unwrap();

    let mut append_request = request("/repos/app", vec![file("a.rs", "fn a() { changed() }\n")]);
    append_request.append = true;
    let report = run_index(&h.pool, &h.embedder, &h.vectors, &h.config, append_request)
        .await
        .unwrap();

    assert_eq!(report.outcome, IndexOutcome::NoNewFiles);
    assert_eq!(report.status, ProjectStatus::Ready);
    assert_eq!(report.files_indexed, 0);
    assert_eq!(report.chunks_created, 0);

    let status: String = sqlx::query_scalar("SELECT status FROM projects WHERE id = ?")
        .bind(&report.project_id)
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert_eq!(status, "ready");
}

#[tokio::test]
async fn recently_indexed_project_is_skipped_without_flags() {
    let h = setup().await;

    let first = run_index(
        &h.pool,
        &h.embedder,
        &h.vectors,
        &h.config,
        request("/repos/app", vec![file("a.rs", "fn a() {}\n")]),
    )
    .await
    .unwrap();

    let second = run_index(
        &h.pool,
        &h.embedder,
        &h.vectors,
        &h.config,
        request("/repos/app", vec![file("a.rs", "fn a() {}\n")]),
    )
    .await
    .unwrap();

    assert_eq!(second.project_id, first.project_id);
    assert_eq!(second.outcome, IndexOutcome::RecentlyIndexed);
    assert_eq!(second.files_indexed, 0);
    assert_eq!(
        count(&h.pool, "SELECT COUNT(*) FROM chunks").await,
        first.chunks_created as i64
    );
}

#[tokio::test]
async fn ineligible_files_are_filtered_out() {
    let h = setup().await;

    let report = run_index(
        &h.pool,
        &h.embedder,
        &h.vectors,
        &h.config,
        request(
            "/repos/mixed",
            vec![
                file("src/ok.rs", "fn ok() {}\n"),
                file("node_modules/dep/index.js", "module.exports = {};\n"),
                file("logo.png", "not really an image\n"),
                file("package-lock.json", "{}\n"),
            ],
        ),
    )
    .await
    .unwrap();

    assert_eq!(report.files_indexed, 1);
    let paths: Vec<String> = sqlx::query_scalar("SELECT path FROM files")
        .fetch_all(&h.pool)
        .await
        .unwrap();
    assert_eq!(paths, vec!["src/ok.rs".to_string()]);
}

struct CountingProvider {
    calls: Arc<AtomicUsize>,
    dims: usize,
}

#[async_trait]
impl EmbeddingProvider for CountingProvider {
    fn model_name(&self) -> &str {
        "counting"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|_| vec![0.0; self.dims]).collect())
    }
}

#[tokio::test]
async fn quota_rejection_skips_batch_without_provider_call() {
    let h = setup().await;

    let calls = Arc::new(AtomicUsize::new(0));
    let quota = QuotaCounter::new(Arc::new(MemoryKvCache::new()), "embedding", 10);
    quota.record(8).await.unwrap();
    let embedder = EmbeddingClient::new(
        Box::new(CountingProvider {
            calls: calls.clone(),
            dims: 16,
        }),
        quota.clone(),
    );

    // Five eligible files, one chunk each: a single embed batch of five,
    // which would push usage to 13 against a limit of 10.
    let files: Vec<SourceFile> = (0..5)
        .map(|i| file(&format!("src/f{i}.rs"), &format!("fn f{i}() {{}}\n")))
        .collect();
    let report = run_index(
        &h.pool,
        &h.embedder,
        &h.vectors,
        &h.config,
        request("/repos/warmup", vec![file("src/seed.rs", "fn seed() {}\n")]),
    )
    .await
    .unwrap();
    assert_eq!(report.status, ProjectStatus::Ready);

    let report = run_index(
        &h.pool,
        &embedder,
        &h.vectors,
        &h.config,
        request("/repos/quota", files),
    )
    .await
    .unwrap();

    assert_eq!(report.outcome, IndexOutcome::Completed);
    assert_eq!(report.status, ProjectStatus::Error);
    assert_eq!(report.files_indexed, 5);
    assert_eq!(report.embed_errors, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(quota.used().await.unwrap(), 8);

    // Chunks were persisted; vectors were not.
    assert_eq!(count(&h.pool, "SELECT COUNT(*) FROM chunks").await, 6);
    assert_eq!(
        count(
            &h.pool,
            "SELECT COUNT(*) FROM chunk_vectors cv \
             JOIN chunks c ON c.id = cv.chunk_id \
             JOIN projects p ON p.id = c.project_id \
             WHERE p.path = '/repos/quota'",
        )
        .await,
        0
    );
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let h = setup().await;
    let err = retrieve(
        &h.pool,
        &h.embedder,
        &h.vectors,
        &h.llm,
        &h.config,
        RetrieveRequest {
            query: "   ".to_string(),
            project_id: None,
            conversation_id: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn no_matches_creates_shell_conversation_without_messages() {
    let h = setup().await;

    let response = retrieve(
        &h.pool,
        &h.embedder,
        &h.vectors,
        &h.llm,
        &h.config,
        RetrieveRequest {
            query: "anything at all".to_string(),
            project_id: None,
            conversation_id: None,
        },
    )
    .await
    .unwrap();

    assert!(response.answer.contains("No relevant context"));
    assert!(response.sources.is_empty());

    let message_count: i64 =
        sqlx::query_scalar("SELECT message_count FROM conversations WHERE id = ?")
            .bind(&response.conversation_id)
            .fetch_one(&h.pool)
            .await
            .unwrap();
    assert_eq!(message_count, 0);
    assert_eq!(count(&h.pool, "SELECT COUNT(*) FROM messages").await, 0);
}

#[tokio::test]
async fn unknown_conversation_is_not_found() {
    let h = setup().await;

    run_index(
        &h.pool,
        &h.embedder,
        &h.vectors,
        &h.config,
        request("/repos/demo", sample_files()),
    )
    .await
    .unwrap();

    let err = retrieve(
        &h.pool,
        &h.embedder,
        &h.vectors,
        &h.llm,
        &h.config,
        RetrieveRequest {
            query: "anything".to_string(),
            project_id: None,
            conversation_id: Some("no-such-conversation".to_string()),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}
