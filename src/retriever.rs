//! Query-time retrieval with conversation continuity.
//!
//! One call runs the full answer path: embed the query, similarity-search
//! the vector index, hydrate the matched chunks from the relational store,
//! assemble a prompt with recent conversation history, generate an answer,
//! and persist both sides of the exchange atomically.
//!
//! A query with no matches still yields a conversation (created as an empty
//! shell when the caller did not supply one) but writes no messages and
//! makes no LLM call.

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::llm::LlmClient;
use crate::models::{Conversation, Message, MessageRole, SourceRef};
use crate::vector_store::{QueryFilter, VectorStoreManager};

const NO_CONTEXT_ANSWER: &str =
    "No relevant context was found for this query. Try indexing the project first or rephrasing.";

#[derive(Debug, Clone)]
pub struct RetrieveRequest {
    pub query: String,
    /// Restrict the search to one project.
    pub project_id: Option<String>,
    /// Continue an existing conversation; a new one is created when absent.
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RetrieveResponse {
    pub conversation_id: String,
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

/// Answer one query end to end.
pub async fn retrieve(
    pool: &SqlitePool,
    embedder: &EmbeddingClient,
    vectors: &VectorStoreManager,
    llm: &LlmClient,
    config: &Config,
    request: RetrieveRequest,
) -> Result<RetrieveResponse> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err(Error::Validation("query must not be empty".into()));
    }

    let existing = match &request.conversation_id {
        Some(id) => Some(fetch_conversation(pool, id).await?),
        None => None,
    };

    let query_vector = embedder.embed_query(query).await?;
    let filter = QueryFilter {
        project_id: request.project_id.clone(),
        file_type: None,
    };
    let matches = vectors
        .query(&query_vector, config.retrieval.top_k, &filter)
        .await?;
    debug!(matches = matches.len(), "vector query complete");

    if matches.is_empty() {
        let conversation = match existing {
            Some(c) => c,
            None => {
                create_conversation(pool, request.project_id.as_deref(), query, config).await?
            }
        };
        return Ok(RetrieveResponse {
            conversation_id: conversation.id,
            answer: NO_CONTEXT_ANSWER.to_string(),
            sources: Vec::new(),
        });
    }

    // Hydrate content in one query, then restore ranking order. Matches
    // whose chunk row is gone (orphaned vectors) are dropped.
    let chunk_ids: Vec<String> = matches.iter().map(|m| m.chunk_id.clone()).collect();
    let hydrated = hydrate_chunks(pool, &chunk_ids).await?;

    let mut sources: Vec<SourceRef> = Vec::new();
    let mut context_blocks: Vec<String> = Vec::new();
    for m in &matches {
        let Some(chunk) = hydrated.get(&m.chunk_id) else {
            continue;
        };
        context_blocks.push(format!(
            "[{}] {} lines {}-{} ({}):\n{}",
            sources.len() + 1,
            chunk.file_path,
            m.start_line,
            m.end_line,
            chunk.project_name,
            chunk.content
        ));
        sources.push(SourceRef {
            chunk_id: m.chunk_id.clone(),
            file_path: chunk.file_path.clone(),
            project_name: chunk.project_name.clone(),
            start_line: m.start_line,
            end_line: m.end_line,
            score: m.score,
        });
    }

    let conversation = match existing {
        Some(c) => c,
        None => create_conversation(pool, request.project_id.as_deref(), query, config).await?,
    };
    let history = fetch_history(pool, &conversation.id, config.retrieval.history_limit).await?;

    let prompt = build_prompt(query, &context_blocks, &history);
    let answer = llm.generate(&prompt).await?;

    persist_exchange(pool, &conversation.id, query, &answer, &sources).await?;

    Ok(RetrieveResponse {
        conversation_id: conversation.id,
        answer,
        sources,
    })
}

struct HydratedChunk {
    content: String,
    file_path: String,
    project_name: String,
}

async fn fetch_conversation(pool: &SqlitePool, id: &str) -> Result<Conversation> {
    let row = sqlx::query(
        "SELECT id, project_id, title, message_count, created_at FROM conversations WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("conversation {id} not found")))?;

    Ok(Conversation {
        id: row.get("id"),
        project_id: row.get("project_id"),
        title: row.get("title"),
        message_count: row.get("message_count"),
        created_at: row.get("created_at"),
    })
}

async fn create_conversation(
    pool: &SqlitePool,
    project_id: Option<&str>,
    query: &str,
    config: &Config,
) -> Result<Conversation> {
    let id = Uuid::new_v4().to_string();
    let title = truncate_title(query, config.retrieval.title_max_chars);
    let now = Utc::now().timestamp();

    sqlx::query(
        "INSERT INTO conversations (id, project_id, title, message_count, created_at) \
         VALUES (?, ?, ?, 0, ?)",
    )
    .bind(&id)
    .bind(project_id)
    .bind(&title)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(Conversation {
        id,
        project_id: project_id.map(|p| p.to_string()),
        title,
        message_count: 0,
        created_at: now,
    })
}

/// The conversation title is the first query, truncated on a character
/// boundary.
fn truncate_title(query: &str, max_chars: usize) -> String {
    if query.chars().count() <= max_chars {
        return query.to_string();
    }
    query.chars().take(max_chars).collect()
}

async fn hydrate_chunks(
    pool: &SqlitePool,
    chunk_ids: &[String],
) -> Result<HashMap<String, HydratedChunk>> {
    if chunk_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let placeholders = vec!["?"; chunk_ids.len()].join(", ");
    let sql = format!(
        "SELECT c.id, c.content, f.path, p.name \
         FROM chunks c \
         JOIN files f ON c.file_id = f.id \
         JOIN projects p ON c.project_id = p.id \
         WHERE c.id IN ({placeholders})"
    );
    let mut query = sqlx::query(&sql);
    for id in chunk_ids {
        query = query.bind(id);
    }
    let rows = query.fetch_all(pool).await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let id: String = row.get("id");
            (
                id,
                HydratedChunk {
                    content: row.get("content"),
                    file_path: row.get("path"),
                    project_name: row.get("name"),
                },
            )
        })
        .collect())
}

/// Most recent messages in chronological order. `rowid` breaks ties between
/// messages written in the same second.
async fn fetch_history(
    pool: &SqlitePool,
    conversation_id: &str,
    limit: i64,
) -> Result<Vec<Message>> {
    let rows = sqlx::query(
        "SELECT id, conversation_id, role, content, sources_json, created_at \
         FROM messages WHERE conversation_id = ? \
         ORDER BY created_at DESC, rowid DESC LIMIT ?",
    )
    .bind(conversation_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut history: Vec<Message> = rows
        .into_iter()
        .map(|row| {
            let role: String = row.get("role");
            Message {
                id: row.get("id"),
                conversation_id: row.get("conversation_id"),
                role: MessageRole::parse(&role),
                content: row.get("content"),
                sources_json: row.get("sources_json"),
                created_at: row.get("created_at"),
            }
        })
        .collect();
    history.reverse();
    Ok(history)
}

fn build_prompt(query: &str, context_blocks: &[String], history: &[Message]) -> String {
    let mut prompt = String::from(
        "You are answering questions about an indexed codebase. \
         Base your answer only on the context below and cite file paths.\n\nContext:\n",
    );
    for block in context_blocks {
        prompt.push_str(block);
        prompt.push_str("\n\n");
    }
    if !history.is_empty() {
        prompt.push_str("Conversation so far:\n");
        for entry in history {
            prompt.push_str(entry.role.as_str());
            prompt.push_str(": ");
            prompt.push_str(&entry.content);
            prompt.push('\n');
        }
        prompt.push('\n');
    }
    prompt.push_str("Question: ");
    prompt.push_str(query);
    prompt
}

/// Write the user message, the assistant message with its sources, and the
/// conversation counter bump in one transaction.
async fn persist_exchange(
    pool: &SqlitePool,
    conversation_id: &str,
    query: &str,
    answer: &str,
    sources: &[SourceRef],
) -> Result<()> {
    let now = Utc::now().timestamp();
    let sources_json = serde_json::to_string(sources)
        .map_err(|e| Error::Validation(format!("failed to serialize sources: {e}")))?;

    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO messages (id, conversation_id, role, content, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(conversation_id)
    .bind(MessageRole::User.as_str())
    .bind(query)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO messages (id, conversation_id, role, content, sources_json, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(conversation_id)
    .bind(MessageRole::Assistant.as_str())
    .bind(answer)
    .bind(&sources_json)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE conversations SET message_count = message_count + 2 WHERE id = ?")
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}
