//! Core data models for the indexing and retrieval pipeline.
//!
//! These types mirror the relational schema in [`crate::migrate`]: a
//! [`Project`] owns [`FileRecord`]s, each file owns [`Chunk`]s, and
//! [`Conversation`]s thread query/answer [`Message`]s. Timestamps are UTC
//! epoch seconds; identifiers are UUID v4 strings.

use serde::{Deserialize, Serialize};

/// Project lifecycle status. Transitions are driven solely by the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Pending,
    Indexing,
    Ready,
    Error,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Pending => "pending",
            ProjectStatus::Indexing => "indexing",
            ProjectStatus::Ready => "ready",
            ProjectStatus::Error => "error",
        }
    }

    /// Unknown stored values fall back to `pending`.
    pub fn parse(s: &str) -> Self {
        match s {
            "indexing" => ProjectStatus::Indexing,
            "ready" => ProjectStatus::Ready,
            "error" => ProjectStatus::Error,
            _ => ProjectStatus::Pending,
        }
    }
}

/// Content classification inferred from a file's extension. Drives chunking
/// strategy and is denormalized onto vector records for filtered search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Code,
    Markdown,
    Config,
    Text,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Code => "code",
            ChunkType::Markdown => "markdown",
            ChunkType::Config => "config",
            ChunkType::Text => "text",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "code" => ChunkType::Code,
            "markdown" => ChunkType::Markdown,
            "config" => ChunkType::Config,
            _ => ChunkType::Text,
        }
    }
}

/// One logical source tree, created on first index request for its path.
#[derive(Debug, Clone)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub path: String,
    pub status: ProjectStatus,
    pub file_count: i64,
    pub last_indexed_at: Option<i64>,
    pub created_at: i64,
}

/// One indexed file. Unique per (project, relative path); the unit of
/// append-mode skip decisions.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: String,
    pub project_id: String,
    pub path: String,
    pub content_hash: String,
    pub chunk_count: i64,
    pub indexed_at: i64,
}

/// A contiguous span of a file's text. `content` reproduces exactly the
/// file lines in the inclusive `[start_line, end_line]` range.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub file_id: String,
    pub project_id: String,
    pub content: String,
    pub start_line: i64,
    pub end_line: i64,
    pub chunk_type: ChunkType,
}

/// Chunker output before identifiers are assigned. Line numbers are 1-based
/// and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub chunk_type: ChunkType,
}

/// A conversation threads query/answer exchanges, optionally project-scoped.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub project_id: Option<String>,
    pub title: String,
    pub message_count: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    /// Unknown stored values fall back to `user`.
    pub fn parse(s: &str) -> Self {
        match s {
            "assistant" => MessageRole::Assistant,
            _ => MessageRole::User,
        }
    }
}

/// Appended, never mutated. Assistant messages carry their source chunk
/// references serialized as JSON.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub sources_json: Option<String>,
    pub created_at: i64,
}

/// A pointer attached to a retrieved answer: where the supporting chunk
/// lives and how similar it was to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub chunk_id: String,
    pub file_path: String,
    pub project_name: String,
    pub start_line: i64,
    pub end_line: i64,
    pub score: f32,
}
