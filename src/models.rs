//! Core data models used throughout docq.
//!
//! These types represent the documents, text segments, chunks, and responses
//! that flow through the ingestion and retrieval pipeline. Response types
//! derive `Serialize` because they go straight onto the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An uploaded document's metadata row.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub id: String,
    /// Original filename as uploaded, used in citations.
    pub display_name: String,
    /// Name of the file on disk under the upload directory.
    pub stored_filename: String,
    pub content_type: String,
    pub byte_size: i64,
    pub created_at: DateTime<Utc>,
    /// SHA-256 of the file content.
    pub dedup_hash: String,
}

/// A contiguous run of extracted text with optional source location.
///
/// PDF extraction yields one segment per physical page; plain text and DOCX
/// yield a single segment with no page.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSegment {
    pub text: String,
    /// 1-based page number, when the source format has pages.
    pub source_page: Option<u32>,
}

impl TextSegment {
    pub fn new(text: impl Into<String>, source_page: Option<u32>) -> Self {
        Self {
            text: text.into(),
            source_page,
        }
    }
}

/// A chunk of document text ready for embedding and indexing.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub document_name: String,
    pub text: String,
    pub source_page: Option<u32>,
    /// Position of this chunk within the document, starting at 0.
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub created_at: DateTime<Utc>,
    /// Set by the pipeline after the embedding stage.
    pub embedding: Option<Vec<f32>>,
}

/// Structured metadata stored alongside each index entry.
///
/// Fixed fields cover everything retrieval needs; `extra` is a small escape
/// hatch for data the schema does not model.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub document_name: String,
    pub source_page: Option<u32>,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// A scored chunk returned from the vector index.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub text: String,
    /// Cosine similarity, higher is better.
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// Outcome of a batched index insert.
#[derive(Debug, Clone)]
pub struct InsertSummary {
    pub inserted: usize,
    pub collection_total: i64,
}

/// Index shape and size, for `stats` and the health surface.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub collection: String,
    pub model: String,
    pub dims: usize,
    pub entries: i64,
    pub documents: i64,
}

/// A single retrieved source in a question answer.
#[derive(Debug, Clone, Serialize)]
pub struct SourceChunk {
    pub document_name: String,
    pub page: Option<u32>,
    pub section: usize,
    pub text: String,
    pub score: f32,
}

/// Answer to a question over the indexed documents.
#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub query: String,
    pub sources: Vec<SourceChunk>,
    /// Deduplicated, order-preserving citation strings.
    pub citations: Vec<String>,
    pub retrieved_documents: usize,
    /// Word count of the context handed to the language model.
    pub context_words: usize,
    pub timestamp: DateTime<Utc>,
}

/// Ranked semantic search result.
#[derive(Debug, Clone, Serialize)]
pub struct RankedHit {
    pub rank: usize,
    pub document_name: String,
    pub page: Option<u32>,
    pub section: usize,
    pub text: String,
    pub score: f32,
}

/// Document summary produced by the retriever.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryResponse {
    pub document_id: String,
    pub document_name: String,
    pub summary: String,
    /// Number of chunks the summary was built from.
    pub sections_analyzed: usize,
    pub timestamp: DateTime<Utc>,
}

/// Events emitted while streaming an answer.
///
/// The stream is always `metadata`, then zero or more `token`s, then exactly
/// one `complete` or `error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Metadata {
        query: String,
        retrieved_documents: usize,
        /// Distinct source document names, first-seen order.
        sources: Vec<String>,
        citations: Vec<String>,
    },
    Token {
        token: String,
        /// Everything generated so far, this token included.
        partial_response: String,
    },
    Complete {
        answer: String,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}
