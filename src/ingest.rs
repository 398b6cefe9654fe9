//! Document ingestion pipeline.
//!
//! Coordinates the full flow for one uploaded file: validate → store →
//! extract → chunk → embed → index, notifying a [`ProgressSink`] at every
//! stage transition. The stage sequence is fixed; a failure at any point
//! moves the document to `failed` and undoes the upload (stored file and
//! metadata row) so no orphan survives.
//!
//! All embedded chunks of a document are written to the index in a single
//! batched insert, so a document is either fully indexed or absent.

use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::Splitter;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::extract::extract_segments;
use crate::index::VectorIndex;
use crate::models::{Chunk, DocumentRecord};
use crate::progress::{ProgressSink, Stage, StageTimer};
use crate::storage::{self, FileStorage};

pub struct IngestionPipeline {
    pool: SqlitePool,
    storage: FileStorage,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    splitter: Splitter,
    progress: Arc<dyn ProgressSink>,
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub document: DocumentRecord,
    pub chunks: usize,
    pub collection_total: i64,
}

impl IngestionPipeline {
    pub fn new(
        pool: SqlitePool,
        storage: FileStorage,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        splitter: Splitter,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            pool,
            storage,
            index,
            embedder,
            splitter,
            progress,
        }
    }

    /// Ingest one file. `display_name` is the name the user uploaded;
    /// it drives format detection and later shows up in citations.
    pub async fn ingest_bytes(&self, display_name: &str, bytes: &[u8]) -> Result<IngestReport> {
        let content_type = self.storage.validate_upload(display_name, bytes)?;

        let document_id = Uuid::new_v4().to_string();
        let stored = storage::stored_filename(&document_id, display_name);

        self.progress.notify(&document_id, Stage::Uploading, "");
        {
            let _timer = StageTimer::start(&document_id, Stage::Uploading);
            self.storage.save(&stored, bytes).await?;
        }

        let dedup_hash = storage::content_hash(bytes);
        if let Some(existing) = storage::find_document_by_hash(&self.pool, &dedup_hash).await? {
            warn!(
                document_id,
                existing_id = existing.id.as_str(),
                "uploaded content matches an already-ingested document"
            );
        }

        let document = DocumentRecord {
            id: document_id.clone(),
            display_name: display_name.to_string(),
            stored_filename: stored.clone(),
            content_type: content_type.to_string(),
            byte_size: bytes.len() as i64,
            created_at: chrono::Utc::now(),
            dedup_hash,
        };
        storage::insert_document(&self.pool, &document).await?;

        match self.run_stages(&document, bytes).await {
            Ok(report) => {
                self.progress.notify(&document_id, Stage::Completed, "");
                info!(
                    document_id,
                    chunks = report.chunks,
                    "document ingested"
                );
                Ok(report)
            }
            Err(err) => {
                self.progress
                    .notify(&document_id, Stage::Failed, &err.to_string());
                self.cleanup_failed(&document).await;
                Err(err)
            }
        }
    }

    async fn run_stages(&self, document: &DocumentRecord, bytes: &[u8]) -> Result<IngestReport> {
        let document_id = &document.id;

        self.progress.notify(document_id, Stage::Extracting, "");
        let segments = {
            let _timer = StageTimer::start(document_id, Stage::Extracting);
            extract_segments(bytes, &document.content_type)?
        };

        self.progress.notify(document_id, Stage::Chunking, "");
        let mut chunks = {
            let _timer = StageTimer::start(document_id, Stage::Chunking);
            self.splitter
                .split_document(document_id, &document.display_name, &segments)
        };
        if chunks.is_empty() {
            return Err(Error::Extraction(
                "document produced no chunks".to_string(),
            ));
        }

        self.progress.notify(
            document_id,
            Stage::Embedding,
            &format!("{} chunks", chunks.len()),
        );
        {
            let _timer = StageTimer::start(document_id, Stage::Embedding);
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed_documents(&texts).await?;
            attach_embeddings(&mut chunks, vectors)?;
        }

        self.progress.notify(document_id, Stage::Indexing, "");
        let summary = {
            let _timer = StageTimer::start(document_id, Stage::Indexing);
            self.index.insert(&chunks).await?
        };

        Ok(IngestReport {
            document: document.clone(),
            chunks: summary.inserted,
            collection_total: summary.collection_total,
        })
    }

    /// Undo the upload after a stage failure. Cleanup problems are logged,
    /// not propagated; the stage error is what the caller needs to see.
    async fn cleanup_failed(&self, document: &DocumentRecord) {
        if let Err(e) = self.storage.delete(&document.stored_filename).await {
            warn!(
                document_id = document.id.as_str(),
                error = %e,
                "failed to remove stored file during cleanup"
            );
        }
        if let Err(e) = storage::delete_document(&self.pool, &document.id).await {
            warn!(
                document_id = document.id.as_str(),
                error = %e,
                "failed to remove document row during cleanup"
            );
        }
    }
}

fn attach_embeddings(chunks: &mut [Chunk], vectors: Vec<Vec<f32>>) -> Result<()> {
    if vectors.len() != chunks.len() {
        return Err(Error::Embedding(format!(
            "provider returned {} vectors for {} chunks",
            vectors.len(),
            chunks.len()
        )));
    }
    for (chunk, vector) in chunks.iter_mut().zip(vectors) {
        chunk.embedding = Some(vector);
    }
    Ok(())
}
