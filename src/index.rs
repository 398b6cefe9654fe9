//! SQLite-backed vector index.
//!
//! Entries live in one collection per embedding configuration; the active
//! collection is fixed at open time from the provider variant. Search is
//! brute-force cosine over the collection's vectors, which is exact and fast
//! enough at the document counts this index serves.
//!
//! All mutations go through a single async mutex in addition to SQLite
//! transactions, so a `reset` can never interleave with a concurrent insert.

use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, EmbeddingProviderKind};
use crate::error::{Error, Result};
use crate::models::{Chunk, ChunkMetadata, IndexStats, InsertSummary, SearchHit};

#[derive(Debug)]
pub struct VectorIndex {
    pool: SqlitePool,
    kind: EmbeddingProviderKind,
    collection: String,
    write_lock: Mutex<()>,
}

impl VectorIndex {
    /// Open the index for the given embedding configuration.
    ///
    /// Fails with [`Error::DimensionMismatch`] when a different collection
    /// still holds entries: the embedding configuration changed and the
    /// existing vectors are unreadable under the new geometry. The caller
    /// must reset the index or revert the configuration.
    pub async fn open(pool: SqlitePool, kind: EmbeddingProviderKind) -> Result<Self> {
        let collection = kind.collection();

        let other: Option<(String, i64)> = sqlx::query_as(
            r#"
            SELECT c.name, c.dims FROM collections c
            WHERE c.name != ?
              AND EXISTS (SELECT 1 FROM entries e WHERE e.collection = c.name)
            LIMIT 1
            "#,
        )
        .bind(&collection)
        .fetch_optional(&pool)
        .await?;

        if let Some((_, dims)) = other {
            return Err(Error::DimensionMismatch {
                expected: dims as usize,
                actual: kind.dims(),
            });
        }

        register_collection(&pool, kind).await?;

        Ok(Self {
            pool,
            kind,
            collection,
            write_lock: Mutex::new(()),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn dims(&self) -> usize {
        self.kind.dims()
    }

    /// Insert a batch of embedded chunks in a single transaction.
    ///
    /// Every vector is dimension-checked before anything is written; a
    /// mismatch anywhere leaves the index untouched.
    pub async fn insert(&self, chunks: &[Chunk]) -> Result<InsertSummary> {
        let _guard = self.write_lock.lock().await;

        for chunk in chunks {
            let embedding = chunk.embedding.as_ref().ok_or_else(|| {
                Error::Index(format!("chunk {} has no embedding", chunk.chunk_id))
            })?;
            if embedding.len() != self.kind.dims() {
                return Err(Error::DimensionMismatch {
                    expected: self.kind.dims(),
                    actual: embedding.len(),
                });
            }
        }

        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            let embedding = chunk.embedding.as_ref().ok_or_else(|| {
                Error::Index(format!("chunk {} has no embedding", chunk.chunk_id))
            })?;
            sqlx::query(
                r#"
                INSERT INTO entries
                    (chunk_id, collection, document_id, document_name, source_page,
                     chunk_index, total_chunks, created_at, text, embedding, metadata_json)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, '{}')
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(&self.collection)
            .bind(&chunk.document_id)
            .bind(&chunk.document_name)
            .bind(chunk.source_page.map(|p| p as i64))
            .bind(chunk.chunk_index as i64)
            .bind(chunk.total_chunks as i64)
            .bind(chunk.created_at.to_rfc3339())
            .bind(&chunk.text)
            .bind(vec_to_blob(embedding))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let total = self.count_entries().await?;
        Ok(InsertSummary {
            inserted: chunks.len(),
            collection_total: total,
        })
    }

    /// Rank the collection's entries against a query vector.
    pub async fn search(
        &self,
        query: &[f32],
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        if query.len() != self.kind.dims() {
            return Err(Error::DimensionMismatch {
                expected: self.kind.dims(),
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = match document_id {
            Some(doc_id) => {
                sqlx::query(
                    "SELECT chunk_id, document_id, document_name, source_page, chunk_index, \
                     total_chunks, created_at, text, embedding, metadata_json \
                     FROM entries WHERE collection = ? AND document_id = ?",
                )
                .bind(&self.collection)
                .bind(doc_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT chunk_id, document_id, document_name, source_page, chunk_index, \
                     total_chunks, created_at, text, embedding, metadata_json \
                     FROM entries WHERE collection = ?",
                )
                .bind(&self.collection)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut hits: Vec<SearchHit> = rows
            .into_iter()
            .map(|row| {
                let embedding = blob_to_vec(row.get::<Vec<u8>, _>("embedding").as_slice());
                let score = cosine_similarity(query, &embedding);
                let extra: BTreeMap<String, String> =
                    serde_json::from_str(row.get::<String, _>("metadata_json").as_str())
                        .unwrap_or_default();
                SearchHit {
                    chunk_id: row.get("chunk_id"),
                    text: row.get("text"),
                    score,
                    metadata: ChunkMetadata {
                        document_id: row.get("document_id"),
                        document_name: row.get("document_name"),
                        source_page: row
                            .get::<Option<i64>, _>("source_page")
                            .map(|p| p as u32),
                        chunk_index: row.get::<i64, _>("chunk_index") as usize,
                        total_chunks: row.get::<i64, _>("total_chunks") as usize,
                        created_at: chrono::DateTime::parse_from_rfc3339(
                            row.get::<String, _>("created_at").as_str(),
                        )
                        .ok()
                        .map(|t| t.with_timezone(&chrono::Utc)),
                        extra,
                    },
                }
            })
            .collect();

        // Deterministic order: score descending, chunk id as tiebreak.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Delete all entries for a document. Returns the number removed;
    /// an unknown document removes zero and is not an error.
    pub async fn delete_by_document(&self, document_id: &str) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM entries WHERE collection = ? AND document_id = ?")
            .bind(&self.collection)
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Drop every entry and collection record, then re-register the active
    /// collection empty.
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        reset_all(&self.pool).await?;
        register_collection(&self.pool, self.kind).await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let entries = self.count_entries().await?;
        let documents: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT document_id) FROM entries WHERE collection = ?",
        )
        .bind(&self.collection)
        .fetch_one(&self.pool)
        .await?;

        Ok(IndexStats {
            collection: self.collection.clone(),
            model: self.kind.model().to_string(),
            dims: self.kind.dims(),
            entries,
            documents,
        })
    }

    async fn count_entries(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Clear every entry and collection record without opening the index.
///
/// `open` refuses to run under a changed embedding configuration, so the
/// reset path must not depend on it.
pub async fn reset_all(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM entries").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM collections")
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

async fn register_collection(pool: &SqlitePool, kind: EmbeddingProviderKind) -> Result<()> {
    sqlx::query(
        "INSERT OR IGNORE INTO collections (name, model, dims, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(kind.collection())
    .bind(kind.model())
    .bind(kind.dims() as i64)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}
