//! Uploaded file storage and document metadata.
//!
//! Files land in the upload directory under `{document_id}{ext}` so disk
//! names never collide and never leak user-controlled paths. The metadata
//! row (display name, content type, size, content hash) lives in SQLite.

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};

use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::extract::content_type_for;
use crate::models::DocumentRecord;

#[derive(Debug, Clone)]
pub struct FileStorage {
    upload_dir: PathBuf,
    max_bytes: u64,
}

impl FileStorage {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            upload_dir: config.upload_dir.clone(),
            max_bytes: config.max_upload_mb * 1024 * 1024,
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Check an upload before any disk or pipeline work: non-empty filename,
    /// supported extension, non-empty content, size cap. Returns the content
    /// type for the file.
    pub fn validate_upload(&self, filename: &str, bytes: &[u8]) -> Result<&'static str> {
        if filename.trim().is_empty() {
            return Err(Error::Validation("filename must not be empty".to_string()));
        }
        if bytes.is_empty() {
            return Err(Error::Validation("uploaded file is empty".to_string()));
        }
        if bytes.len() as u64 > self.max_bytes {
            return Err(Error::Validation(format!(
                "file exceeds the {} MB upload limit",
                self.max_bytes / (1024 * 1024)
            )));
        }
        content_type_for(filename).ok_or_else(|| {
            Error::UnsupportedFormat(format!(
                "'{}' is not a supported file type (.txt, .pdf, .docx)",
                filename
            ))
        })
    }

    /// Write file content under the upload directory.
    pub async fn save(&self, stored_filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let path = self.upload_dir.join(stored_filename);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    pub async fn read(&self, stored_filename: &str) -> Result<Vec<u8>> {
        let path = self.upload_dir.join(stored_filename);
        Ok(tokio::fs::read(&path).await?)
    }

    /// Remove a stored file. Returns whether a file was actually removed;
    /// a missing file is not an error.
    pub async fn delete(&self, stored_filename: &str) -> Result<bool> {
        let path = self.upload_dir.join(stored_filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Derive the on-disk filename for a document.
pub fn stored_filename(document_id: &str, display_name: &str) -> String {
    let ext = Path::new(display_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default();
    format!("{}{}", document_id, ext)
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ============ Document metadata rows ============

pub async fn insert_document(pool: &SqlitePool, doc: &DocumentRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO documents (id, display_name, stored_filename, content_type, byte_size, created_at, dedup_hash)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&doc.id)
    .bind(&doc.display_name)
    .bind(&doc.stored_filename)
    .bind(&doc.content_type)
    .bind(doc.byte_size)
    .bind(doc.created_at.to_rfc3339())
    .bind(&doc.dedup_hash)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_document(pool: &SqlitePool, id: &str) -> Result<Option<DocumentRecord>> {
    let row = sqlx::query(
        "SELECT id, display_name, stored_filename, content_type, byte_size, created_at, dedup_hash \
         FROM documents WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(row_to_document))
}

pub async fn list_documents(pool: &SqlitePool) -> Result<Vec<DocumentRecord>> {
    let rows = sqlx::query(
        "SELECT id, display_name, stored_filename, content_type, byte_size, created_at, dedup_hash \
         FROM documents ORDER BY created_at DESC, id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(row_to_document).collect())
}

pub async fn find_document_by_hash(
    pool: &SqlitePool,
    dedup_hash: &str,
) -> Result<Option<DocumentRecord>> {
    let row = sqlx::query(
        "SELECT id, display_name, stored_filename, content_type, byte_size, created_at, dedup_hash \
         FROM documents WHERE dedup_hash = ? LIMIT 1",
    )
    .bind(dedup_hash)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(row_to_document))
}

pub async fn delete_document(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

fn row_to_document(row: sqlx::sqlite::SqliteRow) -> DocumentRecord {
    DocumentRecord {
        id: row.get("id"),
        display_name: row.get("display_name"),
        stored_filename: row.get("stored_filename"),
        content_type: row.get("content_type"),
        byte_size: row.get("byte_size"),
        created_at: chrono::DateTime::parse_from_rfc3339(
            row.get::<String, _>("created_at").as_str(),
        )
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now()),
        dedup_hash: row.get("dedup_hash"),
    }
}
