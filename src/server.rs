//! HTTP API server.
//!
//! Exposes the ingestion and retrieval pipeline as a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/files/upload` | Upload and ingest a document (multipart) |
//! | `GET`  | `/files` | List ingested documents |
//! | `GET`  | `/files/{id}` | Document metadata |
//! | `DELETE` | `/files/{id}` | Delete a document and its index entries |
//! | `POST` | `/ask` | Answer a question over the indexed documents |
//! | `POST` | `/ask/stream` | Streaming answer (SSE) |
//! | `POST` | `/search` | Semantic search without answer generation |
//! | `POST` | `/summarize` | Summarize one document |
//! | `POST` | `/admin/reset` | Clear the index, metadata, and stored files |
//! | `GET`  | `/stats` | Index statistics |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses share one envelope:
//!
//! ```json
//! { "error": { "code": "validation_error", "message": "query must not be empty" } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser frontends can
//! talk to the API directly.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::error::Error;
use crate::index::VectorIndex;
use crate::ingest::IngestionPipeline;
use crate::llm::create_language_model;
use crate::migrate;
use crate::models::{DocumentRecord, StreamEvent};
use crate::progress::NoProgress;
use crate::retriever::Retriever;
use crate::storage::{self, FileStorage};
use crate::chunk::Splitter;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    pool: sqlx::SqlitePool,
    storage: FileStorage,
    index: Arc<VectorIndex>,
    pipeline: Arc<IngestionPipeline>,
    retriever: Arc<Retriever>,
}

/// Start the HTTP server on the configured bind address.
pub async fn run_server(config: &Config) -> crate::error::Result<()> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;

    let storage = FileStorage::new(&config.storage);
    let embedder = create_embedder(&config.embedding)?;
    let index = Arc::new(VectorIndex::open(pool.clone(), embedder.kind()).await?);
    let llm = create_language_model(&config.llm)?;
    let splitter = Splitter::new(config.chunking.chunk_size, config.chunking.overlap)?;

    let pipeline = Arc::new(IngestionPipeline::new(
        pool.clone(),
        storage.clone(),
        index.clone(),
        embedder.clone(),
        splitter,
        Arc::new(NoProgress),
    ));
    let retriever = Arc::new(Retriever::new(
        pool.clone(),
        index.clone(),
        embedder,
        llm,
        config.retrieval.clone(),
    ));

    let state = AppState {
        pool,
        storage,
        index,
        pipeline,
        retriever,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/files/upload", post(handle_upload))
        .route("/files", get(handle_list_files))
        .route("/files/{id}", get(handle_get_file))
        .route("/files/{id}", delete(handle_delete_file))
        .route("/ask", post(handle_ask))
        .route("/ask/stream", post(handle_ask_stream))
        .route("/search", post(handle_search))
        .route("/summarize", post(handle_summarize))
        .route("/admin/reset", post(handle_reset))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    let bind_addr = &config.server.bind;
    info!(bind = bind_addr.as_str(), "server listening");
    println!("docq server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Config(format!("server error: {}", e)))?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"validation_error"`, `"not_found"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::DimensionMismatch { .. } => StatusCode::CONFLICT,
            Error::Embedding(_) | Error::Llm(_) => StatusCode::BAD_GATEWAY,
            Error::Extraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "validation_error".to_string(),
        message: message.into(),
    }
}

// ============ Files ============

#[derive(Serialize)]
struct UploadResponse {
    document: DocumentRecord,
    chunks: usize,
    collection_total: i64,
}

/// Handler for `POST /files/upload`. Expects a multipart form with a `file`
/// field carrying a filename.
async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .ok_or_else(|| bad_request("file field is missing a filename"))?
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read upload: {}", e)))?;

        let report = state.pipeline.ingest_bytes(&filename, &bytes).await?;
        return Ok((
            StatusCode::CREATED,
            Json(UploadResponse {
                document: report.document,
                chunks: report.chunks,
                collection_total: report.collection_total,
            }),
        ));
    }
    Err(bad_request("multipart body has no 'file' field"))
}

#[derive(Serialize)]
struct FileListResponse {
    files: Vec<DocumentRecord>,
    total: usize,
}

async fn handle_list_files(
    State(state): State<AppState>,
) -> Result<Json<FileListResponse>, AppError> {
    let files = storage::list_documents(&state.pool).await?;
    let total = files.len();
    Ok(Json(FileListResponse { files, total }))
}

async fn handle_get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentRecord>, AppError> {
    let doc = storage::get_document(&state.pool, &id)
        .await?
        .ok_or(Error::NotFound(format!("document {}", id)))?;
    Ok(Json(doc))
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: bool,
    index_entries_removed: u64,
}

/// Handler for `DELETE /files/{id}`.
///
/// The stored file and metadata row are removed first; index cleanup is
/// best-effort and only logged on failure, so a document can always be
/// deleted even when the index is unhealthy.
async fn handle_delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let doc = storage::get_document(&state.pool, &id)
        .await?
        .ok_or(Error::NotFound(format!("document {}", id)))?;

    state.storage.delete(&doc.stored_filename).await?;
    storage::delete_document(&state.pool, &id).await?;

    let index_entries_removed = match state.index.delete_by_document(&id).await {
        Ok(n) => n,
        Err(e) => {
            warn!(document_id = id.as_str(), error = %e, "index cleanup failed after file delete");
            0
        }
    };

    Ok(Json(DeleteResponse {
        deleted: true,
        index_entries_removed,
    }))
}

// ============ Questions ============

#[derive(Deserialize)]
struct AskRequest {
    query: String,
    #[serde(default)]
    k: Option<usize>,
    #[serde(default)]
    document_id: Option<String>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<crate::models::AskResponse>, AppError> {
    let response = state
        .retriever
        .ask(&req.query, req.k, req.document_id.as_deref())
        .await?;
    Ok(Json(response))
}

/// Handler for `POST /ask/stream`. Emits the retriever's event stream as
/// server-sent events, one JSON object per event.
async fn handle_ask_stream(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Sse<impl tokio_stream::Stream<Item = std::result::Result<Event, Infallible>>>, AppError>
{
    let events = state
        .retriever
        .ask_streaming(&req.query, req.k, req.document_id.as_deref())
        .await?;

    let stream = ReceiverStream::new(events).map(|event: StreamEvent| {
        let data = serde_json::to_string(&event).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","message":"serialization failed: {}"}}"#, e)
        });
        Ok(Event::default().data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ============ Search / summarize ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    k: Option<usize>,
    #[serde(default)]
    min_similarity: f32,
    #[serde(default)]
    document_id: Option<String>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<crate::models::RankedHit>,
    total: usize,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let results = state
        .retriever
        .search(&req.query, req.k, req.min_similarity, req.document_id.as_deref())
        .await?;
    let total = results.len();
    Ok(Json(SearchResponse { results, total }))
}

#[derive(Deserialize)]
struct SummarizeRequest {
    document_id: String,
}

async fn handle_summarize(
    State(state): State<AppState>,
    Json(req): Json<SummarizeRequest>,
) -> Result<Json<crate::models::SummaryResponse>, AppError> {
    let response = state.retriever.summarize(&req.document_id).await?;
    Ok(Json(response))
}

// ============ Admin ============

#[derive(Serialize)]
struct ResetResponse {
    status: String,
}

/// Handler for `POST /admin/reset`. Clears the index, document metadata,
/// and stored files.
async fn handle_reset(State(state): State<AppState>) -> Result<Json<ResetResponse>, AppError> {
    state.index.reset().await?;

    for doc in storage::list_documents(&state.pool).await? {
        if let Err(e) = state.storage.delete(&doc.stored_filename).await {
            warn!(document_id = doc.id.as_str(), error = %e, "failed to remove stored file");
        }
        storage::delete_document(&state.pool, &doc.id).await?;
    }

    info!("index and document store reset");
    Ok(Json(ResetResponse {
        status: "reset".to_string(),
    }))
}

async fn handle_stats(
    State(state): State<AppState>,
) -> Result<Json<crate::models::IndexStats>, AppError> {
    Ok(Json(state.index.stats().await?))
}

// ============ Health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
