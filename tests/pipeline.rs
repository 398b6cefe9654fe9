//! End-to-end scenarios through the library: ingest, ask, search, delete,
//! streaming, and reset, using deterministic in-process fakes for the
//! embedding provider and the language model so no network is needed.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;

use docq::chunk::Splitter;
use docq::config::{RetrievalConfig, StorageConfig};
use docq::embedding::{Embedder, EmbeddingProviderKind};
use docq::error::{Error, Result};
use docq::index::VectorIndex;
use docq::ingest::IngestionPipeline;
use docq::llm::LanguageModel;
use docq::models::StreamEvent;
use docq::progress::NoProgress;
use docq::retriever::{Retriever, NO_RESULTS_ANSWER};
use docq::storage::{self, FileStorage};

/// Deterministic embedder: each word contributes to one axis picked by a
/// byte-sum hash, then the vector is normalized. Texts sharing words score
/// higher against each other than unrelated texts.
struct FakeEmbedder {
    kind: EmbeddingProviderKind,
    calls: AtomicUsize,
    fail: bool,
}

impl FakeEmbedder {
    fn new(kind: EmbeddingProviderKind) -> Self {
        Self {
            kind,
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn failing(kind: EmbeddingProviderKind) -> Self {
        Self {
            kind,
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let dims = self.kind.dims();
        let mut v = vec![0.0f32; dims];
        for word in text.split_whitespace() {
            let axis = word.bytes().map(|b| b as usize).sum::<usize>() % dims;
            v[axis] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        } else {
            v[0] = 1.0;
        }
        v
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn kind(&self) -> EmbeddingProviderKind {
        self.kind
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Embedding("provider unavailable".to_string()));
        }
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Scripted language model: returns a fixed answer and counts calls.
struct FakeLlm {
    answer: String,
    calls: AtomicUsize,
}

impl FakeLlm {
    fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for FakeLlm {
    fn model(&self) -> &str {
        "fake"
    }

    async fn generate(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.clone())
    }

    async fn generate_streaming(&self, _prompt: &str) -> Result<mpsc::Receiver<Result<String>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(8);
        let words: Vec<String> = self
            .answer
            .split_inclusive(' ')
            .map(|w| w.to_string())
            .collect();
        tokio::spawn(async move {
            for word in words {
                if tx.send(Ok(word)).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

struct TestEnv {
    _dir: TempDir,
    pool: sqlx::SqlitePool,
    storage: FileStorage,
    index: Arc<VectorIndex>,
    embedder: Arc<FakeEmbedder>,
    llm: Arc<FakeLlm>,
    pipeline: IngestionPipeline,
    retriever: Retriever,
}

async fn setup() -> TestEnv {
    setup_with(
        FakeEmbedder::new(EmbeddingProviderKind::OllamaNomicEmbedText),
        FakeLlm::new("The answer is forty-two."),
    )
    .await
}

async fn setup_with(embedder: FakeEmbedder, llm: FakeLlm) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let pool = docq::db::connect(&dir.path().join("docq.db")).await.unwrap();
    docq::migrate::run_migrations(&pool).await.unwrap();

    let storage_cfg = StorageConfig {
        upload_dir: dir.path().join("uploads"),
        max_upload_mb: 50,
    };
    let storage = FileStorage::new(&storage_cfg);
    let embedder = Arc::new(embedder);
    let llm = Arc::new(llm);
    let index = Arc::new(
        VectorIndex::open(pool.clone(), embedder.kind()).await.unwrap(),
    );

    let pipeline = IngestionPipeline::new(
        pool.clone(),
        storage.clone(),
        index.clone(),
        embedder.clone(),
        Splitter::new(800, 175).unwrap(),
        Arc::new(NoProgress),
    );
    let retriever = Retriever::new(
        pool.clone(),
        index.clone(),
        embedder.clone(),
        llm.clone(),
        RetrievalConfig::default(),
    );

    TestEnv {
        _dir: dir,
        pool,
        storage,
        index,
        embedder,
        llm,
        pipeline,
        retriever,
    }
}

#[tokio::test]
async fn ingest_indexes_expected_chunk_count() {
    let env = setup().await;

    // 2000 boundary-free characters split into ceil((2000-175)/625) = 3 chunks.
    let text = "a".repeat(2000);
    let report = env
        .pipeline
        .ingest_bytes("big.txt", text.as_bytes())
        .await
        .unwrap();

    assert_eq!(report.chunks, 3);
    assert_eq!(report.collection_total, 3);
    // One batched embedding call for the whole document.
    assert_eq!(env.embedder.calls.load(Ordering::SeqCst), 1);

    let docs = storage::list_documents(&env.pool).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].display_name, "big.txt");
    assert!(env
        .storage
        .read(&docs[0].stored_filename)
        .await
        .unwrap()
        .starts_with(b"a"));

    let stats = env.index.stats().await.unwrap();
    assert_eq!(stats.entries, 3);
    assert_eq!(stats.documents, 1);
}

#[tokio::test]
async fn ingest_rejects_unsupported_and_empty_uploads() {
    let env = setup().await;

    let err = env.pipeline.ingest_bytes("deck.pptx", b"data").await.unwrap_err();
    assert!(matches!(err, Error::UnsupportedFormat(_)));

    let err = env.pipeline.ingest_bytes("empty.txt", b"").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    assert!(storage::list_documents(&env.pool).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_embedding_cleans_up_file_and_metadata() {
    let env = setup_with(
        FakeEmbedder::failing(EmbeddingProviderKind::OllamaNomicEmbedText),
        FakeLlm::new("unused"),
    )
    .await;

    let err = env
        .pipeline
        .ingest_bytes("doc.txt", b"some meaningful content")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Embedding(_)));

    // Compensating cleanup: no metadata row, no stored file, no index entries.
    assert!(storage::list_documents(&env.pool).await.unwrap().is_empty());
    assert_eq!(env.index.stats().await.unwrap().entries, 0);
    let uploads = env.storage.upload_dir();
    let leftover = std::fs::read_dir(uploads)
        .map(|d| d.count())
        .unwrap_or(0);
    assert_eq!(leftover, 0);
}

#[tokio::test]
async fn ask_answers_with_citations_from_matching_document() {
    let env = setup().await;
    env.pipeline
        .ingest_bytes("physics.txt", b"gravity bends spacetime around mass")
        .await
        .unwrap();

    let response = env
        .retriever
        .ask("gravity spacetime", None, None)
        .await
        .unwrap();

    assert_eq!(response.answer, "The answer is forty-two.");
    assert_eq!(response.retrieved_documents, 1);
    assert_eq!(response.citations, vec!["physics.txt, Section 0".to_string()]);
    assert!(response.context_words > 0);
    assert_eq!(env.llm.call_count(), 1);
}

#[tokio::test]
async fn ask_collapses_sources_to_one_entry_per_document() {
    let env = setup().await;

    // 2000 boundary-free chars index as three chunks of one document.
    let text = "a".repeat(2000);
    env.pipeline
        .ingest_bytes("big.txt", text.as_bytes())
        .await
        .unwrap();

    let response = env
        .retriever
        .ask("aaaa aaaa", Some(3), None)
        .await
        .unwrap();

    assert_eq!(response.retrieved_documents, 3);
    assert_eq!(response.sources.len(), 1);
    assert_eq!(response.sources[0].document_name, "big.txt");
    // Citations stay per-chunk and deduplicate by citation string.
    assert_eq!(response.citations.len(), 3);
}

#[tokio::test]
async fn ask_with_empty_index_skips_the_model() {
    let env = setup().await;

    let response = env.retriever.ask("anything at all", None, None).await.unwrap();

    assert_eq!(response.answer, NO_RESULTS_ANSWER);
    assert_eq!(response.retrieved_documents, 0);
    assert!(response.citations.is_empty());
    assert_eq!(env.llm.call_count(), 0);
}

#[tokio::test]
async fn ask_validates_query_and_k() {
    let env = setup().await;

    assert!(matches!(
        env.retriever.ask("  ", None, None).await.unwrap_err(),
        Error::Validation(_)
    ));
    let long = "q".repeat(1001);
    assert!(matches!(
        env.retriever.ask(&long, None, None).await.unwrap_err(),
        Error::Validation(_)
    ));
    assert!(matches!(
        env.retriever.ask("ok", Some(0), None).await.unwrap_err(),
        Error::Validation(_)
    ));
    assert!(matches!(
        env.retriever.ask("ok", Some(21), None).await.unwrap_err(),
        Error::Validation(_)
    ));
}

#[tokio::test]
async fn search_filters_by_similarity_and_document() {
    let env = setup().await;
    let first = env
        .pipeline
        .ingest_bytes("cats.txt", b"cats purr softly at home")
        .await
        .unwrap();
    env.pipeline
        .ingest_bytes("rockets.txt", b"rockets burn fuel in space")
        .await
        .unwrap();

    let results = env
        .retriever
        .search("cats purr", None, 0.0, None)
        .await
        .unwrap();
    assert_eq!(results[0].document_name, "cats.txt");
    assert_eq!(results[0].rank, 1);
    assert!(results[0].score > results.last().unwrap().score || results.len() == 1);

    // A high threshold drops the unrelated document.
    let strict = env
        .retriever
        .search("cats purr", None, 0.5, None)
        .await
        .unwrap();
    assert!(strict.iter().all(|h| h.document_name == "cats.txt"));

    // Document pinning ignores everything else.
    let pinned = env
        .retriever
        .search("rockets", None, 0.0, Some(&first.document.id))
        .await
        .unwrap();
    assert!(pinned.iter().all(|h| h.document_name == "cats.txt"));

    // Invalid threshold is rejected.
    assert!(matches!(
        env.retriever.search("x", None, 1.5, None).await.unwrap_err(),
        Error::Validation(_)
    ));
}

#[tokio::test]
async fn delete_removes_entries_and_is_idempotent() {
    let env = setup().await;
    let report = env
        .pipeline
        .ingest_bytes("gone.txt", b"temporary document content here")
        .await
        .unwrap();
    let id = report.document.id.clone();

    assert_eq!(env.index.delete_by_document(&id).await.unwrap(), 1);
    assert_eq!(env.index.delete_by_document(&id).await.unwrap(), 0);

    let results = env
        .retriever
        .search("temporary document", None, 0.0, None)
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn switching_embedding_provider_requires_reset() {
    let env = setup().await;
    env.pipeline
        .ingest_bytes("old.txt", b"indexed under the old provider")
        .await
        .unwrap();

    let err = VectorIndex::open(env.pool.clone(), EmbeddingProviderKind::OpenAiSmall)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::DimensionMismatch {
            expected: 768,
            actual: 1536
        }
    ));
    // Nothing was disturbed by the failed open.
    assert_eq!(env.index.stats().await.unwrap().entries, 1);

    env.index.reset().await.unwrap();
    let switched = VectorIndex::open(env.pool.clone(), EmbeddingProviderKind::OpenAiSmall)
        .await
        .unwrap();
    assert_eq!(switched.stats().await.unwrap().entries, 0);
}

#[tokio::test]
async fn streaming_emits_metadata_tokens_then_complete() {
    let env = setup().await;
    env.pipeline
        .ingest_bytes("stream.txt", b"streaming answers arrive token by token")
        .await
        .unwrap();

    let mut events = env
        .retriever
        .ask_streaming("streaming answers", None, None)
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        seen.push(event);
    }

    match seen.first() {
        Some(StreamEvent::Metadata {
            retrieved_documents,
            sources,
            ..
        }) => {
            assert_eq!(*retrieved_documents, 1);
            assert_eq!(sources, &vec!["stream.txt".to_string()]);
        }
        other => panic!("expected metadata event, got {:?}", other),
    }

    // partial_response grows monotonically: each one is the previous plus
    // the token it carries.
    let mut assembled = String::new();
    for event in &seen {
        if let StreamEvent::Token {
            token,
            partial_response,
        } = event
        {
            assembled.push_str(token);
            assert_eq!(partial_response, &assembled);
        }
    }
    assert_eq!(assembled, "The answer is forty-two.");

    match seen.last() {
        Some(StreamEvent::Complete { answer, .. }) => {
            assert_eq!(answer, "The answer is forty-two.")
        }
        other => panic!("expected complete event, got {:?}", other),
    }
    // Exactly one metadata, no error events.
    assert_eq!(
        seen.iter()
            .filter(|e| matches!(e, StreamEvent::Metadata { .. }))
            .count(),
        1
    );
    assert!(!seen.iter().any(|e| matches!(e, StreamEvent::Error { .. })));
}

#[tokio::test]
async fn streaming_with_empty_index_completes_with_canned_answer() {
    let env = setup().await;

    let mut events = env
        .retriever
        .ask_streaming("unknown topic", None, None)
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        seen.push(event);
    }

    assert_eq!(seen.len(), 2);
    assert!(matches!(
        seen[0],
        StreamEvent::Metadata {
            retrieved_documents: 0,
            ..
        }
    ));
    match &seen[1] {
        StreamEvent::Complete { answer, .. } => assert_eq!(answer, NO_RESULTS_ANSWER),
        other => panic!("expected complete event, got {:?}", other),
    }
    assert_eq!(env.llm.call_count(), 0);
}

#[tokio::test]
async fn summarize_uses_the_document_chunks() {
    let env = setup().await;
    let report = env
        .pipeline
        .ingest_bytes(
            "report.txt",
            b"quarterly revenue grew while costs stayed flat across regions",
        )
        .await
        .unwrap();

    let summary = env.retriever.summarize(&report.document.id).await.unwrap();
    assert_eq!(summary.document_name, "report.txt");
    assert_eq!(summary.sections_analyzed, 1);
    assert_eq!(summary.summary, "The answer is forty-two.");
    assert_eq!(env.llm.call_count(), 1);

    let err = env.retriever.summarize("no-such-id").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn embed_query_matches_document_embedding() {
    let env = setup().await;
    let text = "identical text either way".to_string();
    let doc_vecs = env.embedder.embed_documents(&[text.clone()]).await.unwrap();
    let query_vec = env.embedder.embed_query(&text).await.unwrap();
    assert_eq!(doc_vecs[0], query_vec);
}
