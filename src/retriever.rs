//! Question answering, semantic search, and summarization over the index.
//!
//! `ask` retrieves the top chunks for a question, assembles a cited context,
//! and hands it to the language model. When nothing relevant is indexed the
//! canned no-results answer is returned and the model is never called.
//! `ask_streaming` delivers the same answer as an event stream: one
//! `metadata` event, the tokens, then a single `complete` or `error`.

use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::llm::LanguageModel;
use crate::models::{
    AskResponse, ChunkMetadata, RankedHit, SearchHit, SourceChunk, StreamEvent, SummaryResponse,
};
use crate::storage;

/// Returned when retrieval finds nothing; the language model is not invoked.
pub const NO_RESULTS_ANSWER: &str = "I could not find any relevant information in the uploaded \
    documents to answer your question. Try uploading documents on this topic or rephrasing the \
    question.";

const SUMMARY_QUERY: &str =
    "Summarize the main topics, key points, and important details of this document.";

/// Default result count for plain semantic search.
const SEARCH_DEFAULT_K: usize = 10;
/// Chunks retrieved for a document summary.
const SUMMARY_K: usize = 10;

pub struct Retriever {
    pool: SqlitePool,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LanguageModel>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(
        pool: SqlitePool,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            pool,
            index,
            embedder,
            llm,
            config,
        }
    }

    /// Answer a question from the indexed documents.
    pub async fn ask(
        &self,
        query: &str,
        k: Option<usize>,
        document_id: Option<&str>,
    ) -> Result<AskResponse> {
        validate_query(query, self.config.max_query_len)?;
        let k = self.resolve_k(k)?;

        let query_vec = self.embedder.embed_query(query).await?;
        let hits = self.index.search(&query_vec, k, document_id).await?;

        if hits.is_empty() {
            info!(query, "no relevant chunks; returning canned answer");
            return Ok(no_results_response(query));
        }

        let citations = dedup_citations(&hits);
        let (context, context_words) = build_context(&hits);
        let prompt = build_prompt(&context, query);

        let answer = self.llm.generate(&prompt).await?;

        Ok(AskResponse {
            answer,
            query: query.to_string(),
            sources: dedup_sources(&hits),
            citations,
            retrieved_documents: hits.len(),
            context_words,
            timestamp: chrono::Utc::now(),
        })
    }

    /// Answer a question as a stream of [`StreamEvent`]s.
    ///
    /// Input validation and retrieval failures surface as an `Err` before
    /// any event is produced; once the stream starts, failures arrive as a
    /// terminal `error` event.
    pub async fn ask_streaming(
        &self,
        query: &str,
        k: Option<usize>,
        document_id: Option<&str>,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        validate_query(query, self.config.max_query_len)?;
        let k = self.resolve_k(k)?;

        let query_vec = self.embedder.embed_query(query).await?;
        let hits = self.index.search(&query_vec, k, document_id).await?;

        let (tx, rx) = mpsc::channel(32);

        if hits.is_empty() {
            let query = query.to_string();
            tokio::spawn(async move {
                let _ = tx
                    .send(StreamEvent::Metadata {
                        query,
                        retrieved_documents: 0,
                        sources: Vec::new(),
                        citations: Vec::new(),
                    })
                    .await;
                let _ = tx
                    .send(StreamEvent::Complete {
                        answer: NO_RESULTS_ANSWER.to_string(),
                        timestamp: chrono::Utc::now(),
                    })
                    .await;
            });
            return Ok(rx);
        }

        let citations = dedup_citations(&hits);
        let (context, _) = build_context(&hits);
        let prompt = build_prompt(&context, query);
        let mut tokens = self.llm.generate_streaming(&prompt).await?;

        let metadata = StreamEvent::Metadata {
            query: query.to_string(),
            retrieved_documents: hits.len(),
            sources: dedup_document_names(&hits),
            citations,
        };

        tokio::spawn(async move {
            if tx.send(metadata).await.is_err() {
                return;
            }

            let mut answer = String::new();
            while let Some(item) = tokens.recv().await {
                match item {
                    Ok(token) => {
                        answer.push_str(&token);
                        let event = StreamEvent::Token {
                            token,
                            partial_response: answer.clone(),
                        };
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "answer stream failed");
                        let _ = tx
                            .send(StreamEvent::Error {
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                }
            }

            let _ = tx
                .send(StreamEvent::Complete {
                    answer,
                    timestamp: chrono::Utc::now(),
                })
                .await;
        });

        Ok(rx)
    }

    /// Semantic search without answer generation.
    pub async fn search(
        &self,
        query: &str,
        k: Option<usize>,
        min_similarity: f32,
        document_id: Option<&str>,
    ) -> Result<Vec<RankedHit>> {
        validate_query(query, self.config.max_query_len)?;
        if !(0.0..=1.0).contains(&min_similarity) {
            return Err(Error::Validation(
                "min_similarity must be between 0.0 and 1.0".to_string(),
            ));
        }
        let k = match k {
            Some(k) if k >= 1 && k <= self.config.max_k => k,
            Some(k) => {
                return Err(Error::Validation(format!(
                    "k must be between 1 and {}, got {}",
                    self.config.max_k, k
                )))
            }
            None => SEARCH_DEFAULT_K,
        };

        let query_vec = self.embedder.embed_query(query).await?;
        let hits = self.index.search(&query_vec, k, document_id).await?;

        Ok(hits
            .iter()
            .filter(|h| h.score >= min_similarity)
            .enumerate()
            .map(|(i, h)| RankedHit {
                rank: i + 1,
                document_name: h.metadata.document_name.clone(),
                page: h.metadata.source_page,
                section: h.metadata.chunk_index,
                text: h.text.clone(),
                score: h.score,
            })
            .collect())
    }

    /// Summarize one document from its most representative chunks.
    pub async fn summarize(&self, document_id: &str) -> Result<SummaryResponse> {
        let document = storage::get_document(&self.pool, document_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("document {}", document_id)))?;

        let query_vec = self.embedder.embed_query(SUMMARY_QUERY).await?;
        let hits = self
            .index
            .search(&query_vec, SUMMARY_K, Some(document_id))
            .await?;

        if hits.is_empty() {
            return Err(Error::NotFound(format!(
                "document {} has no indexed content",
                document_id
            )));
        }

        let (context, _) = build_context(&hits);
        let prompt = format!(
            "Provide a concise summary of the following document excerpts from \
             '{}'. Cover the main topics and key points.\n\n{}\n\nSummary:",
            document.display_name, context
        );
        let summary = self.llm.generate(&prompt).await?;

        Ok(SummaryResponse {
            document_id: document.id,
            document_name: document.display_name,
            summary,
            sections_analyzed: hits.len(),
            timestamp: chrono::Utc::now(),
        })
    }

    fn resolve_k(&self, k: Option<usize>) -> Result<usize> {
        match k {
            None => Ok(self.config.top_k),
            Some(k) if k >= 1 && k <= self.config.max_k => Ok(k),
            Some(k) => Err(Error::Validation(format!(
                "k must be between 1 and {}, got {}",
                self.config.max_k, k
            ))),
        }
    }
}

fn validate_query(query: &str, max_len: usize) -> Result<()> {
    if query.trim().is_empty() {
        return Err(Error::Validation("query must not be empty".to_string()));
    }
    let len = query.chars().count();
    if len > max_len {
        return Err(Error::Validation(format!(
            "query is {} characters, maximum is {}",
            len, max_len
        )));
    }
    Ok(())
}

fn no_results_response(query: &str) -> AskResponse {
    AskResponse {
        answer: NO_RESULTS_ANSWER.to_string(),
        query: query.to_string(),
        sources: Vec::new(),
        citations: Vec::new(),
        retrieved_documents: 0,
        context_words: 0,
        timestamp: chrono::Utc::now(),
    }
}

/// Human-readable citation: document name, page (when the format has pages),
/// and the chunk's section index.
pub fn format_citation(metadata: &ChunkMetadata) -> String {
    let mut parts = vec![metadata.document_name.clone()];
    if let Some(page) = metadata.source_page {
        parts.push(format!("Page {}", page));
    }
    parts.push(format!("Section {}", metadata.chunk_index));
    parts.join(", ")
}

/// Citations for a hit list, deduplicated, first-seen order preserved.
pub fn dedup_citations(hits: &[SearchHit]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut citations = Vec::new();
    for hit in hits {
        let citation = format_citation(&hit.metadata);
        if seen.insert(citation.clone()) {
            citations.push(citation);
        }
    }
    citations
}

/// One source entry per distinct document. Hits arrive score-sorted, so the
/// kept entry is each document's best-scoring chunk.
pub fn dedup_sources(hits: &[SearchHit]) -> Vec<SourceChunk> {
    let mut seen = std::collections::HashSet::new();
    let mut sources = Vec::new();
    for hit in hits {
        if seen.insert(hit.metadata.document_name.clone()) {
            sources.push(source_from_hit(hit));
        }
    }
    sources
}

/// Distinct source document names, first-seen order preserved.
pub fn dedup_document_names(hits: &[SearchHit]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut names = Vec::new();
    for hit in hits {
        if seen.insert(hit.metadata.document_name.clone()) {
            names.push(hit.metadata.document_name.clone());
        }
    }
    names
}

/// Assemble the model context from retrieved chunks. Returns the context and
/// its word count.
fn build_context(hits: &[SearchHit]) -> (String, usize) {
    let context = hits
        .iter()
        .map(|h| format!("[{}]\n{}", format_citation(&h.metadata), h.text))
        .collect::<Vec<_>>()
        .join("\n\n");
    let words = context.split_whitespace().count();
    (context, words)
}

fn build_prompt(context: &str, query: &str) -> String {
    format!(
        "You are a helpful assistant answering questions about uploaded documents. \
         Base your answer only on the provided context. If the answer is not found \
         in the context, say that the documents do not contain the answer.\n\n\
         Context:\n{}\n\nQuestion: {}\n\nAnswer:",
        context, query
    )
}

fn source_from_hit(hit: &SearchHit) -> SourceChunk {
    SourceChunk {
        document_name: hit.metadata.document_name.clone(),
        page: hit.metadata.source_page,
        section: hit.metadata.chunk_index,
        text: hit.text.clone(),
        score: hit.score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(doc: &str, page: Option<u32>, section: usize, text: &str) -> SearchHit {
        SearchHit {
            chunk_id: format!("{}-{}", doc, section),
            text: text.to_string(),
            score: 0.9,
            metadata: ChunkMetadata {
                document_id: doc.to_string(),
                document_name: doc.to_string(),
                source_page: page,
                chunk_index: section,
                total_chunks: 10,
                created_at: None,
                extra: Default::default(),
            },
        }
    }

    #[test]
    fn citation_includes_page_only_when_present() {
        let with_page = hit("report.pdf", Some(3), 2, "x");
        assert_eq!(
            format_citation(&with_page.metadata),
            "report.pdf, Page 3, Section 2"
        );

        let without_page = hit("notes.txt", None, 0, "x");
        assert_eq!(format_citation(&without_page.metadata), "notes.txt, Section 0");
    }

    #[test]
    fn citations_are_deduplicated_in_order() {
        let hits = vec![
            hit("b.pdf", Some(1), 0, "x"),
            hit("a.txt", None, 2, "y"),
            hit("b.pdf", Some(1), 0, "z"),
        ];
        assert_eq!(
            dedup_citations(&hits),
            vec![
                "b.pdf, Page 1, Section 0".to_string(),
                "a.txt, Section 2".to_string(),
            ]
        );
    }

    #[test]
    fn sources_collapse_to_one_entry_per_document() {
        let hits = vec![
            hit("a.pdf", Some(1), 0, "x"),
            hit("a.pdf", Some(2), 1, "y"),
            hit("b.txt", None, 0, "z"),
            hit("a.pdf", Some(3), 2, "w"),
        ];

        let sources = dedup_sources(&hits);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].document_name, "a.pdf");
        // The first (best-scoring) chunk represents the document.
        assert_eq!(sources[0].section, 0);
        assert_eq!(sources[1].document_name, "b.txt");

        assert_eq!(
            dedup_document_names(&hits),
            vec!["a.pdf".to_string(), "b.txt".to_string()]
        );
    }

    #[test]
    fn context_carries_citations_and_word_count() {
        let hits = vec![hit("a.txt", None, 0, "alpha beta"), hit("a.txt", None, 1, "gamma")];
        let (context, words) = build_context(&hits);
        assert!(context.starts_with("[a.txt, Section 0]\nalpha beta"));
        assert!(context.contains("\n\n[a.txt, Section 1]\ngamma"));
        // Two citation lines of three words each plus the chunk text.
        assert_eq!(words, 6 + 3);
    }

    #[test]
    fn query_validation_rejects_empty_and_long() {
        assert!(matches!(
            validate_query("   ", 1000).unwrap_err(),
            Error::Validation(_)
        ));
        let long = "q".repeat(1001);
        assert!(matches!(
            validate_query(&long, 1000).unwrap_err(),
            Error::Validation(_)
        ));
        assert!(validate_query("what is this?", 1000).is_ok());
    }

    #[test]
    fn prompt_embeds_context_and_question() {
        let prompt = build_prompt("CTX", "why?");
        assert!(prompt.contains("Context:\nCTX"));
        assert!(prompt.contains("Question: why?"));
        assert!(prompt.contains("only on the provided context"));
    }
}
