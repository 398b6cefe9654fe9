//! # docq CLI
//!
//! The `docq` binary drives the full pipeline from the command line:
//! database initialization, document ingestion, question answering, semantic
//! search, summaries, and the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! docq --config ./docq.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docq init` | Create the SQLite database and run schema migrations |
//! | `docq ingest <path>` | Ingest a document (txt, pdf, docx) |
//! | `docq files` | List ingested documents |
//! | `docq delete <id>` | Delete a document and its index entries |
//! | `docq ask "<query>"` | Answer a question from the documents |
//! | `docq search "<query>"` | Semantic search without answer generation |
//! | `docq summarize <id>` | Summarize one document |
//! | `docq stats` | Show index statistics |
//! | `docq reset` | Clear the index and all documents |
//! | `docq serve` | Start the HTTP API server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use docq::chunk::Splitter;
use docq::config::{self, Config};
use docq::db;
use docq::embedding::{create_embedder, Embedder};
use docq::index::{self, VectorIndex};
use docq::ingest::IngestionPipeline;
use docq::llm::create_language_model;
use docq::migrate;
use docq::models::StreamEvent;
use docq::progress::StderrProgress;
use docq::retriever::Retriever;
use docq::server;
use docq::storage::{self, FileStorage};

/// docq — document ingestion and retrieval-augmented question answering.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file with database, storage, chunking, embedding, and model settings.
#[derive(Parser)]
#[command(
    name = "docq",
    about = "docq — ask questions over your own documents",
    version,
    long_about = "docq ingests local documents (txt, pdf, docx), chunks and embeds them into a \
    SQLite vector index, and answers questions with citations by retrieving the most relevant \
    chunks and prompting a language model."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./docq.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Idempotent.
    Init,

    /// Ingest a document.
    ///
    /// Validates, stores, extracts, chunks, embeds, and indexes the file in
    /// one run. Progress is reported on stderr.
    Ingest {
        /// Path to the file (.txt, .pdf, or .docx).
        path: PathBuf,
    },

    /// List ingested documents.
    Files,

    /// Delete a document, its stored file, and its index entries.
    Delete {
        /// Document UUID.
        id: String,
    },

    /// Answer a question from the indexed documents.
    Ask {
        /// The question.
        query: String,

        /// Number of chunks to retrieve (default from config).
        #[arg(long)]
        k: Option<usize>,

        /// Restrict retrieval to one document UUID.
        #[arg(long)]
        document: Option<String>,

        /// Stream the answer token by token.
        #[arg(long)]
        stream: bool,
    },

    /// Semantic search without answer generation.
    Search {
        /// The search query.
        query: String,

        /// Number of results (default 10).
        #[arg(long)]
        k: Option<usize>,

        /// Drop results scoring below this similarity (0.0 to 1.0).
        #[arg(long, default_value_t = 0.0)]
        min_similarity: f32,

        /// Restrict search to one document UUID.
        #[arg(long)]
        document: Option<String>,
    },

    /// Summarize one document.
    Summarize {
        /// Document UUID.
        id: String,
    },

    /// Show index statistics.
    Stats,

    /// Clear the index, document metadata, and stored files.
    Reset,

    /// Start the HTTP API server.
    ///
    /// Binds to the address configured in `[server].bind`.
    Serve,
}

/// Core components shared by most commands.
struct App {
    pool: sqlx::SqlitePool,
    storage: FileStorage,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
}

async fn open_app(cfg: &Config) -> anyhow::Result<App> {
    let pool = db::connect(&cfg.db.path).await?;
    migrate::run_migrations(&pool).await?;
    let embedder = create_embedder(&cfg.embedding)?;
    let index = Arc::new(VectorIndex::open(pool.clone(), embedder.kind()).await?);
    Ok(App {
        pool,
        storage: FileStorage::new(&cfg.storage),
        index,
        embedder,
    })
}

fn build_retriever(cfg: &Config, app: &App) -> anyhow::Result<Retriever> {
    let llm = create_language_model(&cfg.llm)?;
    Ok(Retriever::new(
        app.pool.clone(),
        app.index.clone(),
        app.embedder.clone(),
        llm,
        cfg.retrieval.clone(),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { path } => {
            let app = open_app(&cfg).await?;
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| anyhow::anyhow!("path has no filename: {}", path.display()))?
                .to_string();
            let bytes = std::fs::read(&path)?;

            let splitter = Splitter::new(cfg.chunking.chunk_size, cfg.chunking.overlap)?;
            let pipeline = IngestionPipeline::new(
                app.pool.clone(),
                app.storage.clone(),
                app.index.clone(),
                app.embedder.clone(),
                splitter,
                Arc::new(StderrProgress),
            );

            let report = pipeline.ingest_bytes(&filename, &bytes).await?;
            println!("ingest {}", filename);
            println!("  document id: {}", report.document.id);
            println!("  chunks indexed: {}", report.chunks);
            println!("  collection total: {}", report.collection_total);
            println!("ok");
        }
        Commands::Files => {
            let app = open_app(&cfg).await?;
            let files = storage::list_documents(&app.pool).await?;
            if files.is_empty() {
                println!("no documents ingested");
            } else {
                for doc in &files {
                    println!(
                        "{}  {}  {} bytes  {}",
                        doc.id, doc.display_name, doc.byte_size, doc.created_at
                    );
                }
                println!("{} document(s)", files.len());
            }
        }
        Commands::Delete { id } => {
            let app = open_app(&cfg).await?;
            let doc = storage::get_document(&app.pool, &id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("document not found: {}", id))?;

            app.storage.delete(&doc.stored_filename).await?;
            storage::delete_document(&app.pool, &id).await?;
            match app.index.delete_by_document(&id).await {
                Ok(n) => println!("delete {}\n  index entries removed: {}\nok", id, n),
                Err(e) => {
                    eprintln!("warning: index cleanup failed: {}", e);
                    println!("delete {}\nok", id);
                }
            }
        }
        Commands::Ask {
            query,
            k,
            document,
            stream,
        } => {
            let app = open_app(&cfg).await?;
            let retriever = build_retriever(&cfg, &app)?;

            if stream {
                let mut events = retriever
                    .ask_streaming(&query, k, document.as_deref())
                    .await?;
                use std::io::Write;
                while let Some(event) = events.recv().await {
                    match event {
                        StreamEvent::Metadata {
                            retrieved_documents,
                            citations,
                            ..
                        } => {
                            eprintln!("retrieved {} chunk(s)", retrieved_documents);
                            for c in &citations {
                                eprintln!("  [{}]", c);
                            }
                        }
                        StreamEvent::Token { token, .. } => {
                            print!("{}", token);
                            std::io::stdout().flush()?;
                        }
                        StreamEvent::Complete { .. } => println!(),
                        StreamEvent::Error { message } => {
                            println!();
                            anyhow::bail!("stream failed: {}", message);
                        }
                    }
                }
            } else {
                let response = retriever.ask(&query, k, document.as_deref()).await?;
                println!("{}", response.answer);
                if !response.citations.is_empty() {
                    println!();
                    println!("sources:");
                    for c in &response.citations {
                        println!("  [{}]", c);
                    }
                }
            }
        }
        Commands::Search {
            query,
            k,
            min_similarity,
            document,
        } => {
            let app = open_app(&cfg).await?;
            let retriever = build_retriever(&cfg, &app)?;
            let results = retriever
                .search(&query, k, min_similarity, document.as_deref())
                .await?;

            if results.is_empty() {
                println!("no results");
            } else {
                for hit in &results {
                    let page = hit
                        .page
                        .map(|p| format!(", Page {}", p))
                        .unwrap_or_default();
                    println!(
                        "{}. [{:.3}] {}{}, Section {}",
                        hit.rank, hit.score, hit.document_name, page, hit.section
                    );
                    let preview: String = hit.text.chars().take(160).collect();
                    println!("   {}", preview.replace('\n', " "));
                }
            }
        }
        Commands::Summarize { id } => {
            let app = open_app(&cfg).await?;
            let retriever = build_retriever(&cfg, &app)?;
            let response = retriever.summarize(&id).await?;
            println!("summary of {}", response.document_name);
            println!("  sections analyzed: {}", response.sections_analyzed);
            println!();
            println!("{}", response.summary);
        }
        Commands::Stats => {
            let app = open_app(&cfg).await?;
            let stats = app.index.stats().await?;
            println!("index stats");
            println!("  collection: {}", stats.collection);
            println!("  model: {}", stats.model);
            println!("  dims: {}", stats.dims);
            println!("  entries: {}", stats.entries);
            println!("  documents: {}", stats.documents);
        }
        Commands::Reset => {
            // Deliberately avoids opening the index, so a reset still works
            // after the embedding configuration changed.
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            let file_storage = FileStorage::new(&cfg.storage);

            index::reset_all(&pool).await?;
            let docs = storage::list_documents(&pool).await?;
            for doc in &docs {
                if let Err(e) = file_storage.delete(&doc.stored_filename).await {
                    eprintln!("warning: failed to remove {}: {}", doc.stored_filename, e);
                }
                storage::delete_document(&pool, &doc.id).await?;
            }
            println!("reset");
            println!("  documents removed: {}", docs.len());
            println!("ok");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
