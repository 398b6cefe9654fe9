//! # docq
//!
//! A document ingestion and retrieval-augmented question answering backend.
//!
//! docq ingests local documents (plain text, PDF, DOCX), splits them into
//! overlapping chunks, embeds them with a configurable provider, and stores
//! the vectors in SQLite. Questions are answered by retrieving the most
//! similar chunks and prompting a language model with a cited context.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────┐   ┌──────────┐
//! │  Upload  │──▶│  Pipeline             │──▶│  SQLite   │
//! │ txt/pdf/ │   │ extract→chunk→embed   │   │ vectors + │
//! │   docx   │   │        →index         │   │ metadata  │
//! └──────────┘   └──────────────────────┘   └────┬─────┘
//!                                                │
//!                             ┌──────────────────┤
//!                             ▼                  ▼
//!                        ┌──────────┐      ┌──────────┐
//!                        │   CLI    │      │   HTTP   │
//!                        │  (docq)  │      │ ask/SSE  │
//!                        └──────────┘      └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docq init                          # create database
//! docq ingest ./report.pdf           # extract, chunk, embed, index
//! docq ask "what are the findings?"  # cited answer from the documents
//! docq search "budget overview"      # raw semantic search
//! docq serve                         # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`extract`] | Text extraction (txt, PDF, DOCX) |
//! | [`chunk`] | Overlapping boundary-preferring splitter |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | SQLite vector index |
//! | [`storage`] | File storage and document metadata |
//! | [`progress`] | Ingestion stages and notification |
//! | [`ingest`] | Ingestion pipeline |
//! | [`llm`] | Language model abstraction |
//! | [`retriever`] | Ask, search, and summarize |
//! | [`server`] | HTTP API server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod retriever;
pub mod server;
pub mod storage;
