//! # Knowledge Core
//!
//! Document ingestion and scoped passage retrieval for a multi-user
//! knowledge base.
//!
//! Uploaded files are converted to text, split into overlapping token
//! windows, embedded, and stored in SQLite alongside an FTS5 index. Each
//! user searches only the documents they own or that are public, and by
//! default only the ones they have activated.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────┐   ┌──────────┐   ┌─────────────┐
//! │  Extract  │──▶│  Chunk  │──▶│  Embed   │──▶│ Index store │
//! │ txt/docx/ │   │ 400/50  │   │ local or │   │ SQLite+FTS5 │
//! │ pdf/doc   │   │ tokens  │   │ hash     │   └──────┬──────┘
//! └───────────┘   └─────────┘   └──────────┘          │
//!                                                     ▼
//!                     ┌────────────┐          ┌──────────────┐
//!                     │ Activation │─ scope ─▶│  Retriever   │
//!                     │  registry  │          │ FTS ▸ vector │
//!                     └────────────┘          └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error types |
//! | [`extract`] | Text extraction per file format |
//! | [`chunk`] | Sliding-window chunking |
//! | [`embedding`] | Embedder trait and implementations |
//! | [`store`] | Documents, chunks and lexical index |
//! | [`activation`] | Per-user activation flags |
//! | [`retriever`] | Scoped ranking |
//! | [`ingest`] | The [`KnowledgeBase`](ingest::KnowledgeBase) facade |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod activation;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod retriever;
pub mod store;

pub use error::{CoreError, Result};
pub use ingest::KnowledgeBase;
