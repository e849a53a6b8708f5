//! Core data models used throughout the retrieval core.
//!
//! These types represent the documents, chunks, activation flags and
//! retrieval hits that flow through the ingest and search paths.

use serde::Serialize;

/// Whether a document belongs to its uploader alone or to the shared pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Public,
}

impl Visibility {
    pub fn is_public(self) -> bool {
        matches!(self, Visibility::Public)
    }

    pub fn from_flag(is_public: bool) -> Self {
        if is_public {
            Visibility::Public
        } else {
            Visibility::Private
        }
    }
}

/// Which documents `list_documents` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentScope {
    /// Documents uploaded by the user.
    Mine,
    /// The shared public pool.
    Public,
}

/// Who is asking for a destructive operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub user_id: i64,
    pub is_admin: bool,
}

impl Requester {
    pub fn user(user_id: i64) -> Self {
        Self {
            user_id,
            is_admin: false,
        }
    }

    pub fn admin(user_id: i64) -> Self {
        Self {
            user_id,
            is_admin: true,
        }
    }
}

/// Document row as stored in SQLite.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub owner_id: i64,
    pub filename: String,
    pub filepath: String,
    pub visibility: Visibility,
    /// Unix seconds.
    pub uploaded_at: i64,
}

/// Validated upload metadata, before a document id exists.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub owner_id: i64,
    pub filename: String,
    pub visibility: Visibility,
}

/// A chunk produced by the chunker, not yet embedded or stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub ordinal: i64,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A chunk as read back from the index, with its raw vector bytes.
///
/// The vector stays encoded until scoring so a corrupt blob only costs
/// the one chunk it belongs to.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub document_id: i64,
    pub ordinal: i64,
    pub text: String,
    pub embedding: Vec<u8>,
}

/// Document plus the requesting user's activation state.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentListing {
    #[serde(flatten)]
    pub document: Document,
    pub is_active: bool,
}

/// Full document with its passages in ordinal order.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentDetail {
    #[serde(flatten)]
    pub document: Document,
    pub passages: Vec<String>,
}

/// One ranked passage returned from a search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalHit {
    pub document_id: i64,
    pub ordinal: i64,
    pub passage: String,
    pub score: f32,
}

/// Outcome of re-indexing a stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    pub previous_chunks: usize,
    pub chunks: usize,
    /// Ordinals whose text differs from the previous index (or is new).
    pub changed: usize,
}

/// Ranked hits for one query, best first.
pub type RetrievalResult = Vec<RetrievalHit>;
