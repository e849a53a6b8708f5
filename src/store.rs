//! SQLite-backed index store.
//!
//! Owns the `documents`, `chunks` and `chunks_fts` tables. Chunk sets are
//! only ever replaced whole, inside one transaction, so a reader sees
//! either the complete old set or the complete new one. Writers to the
//! same document are serialised with a per-document async lock; different
//! documents index in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::embedding::vec_to_blob;
use crate::error::{CoreError, EmbedError, Result};
use crate::models::{
    ChunkDraft, Document, DocumentListing, DocumentScope, NewDocument, StoredChunk, Visibility,
};

const DOCUMENT_COLUMNS: &str = "d.id, d.owner_id, d.filename, d.filepath, d.is_public, d.uploaded_at";

pub struct IndexStore {
    pool: SqlitePool,
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl IndexStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn lock_document(&self, document_id: i64) -> DocumentLock<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(document_id).or_default())
        };
        DocumentLock {
            store: self,
            document_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Drop the map entry for `document_id` unless another task holds or
    /// waits on it.
    fn release_lock(&self, document_id: i64) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&document_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&document_id);
        }
    }

    /// Open a write transaction that takes SQLite's write lock up front, so
    /// it waits on `busy_timeout` instead of failing when it later upgrades
    /// a stale read snapshot.
    async fn begin_write(&self) -> std::result::Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin_with("BEGIN IMMEDIATE").await
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Create a document with its chunks in one transaction.
    ///
    /// `place_file` runs after the row exists, receives the new id and must
    /// persist the upload, returning its stored path. Any error from it or
    /// from the chunk writes rolls the whole insert back.
    pub async fn insert_document<F>(
        &self,
        new: &NewDocument,
        chunks: &[ChunkDraft],
        vectors: &[Vec<f32>],
        place_file: F,
    ) -> Result<Document>
    where
        F: FnOnce(i64) -> Result<String> + Send,
    {
        check_lengths(chunks, vectors)?;
        let uploaded_at = chrono::Utc::now().timestamp();

        let mut tx = self.begin_write().await?;
        let id = sqlx::query(
            "INSERT INTO documents (owner_id, filename, filepath, is_public, uploaded_at) VALUES (?, ?, '', ?, ?)",
        )
        .bind(new.owner_id)
        .bind(&new.filename)
        .bind(new.visibility.is_public())
        .bind(uploaded_at)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let filepath = place_file(id)?;
        sqlx::query("UPDATE documents SET filepath = ? WHERE id = ?")
            .bind(&filepath)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        write_chunks(&mut tx, id, chunks, vectors)
            .await
            .map_err(CoreError::IndexWriteFailed)?;
        tx.commit().await.map_err(CoreError::IndexWriteFailed)?;

        Ok(Document {
            id,
            owner_id: new.owner_id,
            filename: new.filename.clone(),
            filepath,
            visibility: new.visibility,
            uploaded_at,
        })
    }

    /// Atomically replace every chunk of an existing document.
    pub async fn index_document(
        &self,
        document_id: i64,
        chunks: &[ChunkDraft],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        check_lengths(chunks, vectors)?;
        let _lock = self.lock_document(document_id).await;

        let mut tx = self.begin_write().await?;
        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_one(&mut *tx)
            .await?;
        if !exists {
            return Err(CoreError::NotFound(format!("document {}", document_id)));
        }

        replace_chunks(&mut tx, document_id, chunks, vectors)
            .await
            .map_err(CoreError::IndexWriteFailed)?;
        tx.commit().await.map_err(CoreError::IndexWriteFailed)?;

        tracing::debug!(document_id, chunks = chunks.len(), "replaced chunk set");
        Ok(())
    }

    /// Remove a document. Chunks and activation rows cascade; lexical rows
    /// are deleted explicitly. Returns the removed row so the caller can
    /// clean up the stored file.
    pub async fn delete_document(&self, document_id: i64) -> Result<Document> {
        let _lock = self.lock_document(document_id).await;

        let mut tx = self.begin_write().await?;
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents d WHERE d.id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(document_id)
        .fetch_optional(&mut *tx)
        .await?;
        let document = match row {
            Some(row) => document_from_row(&row),
            None => return Err(CoreError::NotFound(format!("document {}", document_id))),
        };

        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(document)
    }

    pub async fn get_document(&self, document_id: i64) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents d WHERE d.id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(document_from_row))
    }

    /// Chunks of one document in ordinal order, without vectors.
    pub async fn document_chunks(&self, document_id: i64) -> Result<Vec<ChunkDraft>> {
        let rows = sqlx::query(
            "SELECT ordinal, text, hash FROM chunks WHERE document_id = ? ORDER BY ordinal",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ChunkDraft {
                ordinal: row.get("ordinal"),
                text: row.get("text"),
                hash: row.get("hash"),
            })
            .collect())
    }

    /// Every chunk of every document in the user's scope, read in one
    /// statement.
    pub async fn candidates_for_scope(
        &self,
        user_id: i64,
        include_inactive: bool,
    ) -> Result<Vec<StoredChunk>> {
        let (scope, binds) = scope_clause(include_inactive);
        let sql = format!(
            r#"
            SELECT c.document_id, c.ordinal, c.text, c.embedding
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE {}
            ORDER BY c.document_id, c.ordinal
            "#,
            scope
        );

        let mut query = sqlx::query(&sql);
        for _ in 0..binds {
            query = query.bind(user_id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(stored_chunk_from_row).collect())
    }

    /// Chunks in scope matching any query term, best FTS rank first.
    ///
    /// A query with no usable terms yields no candidates.
    pub async fn lexical_candidates(
        &self,
        user_id: i64,
        include_inactive: bool,
        query: &str,
        limit: i64,
    ) -> Result<Vec<StoredChunk>> {
        let fts = match fts_query(query) {
            Some(q) => q,
            None => return Ok(Vec::new()),
        };

        let (scope, binds) = scope_clause(include_inactive);
        let sql = format!(
            r#"
            SELECT c.document_id, c.ordinal, c.text, c.embedding
            FROM chunks_fts
            JOIN chunks c ON c.document_id = chunks_fts.document_id
                         AND c.ordinal = chunks_fts.ordinal
            JOIN documents d ON d.id = c.document_id
            WHERE chunks_fts MATCH ? AND {}
            ORDER BY rank
            LIMIT ?
            "#,
            scope
        );

        let mut q = sqlx::query(&sql).bind(fts);
        for _ in 0..binds {
            q = q.bind(user_id);
        }
        let rows = q.bind(limit).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(stored_chunk_from_row).collect())
    }

    /// Documents the user uploaded, or the public pool, with the user's
    /// activation state. Newest first.
    pub async fn list_documents(
        &self,
        user_id: i64,
        scope: DocumentScope,
    ) -> Result<Vec<DocumentListing>> {
        let filter = match scope {
            DocumentScope::Mine => "d.owner_id = ?",
            DocumentScope::Public => "d.is_public = 1",
        };
        let sql = format!(
            r#"
            SELECT {}, COALESCE(a.is_active, 0) AS is_active
            FROM documents d
            LEFT JOIN activations a ON a.document_id = d.id AND a.user_id = ?
            WHERE {}
            ORDER BY d.uploaded_at DESC, d.id DESC
            "#,
            DOCUMENT_COLUMNS, filter
        );

        let mut query = sqlx::query(&sql).bind(user_id);
        if scope == DocumentScope::Mine {
            query = query.bind(user_id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| DocumentListing {
                document: document_from_row(row),
                is_active: row.get::<bool, _>("is_active"),
            })
            .collect())
    }
}

/// Exclusive hold on one document's write lock. Dropping it releases the
/// lock and prunes the map entry once nobody else is using it.
struct DocumentLock<'a> {
    store: &'a IndexStore,
    document_id: i64,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DocumentLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.store.release_lock(self.document_id);
    }
}

/// SQL predicate over `documents d` selecting the user's search scope, and
/// how many times the user id must be bound for it.
fn scope_clause(include_inactive: bool) -> (&'static str, usize) {
    if include_inactive {
        ("(d.owner_id = ? OR d.is_public = 1)", 1)
    } else {
        (
            "EXISTS (SELECT 1 FROM activations a \
               WHERE a.user_id = ? AND a.document_id = d.id AND a.is_active = 1) \
             AND (d.owner_id = ? OR d.is_public = 1)",
            2,
        )
    }
}

/// Turn free text into an FTS5 query: alphanumeric terms, each quoted,
/// joined with OR. Returns `None` when nothing searchable remains.
pub fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

fn check_lengths(chunks: &[ChunkDraft], vectors: &[Vec<f32>]) -> Result<()> {
    if chunks.len() != vectors.len() {
        return Err(CoreError::Embedding(EmbedError::Inference(format!(
            "{} chunks but {} vectors",
            chunks.len(),
            vectors.len()
        ))));
    }
    Ok(())
}

async fn replace_chunks(
    tx: &mut Transaction<'_, Sqlite>,
    document_id: i64,
    chunks: &[ChunkDraft],
    vectors: &[Vec<f32>],
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut **tx)
        .await?;
    write_chunks(tx, document_id, chunks, vectors).await
}

async fn write_chunks(
    tx: &mut Transaction<'_, Sqlite>,
    document_id: i64,
    chunks: &[ChunkDraft],
    vectors: &[Vec<f32>],
) -> std::result::Result<(), sqlx::Error> {
    for (chunk, vector) in chunks.iter().zip(vectors) {
        sqlx::query(
            "INSERT INTO chunks (document_id, ordinal, text, hash, embedding) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(document_id)
        .bind(chunk.ordinal)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .bind(vec_to_blob(vector))
        .execute(&mut **tx)
        .await?;

        sqlx::query("INSERT INTO chunks_fts (document_id, ordinal, text) VALUES (?, ?, ?)")
            .bind(document_id)
            .bind(chunk.ordinal)
            .bind(&chunk.text)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

fn document_from_row(row: &SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        filename: row.get("filename"),
        filepath: row.get("filepath"),
        visibility: Visibility::from_flag(row.get::<bool, _>("is_public")),
        uploaded_at: row.get("uploaded_at"),
    }
}

fn stored_chunk_from_row(row: &SqliteRow) -> StoredChunk {
    StoredChunk {
        document_id: row.get("document_id"),
        ordinal: row.get("ordinal"),
        text: row.get("text"),
        embedding: row.get("embedding"),
    }
}
