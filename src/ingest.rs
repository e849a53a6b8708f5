//! Ingestion and the library facade.
//!
//! [`KnowledgeBase`] ties the pipeline together: an upload is validated,
//! extracted, chunked and embedded entirely in memory, then the document
//! row, the stored file and the chunks are committed together. A failure
//! at any step leaves no rows and no file behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlx::SqlitePool;
use walkdir::WalkDir;

use crate::activation::ActivationRegistry;
use crate::chunk::{chunk_document, ChunkParams};
use crate::config::Config;
use crate::db;
use crate::embedding::{check_batch, create_embedder, Embedder};
use crate::error::{CoreError, ExtractError, Result};
use crate::extract::{Extractor, Format};
use crate::migrate::run_migrations;
use crate::models::{
    ChunkDraft, Document, DocumentDetail, DocumentListing, DocumentScope, NewDocument,
    ReindexReport, Requester, RetrievalHit, Visibility,
};
use crate::retriever::{RetrievalMode, Retriever};
use crate::store::IndexStore;

/// Per-file outcome of [`KnowledgeBase::ingest_dir`].
#[derive(Debug, Default)]
pub struct DirIngestReport {
    pub ingested: Vec<Document>,
    pub failed: Vec<(PathBuf, CoreError)>,
}

pub struct KnowledgeBase {
    config: Config,
    store: Arc<IndexStore>,
    activations: ActivationRegistry,
    retriever: Retriever,
    extractor: Extractor,
    embedder: Arc<dyn Embedder>,
}

impl KnowledgeBase {
    /// Connect, migrate, and build the embedder named in `config`.
    pub async fn open(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        Self::with_embedder(config, embedder).await
    }

    /// Like [`open`](Self::open) but with a caller-supplied embedder.
    pub async fn with_embedder(config: Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let pool = db::connect(&config).await?;
        run_migrations(&pool).await?;

        let store = Arc::new(IndexStore::new(pool.clone()));
        Ok(Self {
            activations: ActivationRegistry::new(pool),
            retriever: Retriever::new(
                Arc::clone(&store),
                Arc::clone(&embedder),
                config.retrieval.clone(),
            ),
            extractor: Extractor::new(config.extraction.clone()),
            store,
            embedder,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        self.store.pool()
    }

    pub async fn close(self) {
        self.store.pool().close().await;
    }

    fn chunk_params(&self) -> ChunkParams {
        ChunkParams {
            window: self.config.chunking.window_tokens,
            overlap: self.config.chunking.overlap_tokens,
        }
    }

    /// Store and index an uploaded file.
    pub async fn ingest(
        &self,
        owner_id: i64,
        filename: &str,
        bytes: &[u8],
        visibility: Visibility,
    ) -> Result<Document> {
        validate_filename(filename)?;

        let text = self.extractor.extract_bytes(filename, bytes).await?;
        let chunks = chunk_document(&text, self.chunk_params());
        if chunks.is_empty() {
            return Err(CoreError::InvalidUpload(format!(
                "{} contains no extractable text",
                filename
            )));
        }
        let vectors = self.embed_chunks(&chunks).await?;

        let new = NewDocument {
            owner_id,
            filename: filename.to_string(),
            visibility,
        };
        let mut placed_dir: Option<PathBuf> = None;
        let storage_root = self.config.storage.root.as_path();
        let result = self
            .store
            .insert_document(&new, &chunks, &vectors, |id| {
                let dir = document_dir(storage_root, owner_id, id, visibility);
                placed_dir = Some(dir.clone());
                std::fs::create_dir_all(&dir)?;
                let path = dir.join(filename);
                std::fs::write(&path, bytes)?;
                Ok(path.to_string_lossy().into_owned())
            })
            .await;

        match result {
            Ok(document) => {
                tracing::info!(
                    document_id = document.id,
                    owner_id,
                    filename,
                    chunks = chunks.len(),
                    public = visibility.is_public(),
                    "ingested document"
                );
                Ok(document)
            }
            Err(e) => {
                if let Some(dir) = placed_dir {
                    remove_dir_quietly(&dir);
                }
                Err(e)
            }
        }
    }

    /// Ingest a file from disk under its own file name.
    pub async fn ingest_path(
        &self,
        owner_id: i64,
        path: &Path,
        visibility: Visibility,
    ) -> Result<Document> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| CoreError::InvalidUpload(format!("{} has no file name", path.display())))?;
        let size = tokio::fs::metadata(path).await?.len();
        if size > self.config.extraction.max_file_bytes {
            return Err(CoreError::Extraction(ExtractError::TooLarge {
                size,
                max: self.config.extraction.max_file_bytes,
            }));
        }
        let bytes = tokio::fs::read(path).await?;
        self.ingest(owner_id, &filename, &bytes, visibility).await
    }

    /// Ingest every file under `dir`. A failing file is recorded and the
    /// walk continues.
    pub async fn ingest_dir(
        &self,
        owner_id: i64,
        dir: &Path,
        visibility: Visibility,
    ) -> Result<DirIngestReport> {
        if !dir.is_dir() {
            return Err(CoreError::NotFound(format!("directory {}", dir.display())));
        }

        let mut report = DirIngestReport::default();
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            match entry {
                Ok(e) if e.file_type().is_file() => files.push(e.into_path()),
                Ok(_) => {}
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable entry");
                    report.failed.push((path, CoreError::Io(e.into())));
                }
            }
        }

        for path in files {
            match self.ingest_path(owner_id, &path, visibility).await {
                Ok(doc) => report.ingested.push(doc),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to ingest file");
                    report.failed.push((path, e));
                }
            }
        }
        Ok(report)
    }

    /// Top passages for the user's scope.
    pub async fn search(
        &self,
        query: &str,
        user_id: i64,
        top_k: usize,
        include_inactive: bool,
    ) -> Result<Vec<RetrievalHit>> {
        self.retriever
            .retrieve(query, user_id, top_k, include_inactive, RetrievalMode::Flat)
            .await
    }

    /// The best passage from each of the top documents.
    pub async fn search_best_per_document(
        &self,
        query: &str,
        user_id: i64,
        top_k: usize,
        include_inactive: bool,
    ) -> Result<Vec<RetrievalHit>> {
        self.retriever
            .retrieve(
                query,
                user_id,
                top_k,
                include_inactive,
                RetrievalMode::BestPerDocument,
            )
            .await
    }

    pub async fn set_activation(&self, user_id: i64, document_id: i64, active: bool) -> Result<()> {
        self.activations
            .set_activation(user_id, document_id, active)
            .await
    }

    pub async fn toggle_activation(&self, user_id: i64, document_id: i64) -> Result<bool> {
        self.activations
            .toggle_activation(user_id, document_id)
            .await
    }

    /// Delete a document and its stored file.
    ///
    /// Private documents may be deleted by their owner, public documents by
    /// an administrator. Anything else reports `NotFound`.
    pub async fn delete_document(&self, document_id: i64, requester: Requester) -> Result<()> {
        let not_found =
            || CoreError::NotFound(format!("document {} for user {}", document_id, requester.user_id));

        let document = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(not_found)?;
        let allowed = match document.visibility {
            Visibility::Private => document.owner_id == requester.user_id,
            Visibility::Public => requester.is_admin,
        };
        if !allowed {
            return Err(not_found());
        }

        let removed = self.store.delete_document(document_id).await?;
        if let Some(dir) = Path::new(&removed.filepath).parent() {
            remove_dir_quietly(dir);
        }

        tracing::info!(document_id, user_id = requester.user_id, "deleted document");
        Ok(())
    }

    pub async fn list_documents(
        &self,
        user_id: i64,
        scope: DocumentScope,
    ) -> Result<Vec<DocumentListing>> {
        self.store.list_documents(user_id, scope).await
    }

    /// A visible document with its passages in order.
    pub async fn get_document(&self, document_id: i64, user_id: i64) -> Result<DocumentDetail> {
        let document = self
            .store
            .get_document(document_id)
            .await?
            .filter(|d| d.owner_id == user_id || d.visibility.is_public())
            .ok_or_else(|| {
                CoreError::NotFound(format!("document {} for user {}", document_id, user_id))
            })?;

        let passages = self
            .store
            .document_chunks(document_id)
            .await?
            .into_iter()
            .map(|c| c.text)
            .collect();
        Ok(DocumentDetail { document, passages })
    }

    /// Rebuild a document's chunks from its stored file with the current
    /// chunking parameters and embedder.
    pub async fn reindex_document(&self, document_id: i64) -> Result<ReindexReport> {
        let document = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("document {}", document_id)))?;

        let text = self.extractor.extract(Path::new(&document.filepath)).await?;
        let chunks = chunk_document(&text, self.chunk_params());
        let vectors = self.embed_chunks(&chunks).await?;

        let previous = self.store.document_chunks(document_id).await?;
        self.store
            .index_document(document_id, &chunks, &vectors)
            .await?;

        let report = ReindexReport {
            previous_chunks: previous.len(),
            chunks: chunks.len(),
            changed: count_changed(&previous, &chunks),
        };
        tracing::info!(
            document_id,
            previous = report.previous_chunks,
            chunks = report.chunks,
            changed = report.changed,
            "reindexed document"
        );
        Ok(report)
    }

    async fn embed_chunks(&self, chunks: &[ChunkDraft]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        check_batch(self.embedder.as_ref(), texts.len(), &vectors)?;
        Ok(vectors)
    }
}

/// Reject names that are empty, carry path components, or have an
/// extension we cannot extract.
pub fn validate_filename(filename: &str) -> Result<()> {
    if filename.trim().is_empty() {
        return Err(CoreError::InvalidUpload("empty filename".to_string()));
    }
    if filename == "."
        || filename == ".."
        || filename.contains(['/', '\\', '\0'])
    {
        return Err(CoreError::InvalidUpload(format!(
            "filename must not contain path components: {}",
            filename
        )));
    }
    Format::from_path(Path::new(filename))?;
    Ok(())
}

/// `<root>/<owner>/<doc>` for private documents, `<root>/public/<doc>` for
/// public ones.
pub fn document_dir(root: &Path, owner_id: i64, document_id: i64, visibility: Visibility) -> PathBuf {
    match visibility {
        Visibility::Private => root.join(owner_id.to_string()).join(document_id.to_string()),
        Visibility::Public => root.join("public").join(document_id.to_string()),
    }
}

fn count_changed(previous: &[ChunkDraft], current: &[ChunkDraft]) -> usize {
    let old: HashMap<i64, &str> = previous
        .iter()
        .map(|c| (c.ordinal, c.hash.as_str()))
        .collect();
    current
        .iter()
        .filter(|c| old.get(&c.ordinal) != Some(&c.hash.as_str()))
        .count()
}

fn remove_dir_quietly(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to remove document directory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("notes.md").is_ok());
        assert!(validate_filename("Lecture 3.PDF").is_ok());
        assert!(matches!(
            validate_filename(""),
            Err(CoreError::InvalidUpload(_))
        ));
        assert!(matches!(
            validate_filename("../etc/passwd.txt"),
            Err(CoreError::InvalidUpload(_))
        ));
        assert!(matches!(
            validate_filename("a\\b.txt"),
            Err(CoreError::InvalidUpload(_))
        ));
        assert!(matches!(
            validate_filename("slides.pptx"),
            Err(CoreError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_document_dir_layout() {
        let root = Path::new("/srv/docs");
        assert_eq!(
            document_dir(root, 7, 42, Visibility::Private),
            PathBuf::from("/srv/docs/7/42")
        );
        assert_eq!(
            document_dir(root, 7, 42, Visibility::Public),
            PathBuf::from("/srv/docs/public/42")
        );
    }

    #[test]
    fn test_count_changed() {
        let params = ChunkParams { window: 2, overlap: 0 };
        let old = chunk_document("a b c d", params);
        let new = chunk_document("a b x d e f", params);
        // ordinal 0 same, 1 differs, 2 is new
        assert_eq!(count_changed(&old, &new), 2);
        assert_eq!(count_changed(&old, &old), 0);
    }
}
