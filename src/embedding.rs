//! Embedding model abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and two implementations:
//! - **`LocalEmbedder`**: runs a sentence-embedding model locally via
//!   fastembed (feature `local-embeddings`). The model is loaded once, on
//!   first use, and shared for the life of the process.
//! - **[`HashEmbedder`]**: deterministic feature hashing. No model files,
//!   no network; suited to offline deployments and tests.
//!
//! Also provides the vector helpers used by the index store and retriever:
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for a SQLite BLOB
//! - [`decode_vector`]: decode a BLOB, rejecting wrong-length or non-finite data
//! - [`dot_product`]: inner-product similarity
//!
//! # Provider Selection
//!
//! ```rust
//! # use knowledge_core::config::EmbeddingConfig;
//! # use knowledge_core::embedding::{create_embedder, Embedder};
//! let config = EmbeddingConfig {
//!     provider: "hash".to_string(),
//!     dims: 64,
//!     ..EmbeddingConfig::default()
//! };
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.dims(), 64);
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;
use crate::error::EmbedError;

/// A text embedding model.
///
/// Implementations must be pure: the same text always maps to the same
/// vector, independent of batch composition or order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;

    /// Output vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embed a single text (e.g. a search query).
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut out = self.embed(&[text.to_string()]).await?;
        out.pop()
            .ok_or_else(|| EmbedError::Inference("empty embedding response".to_string()))
    }
}

/// Check a batch result against the embedder's declared shape.
pub fn check_batch(
    embedder: &dyn Embedder,
    expected: usize,
    vectors: &[Vec<f32>],
) -> Result<(), EmbedError> {
    if vectors.len() != expected {
        return Err(EmbedError::Inference(format!(
            "expected {} vectors, got {}",
            expected,
            vectors.len()
        )));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != embedder.dims()) {
        return Err(EmbedError::Inference(format!(
            "model {} returned a {}-dim vector, expected {}",
            embedder.model_name(),
            bad.len(),
            embedder.dims()
        )));
    }
    Ok(())
}

// ============ Hash Embedder ============

/// Signed feature-hashing embedder.
///
/// Lowercased alphanumeric tokens are hashed into `dims` buckets with a
/// hash-derived sign, then the vector is L2-normalised. Texts sharing
/// vocabulary score higher under inner product.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut word = [0u8; 8];
            word.copy_from_slice(&digest[..8]);
            let h = u64::from_le_bytes(word);
            let bucket = (h % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        normalize(&mut v);
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "feature-hash"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

// ============ Local Embedder ============

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

#[cfg(feature = "local-embeddings")]
mod local {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::OnceCell;

    use super::Embedder;
    use crate::config::EmbeddingConfig;
    use crate::error::EmbedError;

    /// Local sentence-embedding model run through fastembed (ONNX Runtime).
    ///
    /// Construction is cheap. The model is downloaded/loaded on the first
    /// `embed` call; concurrent first callers wait on the same load.
    pub struct LocalEmbedder {
        model_name: String,
        dims: usize,
        batch_size: usize,
        model: OnceCell<Arc<Mutex<fastembed::TextEmbedding>>>,
    }

    impl LocalEmbedder {
        pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
            // Fail on unknown names at startup, not at first query.
            config_to_fastembed_model(&config.model)?;
            Ok(Self {
                model_name: config.model.clone(),
                dims: config.dims,
                batch_size: config.batch_size,
                model: OnceCell::new(),
            })
        }

        async fn model(&self) -> Result<Arc<Mutex<fastembed::TextEmbedding>>, EmbedError> {
            let model = self
                .model
                .get_or_try_init(|| async {
                    let which = config_to_fastembed_model(&self.model_name)?;
                    tracing::info!(model = %self.model_name, "loading local embedding model");
                    let loaded = tokio::task::spawn_blocking(move || {
                        fastembed::TextEmbedding::try_new(
                            fastembed::InitOptions::new(which).with_show_download_progress(false),
                        )
                    })
                    .await
                    .map_err(|e| EmbedError::ModelLoad(e.to_string()))?
                    .map_err(|e| EmbedError::ModelLoad(e.to_string()))?;
                    Ok::<_, EmbedError>(Arc::new(Mutex::new(loaded)))
                })
                .await?;
            Ok(Arc::clone(model))
        }
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let model = self.model().await?;
            let texts = texts.to_vec();
            let batch_size = self.batch_size;

            tokio::task::spawn_blocking(move || {
                let mut guard = model
                    .lock()
                    .map_err(|_| EmbedError::Inference("embedding model lock poisoned".into()))?;
                guard
                    .embed(texts, Some(batch_size))
                    .map_err(|e| EmbedError::Inference(e.to_string()))
            })
            .await
            .map_err(|e| EmbedError::Inference(e.to_string()))?
        }
    }

    fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel, EmbedError> {
        match name {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
            other => Err(EmbedError::ModelLoad(format!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, multilingual-e5-small",
                other
            ))),
        }
    }
}

/// Create the process-wide [`Embedder`] from configuration.
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"local"` | `LocalEmbedder` (requires feature `local-embeddings`) |
/// | `"hash"` | [`HashEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbedError> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dims))),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(EmbedError::ProviderUnavailable("local".to_string())),
        other => Err(EmbedError::ProviderUnavailable(other.to_string())),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use knowledge_core::embedding::{decode_vector, vec_to_blob};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(decode_vector(&blob, 3), Some(v));
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
///
/// Returns `None` if the blob does not hold exactly `dims` values or any
/// value is NaN or infinite.
pub fn decode_vector(blob: &[u8], dims: usize) -> Option<Vec<f32>> {
    if blob.len() != dims * 4 {
        return None;
    }
    let v: Vec<f32> = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if v.iter().all(|x| x.is_finite()) {
        Some(v)
    } else {
        None
    }
}

/// Inner product of two equal-length vectors.
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
