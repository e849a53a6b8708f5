//! Error types for the retrieval core.
//!
//! Library operations return [`CoreError`]. Extraction has its own
//! [`ExtractError`] so callers of [`crate::extract`] must handle the
//! degraded-environment case explicitly; it folds into `CoreError` at the
//! ingest boundary.

use thiserror::Error;

/// Top-level error for ingest, indexing, scope management and search.
#[derive(Error, Debug)]
pub enum CoreError {
    /// File extension is not one we know how to extract. Permanent.
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// The environment cannot extract this format right now (converter
    /// missing or timed out). Retryable once the environment is fixed.
    #[error("text extraction unavailable: {0}")]
    ExtractionUnavailable(String),

    /// The file was recognised but its content could not be parsed.
    #[error("text extraction failed: {0}")]
    Extraction(ExtractError),

    /// The upload itself was rejected before extraction.
    #[error("invalid upload: {0}")]
    InvalidUpload(String),

    /// Unknown document, or a (user, document) pair the user may not act on.
    #[error("not found: {0}")]
    NotFound(String),

    /// The atomic chunk replace failed and was rolled back.
    #[error("index write failed: {0}")]
    IndexWriteFailed(#[source] sqlx::Error),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbedError),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// True when the uploader can fix the problem themselves (convert or
    /// repair the file). False means an administrator has to act; local
    /// I/O during extraction (spill files, reads) is the server's problem.
    pub fn is_user_fixable(&self) -> bool {
        match self {
            CoreError::Extraction(ExtractError::Io(_)) => false,
            CoreError::UnsupportedFormat(_)
            | CoreError::Extraction(_)
            | CoreError::InvalidUpload(_) => true,
            _ => false,
        }
    }
}

impl From<ExtractError> for CoreError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::UnsupportedFormat(ext) => CoreError::UnsupportedFormat(ext),
            ExtractError::Unavailable(reason) => CoreError::ExtractionUnavailable(reason),
            other => CoreError::Extraction(other),
        }
    }
}

/// Text extraction errors. Never panics; the caller decides whether to skip.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported file extension: {0}")]
    UnsupportedFormat(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("legacy converter failed: {0}")]
    Converter(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),

    #[error("file too large: {size} bytes, max {max}")]
    TooLarge { size: u64, max: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Embedding errors.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("model loading failed: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("embedding provider '{0}' is not available in this build")]
    ProviderUnavailable(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_extraction_maps_to_top_level_kind() {
        let err: CoreError = ExtractError::Unavailable("antiword not installed".into()).into();
        assert!(matches!(err, CoreError::ExtractionUnavailable(_)));
        assert!(!err.is_user_fixable());
        assert!(err.to_string().contains("antiword not installed"));
    }

    #[test]
    fn unsupported_extension_maps_to_top_level_kind() {
        let err: CoreError = ExtractError::UnsupportedFormat("xlsb".into()).into();
        assert!(matches!(err, CoreError::UnsupportedFormat(ref e) if e == "xlsb"));
        assert!(err.is_user_fixable());
    }

    #[test]
    fn parse_failures_stay_wrapped() {
        let err: CoreError = ExtractError::Pdf("bad xref".into()).into();
        assert!(matches!(err, CoreError::Extraction(ExtractError::Pdf(_))));
        assert_eq!(err.to_string(), "text extraction failed: PDF extraction failed: bad xref");
    }

    #[test]
    fn too_large_display() {
        let err = ExtractError::TooLarge { size: 10, max: 5 };
        assert_eq!(err.to_string(), "file too large: 10 bytes, max 5");
    }

    #[test]
    fn extraction_io_needs_an_administrator() {
        let err: CoreError =
            ExtractError::Io(std::io::Error::other("no space left for spill file")).into();
        assert!(matches!(err, CoreError::Extraction(ExtractError::Io(_))));
        assert!(!err.is_user_fixable());

        let err: CoreError = ExtractError::Ooxml("missing word/document.xml".into()).into();
        assert!(err.is_user_fixable());
    }

    #[test]
    fn not_found_is_not_user_fixable() {
        assert!(!CoreError::NotFound("document 7".into()).is_user_fixable());
    }
}
