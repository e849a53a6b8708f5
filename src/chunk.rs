//! Sliding-window token chunker.
//!
//! Splits extracted text into overlapping windows of whitespace-delimited
//! tokens. A window of `window` tokens advances by `window - overlap`, so a
//! fact cut by one window boundary is whole in the neighbouring window.
//!
//! Each chunk gets a contiguous ordinal starting at 0 and a SHA-256 hash of
//! its text for staleness detection on re-index.

use sha2::{Digest, Sha256};

use crate::models::ChunkDraft;

/// Window geometry in tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkParams {
    pub window: usize,
    pub overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            window: 400,
            overlap: 50,
        }
    }
}

impl ChunkParams {
    fn step(&self) -> usize {
        self.window.saturating_sub(self.overlap).max(1)
    }
}

/// Split text into overlapping token windows joined by single spaces.
///
/// Empty or whitespace-only text yields no chunks. Text with at most
/// `window` tokens yields exactly one.
pub fn chunk(text: &str, params: ChunkParams) -> Vec<String> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() || params.window == 0 {
        return Vec::new();
    }

    let step = params.step();
    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + params.window).min(tokens.len());
        chunks.push(tokens[start..end].join(" "));
        if end == tokens.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Chunk text and attach ordinals and hashes.
pub fn chunk_document(text: &str, params: ChunkParams) -> Vec<ChunkDraft> {
    chunk(text, params)
        .into_iter()
        .enumerate()
        .map(|(i, text)| make_draft(i as i64, text))
        .collect()
}

fn make_draft(ordinal: i64, text: String) -> ChunkDraft {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    ChunkDraft {
        ordinal,
        text,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
    }

    fn params(window: usize, overlap: usize) -> ChunkParams {
        ChunkParams { window, overlap }
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk("", ChunkParams::default()).is_empty());
        assert!(chunk("  \n\n\t ", ChunkParams::default()).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let text = words(50);
        let chunks = chunk(&text, ChunkParams::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], text);
    }

    #[test]
    fn test_exact_window_single_chunk() {
        let chunks = chunk(&words(400), ChunkParams::default());
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_window_and_overlap() {
        // 10 tokens, window 4, overlap 1 => starts at 0, 3, 6
        let chunks = chunk(&words(10), params(4, 1));
        assert_eq!(chunks, vec!["w0 w1 w2 w3", "w3 w4 w5 w6", "w6 w7 w8 w9"]);
    }

    #[test]
    fn test_last_window_may_be_short() {
        let chunks = chunk(&words(11), params(4, 1));
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[3], "w9 w10");
    }

    #[test]
    fn test_whitespace_is_normalised() {
        let chunks = chunk("alpha\n\nbeta\tgamma   delta", params(10, 2));
        assert_eq!(chunks, vec!["alpha beta gamma delta"]);
    }

    #[test]
    fn test_deterministic() {
        let text = words(1234);
        let c1 = chunk_document(&text, ChunkParams::default());
        let c2 = chunk_document(&text, ChunkParams::default());
        assert_eq!(c1, c2);
    }

    #[test]
    fn test_ordinals_contiguous() {
        let drafts = chunk_document(&words(2000), params(100, 10));
        assert!(drafts.len() > 1);
        for (i, d) in drafts.iter().enumerate() {
            assert_eq!(d.ordinal, i as i64, "ordinal mismatch at position {}", i);
        }
    }

    #[test]
    fn test_overlap_portions_reconstruct_token_stream() {
        let p = params(7, 3);
        for n in [1usize, 6, 7, 8, 20, 53] {
            let text = words(n);
            let chunks = chunk(&text, p);

            // First chunk whole, then each later chunk minus its overlap prefix.
            let mut rebuilt: Vec<String> = Vec::new();
            for (i, c) in chunks.iter().enumerate() {
                let toks: Vec<&str> = c.split(' ').collect();
                let skip = if i == 0 { 0 } else { p.overlap };
                rebuilt.extend(toks.into_iter().skip(skip).map(str::to_string));
            }
            let original: Vec<String> = text.split(' ').map(str::to_string).collect();
            assert_eq!(rebuilt, original, "token stream mismatch for n={}", n);
        }
    }

    #[test]
    fn test_hash_tracks_text() {
        let a = chunk_document("same words here", ChunkParams::default());
        let b = chunk_document("same   words\nhere", ChunkParams::default());
        let c = chunk_document("other words here", ChunkParams::default());
        assert_eq!(a[0].hash, b[0].hash);
        assert_ne!(a[0].hash, c[0].hash);
    }
}
