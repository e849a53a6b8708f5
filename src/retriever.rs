//! Scoped passage retrieval.
//!
//! A search runs in three phases:
//!
//! 1. **Candidates**: chunks of documents in the user's scope. With the
//!    lexical pre-filter on, FTS5 narrows the set first; if it comes back
//!    with fewer than `top_k` usable candidates (or fails), the full scope
//!    is used instead so paraphrased queries still find their passages.
//!    A candidate is usable only if its stored vector decodes.
//! 2. **Scoring**: the query is embedded once and each candidate scores
//!    the inner product of the two vectors. Unreadable vectors are skipped.
//! 3. **Ranking**: score descending, then ordinal ascending, then document
//!    id ascending. Optionally collapsed to the best chunk per document.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::{decode_vector, dot_product, Embedder};
use crate::error::Result;
use crate::models::{RetrievalHit, RetrievalResult, StoredChunk};
use crate::store::IndexStore;

/// How hits are selected after ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetrievalMode {
    /// The `top_k` best chunks, possibly several from one document.
    #[default]
    Flat,
    /// The single best chunk of each document, then the `top_k` best of those.
    BestPerDocument,
}

pub struct Retriever {
    store: Arc<IndexStore>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(store: Arc<IndexStore>, embedder: Arc<dyn Embedder>, config: RetrievalConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        user_id: i64,
        top_k: usize,
        include_inactive: bool,
        mode: RetrievalMode,
    ) -> Result<RetrievalResult> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let candidates = self
            .gather_candidates(query, user_id, top_k, include_inactive, mode)
            .await?;
        if candidates.is_empty() {
            tracing::debug!(user_id, "no documents in scope");
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed_one(query).await?;
        let hits = score_candidates(&query_vec, candidates);
        Ok(rank(hits, top_k, mode))
    }

    async fn gather_candidates(
        &self,
        query: &str,
        user_id: i64,
        top_k: usize,
        include_inactive: bool,
        mode: RetrievalMode,
    ) -> Result<Vec<StoredChunk>> {
        if self.config.lexical_prefilter {
            match self
                .store
                .lexical_candidates(
                    user_id,
                    include_inactive,
                    query,
                    self.config.lexical_candidate_k,
                )
                .await
            {
                Ok(lexical) => {
                    let lexical = dedup_candidates(lexical);
                    let usable = distinct_units(&lexical, mode, self.embedder.dims());
                    tracing::debug!(user_id, lexical = lexical.len(), usable, "lexical candidates");
                    if usable >= top_k {
                        return Ok(lexical);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "lexical pre-filter failed; scanning full scope");
                }
            }
        }

        let all = self
            .store
            .candidates_for_scope(user_id, include_inactive)
            .await?;
        tracing::debug!(user_id, candidates = all.len(), "scope candidates");
        Ok(all)
    }
}

fn dedup_candidates(candidates: Vec<StoredChunk>) -> Vec<StoredChunk> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert((c.document_id, c.ordinal)))
        .collect()
}

/// Number of distinct results the candidate set could produce in `mode`,
/// counting only chunks whose vector decodes at `dims`.
fn distinct_units(candidates: &[StoredChunk], mode: RetrievalMode, dims: usize) -> usize {
    let scorable = candidates
        .iter()
        .filter(|c| decode_vector(&c.embedding, dims).is_some());
    match mode {
        RetrievalMode::Flat => scorable.count(),
        RetrievalMode::BestPerDocument => scorable
            .map(|c| c.document_id)
            .collect::<HashSet<_>>()
            .len(),
    }
}

/// Score each candidate against the query vector, skipping chunks whose
/// stored vector is unreadable or of a different dimension.
pub fn score_candidates(query_vec: &[f32], candidates: Vec<StoredChunk>) -> Vec<RetrievalHit> {
    let mut hits = Vec::with_capacity(candidates.len());
    for c in candidates {
        let Some(vector) = decode_vector(&c.embedding, query_vec.len()) else {
            tracing::warn!(
                document_id = c.document_id,
                ordinal = c.ordinal,
                bytes = c.embedding.len(),
                "skipping chunk with unreadable vector"
            );
            continue;
        };
        hits.push(RetrievalHit {
            document_id: c.document_id,
            ordinal: c.ordinal,
            passage: c.text,
            score: dot_product(query_vec, &vector),
        });
    }
    hits
}

/// Order hits and cut to `top_k` according to `mode`.
pub fn rank(mut hits: Vec<RetrievalHit>, top_k: usize, mode: RetrievalMode) -> Vec<RetrievalHit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.ordinal.cmp(&b.ordinal))
            .then(a.document_id.cmp(&b.document_id))
    });

    if mode == RetrievalMode::BestPerDocument {
        let mut seen = HashSet::new();
        hits.retain(|h| seen.insert(h.document_id));
    }

    hits.truncate(top_k);
    hits
}
