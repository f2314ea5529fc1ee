//! Hybrid retrieval: dense and lexical rankers run independently and are merged
//! with Reciprocal Rank Fusion, score = Σ 1/(k + rank_i).

use std::collections::HashMap;
use std::ops::Range;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tokio::task;

use lodestar_core::normalize_query;

use crate::embedding::Embed;
use crate::store::{RagStore, RankedChunk, SearchFilters};

/// RRF smoothing constant.
pub const RRF_K: f64 = 60.0;

#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub text: String,
    pub k_vec: usize,
    pub k_bm25: usize,
    pub k_final: usize,
    pub filters: SearchFilters,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            k_vec: 50,
            k_bm25: 50,
            k_final: 12,
            filters: SearchFilters::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankSource {
    Vector,
    Lexical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Provenance {
    pub source: RankSource,
    pub rank: usize,
    pub raw_score: f32,
    pub document_source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Passage {
    pub chunk_id: i64,
    pub document_id: i64,
    pub text: String,
    pub span: Range<usize>,
    pub fused_score: f64,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Retrieval {
    pub passages: Vec<Passage>,
    pub vector_hits: usize,
    pub lexical_hits: usize,
}

pub struct HybridRetriever<E> {
    store: RagStore,
    embedder: Option<E>,
}

impl<E: Embed> HybridRetriever<E> {
    pub fn new(store: RagStore, embedder: Option<E>) -> Self {
        Self { store, embedder }
    }

    /// Never fails: a ranker that is unavailable or errors contributes an empty list.
    pub async fn retrieve_hybrid(&self, query: &RetrievalQuery) -> Retrieval {
        let text = normalize_query(&query.text);
        if text.is_empty() {
            return Retrieval::default();
        }
        let (vector, lexical) = tokio::join!(
            self.dense_list(&text, query.k_vec, &query.filters),
            self.lexical_list(&text, query.k_bm25, &query.filters)
        );
        let vector = vector.unwrap_or_else(|err| {
            tracing::warn!(error = %err, "dense ranker failed, continuing without it");
            Vec::new()
        });
        let lexical = lexical.unwrap_or_else(|err| {
            tracing::warn!(error = %err, "lexical ranker failed, continuing without it");
            Vec::new()
        });
        tracing::debug!(
            vector = vector.len(),
            lexical = lexical.len(),
            "ranker lists joined"
        );
        Retrieval {
            vector_hits: vector.len(),
            lexical_hits: lexical.len(),
            passages: rrf_fuse(&vector, &lexical, query.k_final),
        }
    }

    async fn dense_list(
        &self,
        text: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<RankedChunk>> {
        let Some(embedder) = self.embedder.as_ref() else {
            return Ok(Vec::new());
        };
        if !self.store.capabilities().vector || limit == 0 {
            return Ok(Vec::new());
        }
        let model = embedder.default_model().to_string();
        let mut vectors = embedder
            .embed_batch(&model, &[text.to_string()])
            .await
            .context("query embedding failed")?;
        let query_vector = vectors
            .pop()
            .ok_or_else(|| anyhow!("no query embedding returned"))?;
        let store = self.store.clone();
        let filters = filters.clone();
        task::spawn_blocking(move || store.search_vector(&query_vector, &model, limit, &filters))
            .await
            .context("vector search task failed")?
    }

    async fn lexical_list(
        &self,
        text: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<RankedChunk>> {
        if !self.store.capabilities().lexical || limit == 0 {
            return Ok(Vec::new());
        }
        let store = self.store.clone();
        let text = text.to_string();
        let filters = filters.clone();
        task::spawn_blocking(move || store.search_lexical(&text, limit, &filters))
            .await
            .context("lexical search task failed")?
    }
}

/// Fuses two rank lists. Only ordinal positions matter; raw scores are carried
/// through as provenance. Vector provenance wins when a chunk is in both lists.
pub fn rrf_fuse(vector: &[RankedChunk], lexical: &[RankedChunk], k_final: usize) -> Vec<Passage> {
    let mut fused: HashMap<i64, Passage> = HashMap::new();
    for (list, source) in [(vector, RankSource::Vector), (lexical, RankSource::Lexical)] {
        for hit in list {
            let contribution = 1.0 / (RRF_K + hit.rank as f64);
            fused
                .entry(hit.chunk_id)
                .and_modify(|passage| passage.fused_score += contribution)
                .or_insert_with(|| Passage {
                    chunk_id: hit.chunk_id,
                    document_id: hit.document_id,
                    text: hit.text.clone(),
                    span: hit.span.clone(),
                    fused_score: contribution,
                    provenance: Provenance {
                        source,
                        rank: hit.rank,
                        raw_score: hit.score,
                        document_source: hit.document_source.clone(),
                    },
                });
        }
    }
    let mut passages: Vec<Passage> = fused.into_values().collect();
    passages.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
    passages.truncate(k_final);
    passages
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(chunk_id: i64, rank: usize) -> RankedChunk {
        RankedChunk {
            chunk_id,
            document_id: 1,
            document_source: "doc".to_string(),
            text: format!("chunk {chunk_id}"),
            span: 0..1,
            rank,
            score: 0.5,
        }
    }

    #[test]
    fn single_list_score_is_exact() {
        let passages = rrf_fuse(&[hit(7, 3)], &[], 10);
        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].fused_score, 1.0 / (60.0 + 3.0));
        assert_eq!(passages[0].provenance.source, RankSource::Vector);
    }

    #[test]
    fn both_lists_add_and_prefer_vector_provenance() {
        let passages = rrf_fuse(&[hit(1, 1), hit(2, 2)], &[hit(2, 1), hit(3, 2)], 10);
        let two = passages.iter().find(|p| p.chunk_id == 2).unwrap();
        assert_eq!(two.fused_score, 1.0 / 62.0 + 1.0 / 61.0);
        assert_eq!(two.provenance.source, RankSource::Vector);
        assert_eq!(two.provenance.rank, 2);
        let three = passages.iter().find(|p| p.chunk_id == 3).unwrap();
        assert_eq!(three.provenance.source, RankSource::Lexical);
        assert_eq!(passages[0].chunk_id, 2);
        assert!(passages.iter().all(|p| p.chunk_id != 4));
    }

    #[test]
    fn truncates_to_k_final_in_score_order() {
        let passages = rrf_fuse(&[hit(1, 1), hit(2, 2), hit(3, 3)], &[], 2);
        let ids: Vec<_> = passages.iter().map(|p| p.chunk_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn empty_lists_fuse_to_nothing() {
        assert!(rrf_fuse(&[], &[], 12).is_empty());
    }
}
