use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    embedding::{Embedder, dot, normalize},
    embedding_db::{Candidate, EmbeddingDb, Metadata},
    error::Result,
    run_blocking,
    source::{AudienceTier, SourceType},
    text_util::{DEFAULT_PREVIEW_MAX_CHARS, truncate_chars},
};

/// Number of matches returned when the caller does not ask for a limit.
pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// A stored record ranked against a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityResult {
    pub rank: usize,
    pub object_id: String,
    pub source_type: SourceType,
    pub text: String,
    /// Cosine similarity; stored and query vectors are unit length.
    pub score: f32,
    pub metadata: Metadata,
}

/// A candidate's position in storage and its score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedCandidate {
    pub id: u64,
    pub score: f32,
}

/// Score every candidate against `query` and keep the best `limit`.
///
/// Candidates must be in storage order. The sort is stable, so records with
/// equal scores keep storage order (earlier-inserted first). Candidates
/// whose dimension differs from the query are ignored.
pub fn rank(
    query: &[f32],
    candidates: &[Candidate],
    limit: usize,
) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = candidates
        .par_iter()
        .filter_map(|c| {
            dot(query, &c.vector).map(|score| RankedCandidate {
                id: c.id,
                score,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(limit);
    ranked
}

/// Ranks stored embeddings against a query, within what a tier may see.
#[derive(Clone)]
pub struct SimilaritySearch {
    embedder: Arc<dyn Embedder>,
    db: EmbeddingDb,
}

impl SimilaritySearch {
    pub fn new(embedder: Arc<dyn Embedder>, db: EmbeddingDb) -> Self {
        Self { embedder, db }
    }

    /// Return up to `limit` records most similar to `query`, best first.
    ///
    /// Only source types in [`AudienceTier::allowed_sources`] are
    /// considered. An empty store and an unavailable embedder both yield an
    /// empty list.
    pub async fn search(
        &self,
        query: &str,
        tier: AudienceTier,
        limit: usize,
    ) -> Result<Vec<SimilarityResult>> {
        if limit == 0 || !self.embedder.is_available() {
            return Ok(Vec::new());
        }

        let mut query_vector = match self.embedder.embed(query).await {
            Ok(vector) => vector,
            Err(e) if e.is_unavailable() => {
                warn!("search degraded to no context: {e}");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        normalize(&mut query_vector);

        let db = self.db.clone();
        let results = run_blocking(move || {
            let candidates = db.candidates(tier.allowed_sources())?;
            let ranked = rank(&query_vector, &candidates, limit);

            let mut results = Vec::with_capacity(ranked.len());
            for RankedCandidate { id, score } in ranked {
                let Some(record) = db.load_record(id)? else {
                    continue;
                };
                results.push(SimilarityResult {
                    rank: results.len() + 1,
                    object_id: record.object_id,
                    source_type: record.source_type,
                    text: record.text,
                    score,
                    metadata: record.metadata,
                });
            }
            Ok(results)
        })
        .await?;

        debug!(%tier, found = results.len(), "similarity search");
        Ok(results)
    }
}

/// Format results for human-readable terminal output.
pub fn format_human(results: &[SimilarityResult]) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    for r in results {
        println!(
            "{:>3}. [{:.3}] {} {}",
            r.rank, r.score, r.source_type, r.object_id
        );
        println!("     {}", truncate_chars(&r.text, DEFAULT_PREVIEW_MAX_CHARS));
    }
    println!("\n{} result(s)", results.len());
}

/// Format results as a single JSON document.
pub fn format_json(results: &[SimilarityResult], query: &str) -> Result<()> {
    let doc = serde_json::json!({
        "query": query,
        "resultCount": results.len(),
        "results": results,
    });
    println!("{}", serde_json::to_string(&doc)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use proptest::prelude::*;

    use super::*;
    use crate::{
        embedding_db::EmbeddingRecord,
        testing::{DisabledEmbedder, HashEmbedder, hash_embed},
    };

    fn record(id: &str, source: SourceType, text: &str) -> EmbeddingRecord {
        EmbeddingRecord {
            object_id: id.to_string(),
            source_type: source,
            vector: hash_embed(text),
            text: text.to_string(),
            metadata: Metadata::new(),
            created_at: Utc::now(),
        }
    }

    fn setup(records: &[EmbeddingRecord]) -> (tempfile::TempDir, SimilaritySearch) {
        let tmp = tempfile::tempdir().unwrap();
        let db = EmbeddingDb::open(&tmp.path().join("emb.redb")).unwrap();
        db.insert_batch(records).unwrap();
        (tmp, SimilaritySearch::new(Arc::new(HashEmbedder), db))
    }

    fn candidate(id: u64, vector: Vec<f32>) -> Candidate {
        Candidate {
            id,
            source_type: SourceType::Product,
            vector,
        }
    }

    #[test]
    fn rank_orders_by_score_descending() {
        let candidates = vec![
            candidate(1, vec![0.0, 1.0]),
            candidate(2, vec![1.0, 0.0]),
            candidate(3, vec![0.6, 0.8]),
        ];
        let ranked = rank(&[1.0, 0.0], &candidates, 10);
        let ids: Vec<_> = ranked.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn rank_breaks_ties_by_storage_order() {
        let candidates = vec![
            candidate(7, vec![1.0, 0.0]),
            candidate(3, vec![0.0, 1.0]),
            candidate(9, vec![1.0, 0.0]),
            candidate(12, vec![1.0, 0.0]),
        ];
        let ranked = rank(&[1.0, 0.0], &candidates, 3);
        let ids: Vec<_> = ranked.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![7, 9, 12]);
    }

    #[test]
    fn rank_skips_dimension_mismatch() {
        let candidates =
            vec![candidate(1, vec![1.0, 0.0, 0.0]), candidate(2, vec![1.0, 0.0])];
        let ranked = rank(&[1.0, 0.0], &candidates, 10);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, 2);
    }

    #[tokio::test]
    async fn search_returns_best_match_first() {
        let (_tmp, search) = setup(&[
            record("p1", SourceType::Product, "Producto: Yerba mate suave"),
            record("p2", SourceType::Product, "Producto: Queso cremoso"),
        ]);

        let results = search
            .search("queso cremoso", AudienceTier::Customer, 5)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].object_id, "p2");
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].rank, 2);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn search_respects_limit() {
        let (_tmp, search) = setup(&[
            record("a", SourceType::Product, "uno"),
            record("b", SourceType::Product, "dos"),
            record("c", SourceType::Product, "tres"),
        ]);
        let results =
            search.search("uno", AudienceTier::Owner, 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(
            search
                .search("uno", AudienceTier::Owner, 0)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn customer_does_not_see_owner_only_records() {
        let (_tmp, search) = setup(&[
            record("s1", SourceType::Sale, "venta de yerba a Ana"),
            record("c1", SourceType::Customer, "cliente Ana yerba"),
            record("p1", SourceType::Product, "Producto: Harina"),
        ]);

        let customer = search
            .search("venta de yerba a Ana", AudienceTier::Customer, 5)
            .await
            .unwrap();
        assert_eq!(customer.len(), 1);
        assert_eq!(customer[0].object_id, "p1");

        let owner = search
            .search("venta de yerba a Ana", AudienceTier::Owner, 5)
            .await
            .unwrap();
        assert_eq!(owner[0].object_id, "s1");
    }

    #[tokio::test]
    async fn empty_store_returns_empty() {
        let (_tmp, search) = setup(&[]);
        let results =
            search.search("hola", AudienceTier::Owner, 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn disabled_embedder_returns_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let db = EmbeddingDb::open(&tmp.path().join("emb.redb")).unwrap();
        db.insert_batch(&[record("p1", SourceType::Product, "yerba")])
            .unwrap();
        let search = SimilaritySearch::new(Arc::new(DisabledEmbedder), db);

        let results =
            search.search("yerba", AudienceTier::Owner, 5).await.unwrap();
        assert!(results.is_empty());
    }

    fn private_source() -> impl Strategy<Value = SourceType> {
        prop_oneof![
            Just(SourceType::Sale),
            Just(SourceType::Customer),
            Just(SourceType::Payment),
        ]
    }

    fn any_source() -> impl Strategy<Value = SourceType> {
        proptest::sample::select(SourceType::ALL.to_vec())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Owner-only records never reach a customer, even when they
        /// match the query exactly.
        #[test]
        fn customer_results_never_include_private_sources(
            query in "[a-z]{3,8}( [a-z]{3,8}){0,3}",
            private in proptest::collection::vec(private_source(), 1..6),
            public in proptest::collection::vec(any_source(), 0..6),
            limit in 1usize..10,
        ) {
            let mut records: Vec<EmbeddingRecord> = private
                .iter()
                .enumerate()
                .map(|(i, s)| record(&format!("private{i}"), *s, &query))
                .collect();
            records.extend(public.iter().enumerate().map(|(i, s)| {
                record(&format!("public{i}"), *s, "texto sin relacion")
            }));

            let (_tmp, search) = setup(&records);
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let results = runtime
                .block_on(search.search(&query, AudienceTier::Customer, limit))
                .unwrap();

            for r in &results {
                prop_assert!(AudienceTier::Customer.allows(r.source_type));
            }
            let visible = public
                .iter()
                .filter(|s| AudienceTier::Customer.allows(**s))
                .count();
            prop_assert_eq!(results.len(), visible.min(limit));
        }

        #[test]
        fn ranked_scores_are_descending(
            vectors in proptest::collection::vec(
                proptest::collection::vec(-1.0f32..1.0, 4),
                0..20,
            ),
            query in proptest::collection::vec(-1.0f32..1.0, 4),
        ) {
            let candidates: Vec<_> = vectors
                .into_iter()
                .enumerate()
                .map(|(i, v)| candidate(i as u64, v))
                .collect();
            let ranked = rank(&query, &candidates, candidates.len());
            prop_assert_eq!(ranked.len(), candidates.len());
            for pair in ranked.windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
            }
        }
    }
}
