use std::{
    collections::BTreeMap,
    sync::{Arc, OnceLock},
};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    blurb::Indexable,
    embedding::Embedder,
    embedding_db::{EmbeddingDb, EmbeddingRecord},
    error::Result,
    records::DocumentSource,
    run_blocking,
    source::SourceType,
};

/// Only the most recent sales are indexed.
pub const SALES_INDEX_LIMIT: usize = 500;

/// Outcome of a full rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexReport {
    /// Records removed before rebuilding.
    pub cleared: usize,
    /// Records embedded and stored, per source type.
    pub indexed: BTreeMap<SourceType, usize>,
    /// Records skipped because they could not be rendered or embedded.
    pub skipped: usize,
}

impl ReindexReport {
    pub fn total(&self) -> usize {
        self.indexed.values().sum()
    }

    /// One-line human summary, e.g. `12 records (Product 10, Category 2), 1 skipped`.
    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .indexed
            .iter()
            .map(|(source, count)| format!("{source} {count}"))
            .collect();
        format!(
            "{} records ({}), {} skipped",
            self.total(),
            parts.join(", "),
            self.skipped
        )
    }
}

/// Records of one source type, embedded and ready to store.
struct Batch {
    source: SourceType,
    records: Vec<EmbeddingRecord>,
    skipped: usize,
}

/// Rebuilds the embedding store from a [`DocumentSource`].
pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    db: EmbeddingDb,
    sales_limit: usize,
}

impl Indexer {
    pub fn new(embedder: Arc<dyn Embedder>, db: EmbeddingDb) -> Self {
        Self {
            embedder,
            db,
            sales_limit: SALES_INDEX_LIMIT,
        }
    }

    pub fn with_sales_limit(mut self, limit: usize) -> Self {
        self.sales_limit = limit;
        self
    }

    /// Clear the store and embed every indexed source type again.
    ///
    /// Source types are fetched and embedded concurrently, then stored in
    /// [`SourceType::INDEXED`] order so storage order does not depend on
    /// scheduling. A record that fails to render or embed is logged and
    /// skipped, as is one whose vector length differs from the first vector
    /// embedded in this run. An unavailable embedder or a failing source
    /// aborts the run, leaving whatever was stored so far. Rerunning is
    /// always safe.
    pub async fn reindex(
        &self,
        source: &dyn DocumentSource,
    ) -> Result<ReindexReport> {
        let db = self.db.clone();
        let cleared = run_blocking(move || db.clear()).await?;
        info!(cleared, "cleared embedding store");

        let dimension = OnceLock::new();
        let (products, categories, sales, customers) = tokio::join!(
            async {
                self.prepare(source.active_products().await?, &dimension)
                    .await
            },
            async {
                self.prepare(source.active_categories().await?, &dimension)
                    .await
            },
            async {
                let mut sales = source.recent_sales(self.sales_limit).await?;
                sales.truncate(self.sales_limit);
                self.prepare(sales, &dimension).await
            },
            async {
                self.prepare(source.active_customers().await?, &dimension)
                    .await
            },
        );

        let mut report = ReindexReport {
            cleared,
            ..Default::default()
        };

        for batch in [products?, categories?, sales?, customers?] {
            let Batch {
                source,
                records,
                skipped,
            } = batch;
            let count = records.len();

            let db = self.db.clone();
            run_blocking(move || db.insert_batch(&records)).await?;

            info!(%source, indexed = count, skipped, "indexed source type");
            report.indexed.insert(source, count);
            report.skipped += skipped;
        }

        info!("reindex complete: {}", report.summary());
        Ok(report)
    }

    async fn prepare<T>(
        &self,
        records: Vec<T>,
        dimension: &OnceLock<usize>,
    ) -> Result<Batch>
    where
        T: Indexable + Send + Sync,
    {
        let mut batch = Batch {
            source: T::SOURCE,
            records: Vec::with_capacity(records.len()),
            skipped: 0,
        };

        for record in &records {
            let text = match record.blurb() {
                Ok(text) => text,
                Err(e) => {
                    warn!("skipping record: {e}");
                    batch.skipped += 1;
                    continue;
                }
            };

            let vector = match self.embedder.embed(&text).await {
                Ok(vector) => vector,
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => {
                    warn!(
                        source = %T::SOURCE,
                        id = record.object_id(),
                        "skipping record: {e}"
                    );
                    batch.skipped += 1;
                    continue;
                }
            };

            let expected = *dimension.get_or_init(|| vector.len());
            if vector.len() != expected {
                warn!(
                    source = %T::SOURCE,
                    id = record.object_id(),
                    "skipping record: dimension {} does not match {expected}",
                    vector.len()
                );
                batch.skipped += 1;
                continue;
            }

            debug!(source = %T::SOURCE, id = record.object_id(), "embedded");
            batch.records.push(EmbeddingRecord {
                object_id: record.object_id().to_string(),
                source_type: T::SOURCE,
                vector,
                text,
                metadata: record.metadata(),
                created_at: Utc::now(),
            });
        }

        Ok(batch)
    }
}
