use std::{collections::BTreeMap, path::Path, sync::Arc};

use chrono::{DateTime, Utc};
use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    TableDefinition,
};
use serde::{Deserialize, Serialize};

use crate::{
    embedding::normalize,
    error::{Error, Result},
    source::SourceType,
};

const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");
const RECORDS: TableDefinition<u64, &str> = TableDefinition::new("records");

/// Header size: 4 bytes dimension + 1 byte source tag + 3 reserved bytes.
const HEADER_SIZE: usize = 8;

/// Free-form display fields snapshotted alongside a record.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// An embedded blurb of one domain record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingRecord {
    pub object_id: String,
    pub source_type: SourceType,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

/// Everything about a record except its vector, stored as JSON.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordBody {
    object_id: String,
    source_type: SourceType,
    text: String,
    metadata: Metadata,
    created_at: DateTime<Utc>,
}

/// A stored vector considered during a similarity scan.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Storage sequence number; lower means inserted earlier.
    pub id: u64,
    pub source_type: SourceType,
    pub vector: Vec<f32>,
}

/// Stores embedding records keyed by insertion sequence number.
///
/// Binary vector format per entry:
/// - 4 bytes: embedding dimension D (u32 LE)
/// - 1 byte: source type tag
/// - 3 bytes: reserved
/// - D * 4 bytes: f32 values
///
/// Every stored vector has the same dimension and unit length.
#[derive(Clone)]
pub struct EmbeddingDb {
    db: Arc<Database>,
}

impl EmbeddingDb {
    /// Open or create an embeddings database at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use storechat::EmbeddingDb;
    ///
    /// let db = EmbeddingDb::open(&tmp.path().join("embeddings.db")).unwrap();
    /// assert_eq!(db.count().unwrap(), 0);
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(VECTORS)?;
        txn.open_table(RECORDS)?;
        txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Remove every record. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let removed = self.count()?;
        let txn = self.db.begin_write()?;
        txn.delete_table(VECTORS)?;
        txn.delete_table(RECORDS)?;
        txn.open_table(VECTORS)?;
        txn.open_table(RECORDS)?;
        txn.commit()?;
        Ok(removed)
    }

    /// Append records in a single transaction, normalizing their vectors.
    ///
    /// Returns the sequence numbers assigned, in input order. Fails without
    /// writing anything if a vector's dimension differs from the store's.
    pub fn insert_batch(&self, records: &[EmbeddingRecord]) -> Result<Vec<u64>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let txn = self.db.begin_write()?;
        let ids = {
            let mut vectors = txn.open_table(VECTORS)?;
            let mut bodies = txn.open_table(RECORDS)?;

            let mut expected = match vectors.first()? {
                Some((_, bytes)) => {
                    decode_vector(bytes.value()).map(|(_, v)| v.len())
                }
                None => None,
            };
            let mut next_id = match vectors.last()? {
                Some((key, _)) => key.value() + 1,
                None => 1,
            };

            let mut ids = Vec::with_capacity(records.len());
            for record in records {
                let found = record.vector.len();
                match expected {
                    Some(dim) if dim != found => {
                        return Err(Error::DimensionMismatch {
                            expected: dim,
                            found,
                        });
                    }
                    Some(_) => {}
                    None => expected = Some(found),
                }

                let mut vector = record.vector.clone();
                normalize(&mut vector);
                let encoded = encode_vector(record.source_type, &vector);
                vectors.insert(next_id, encoded.as_slice())?;

                let body = serde_json::to_string(&RecordBody {
                    object_id: record.object_id.clone(),
                    source_type: record.source_type,
                    text: record.text.clone(),
                    metadata: record.metadata.clone(),
                    created_at: record.created_at,
                })?;
                bodies.insert(next_id, body.as_str())?;

                ids.push(next_id);
                next_id += 1;
            }
            ids
        };
        txn.commit()?;
        Ok(ids)
    }

    /// Load the vectors of every record whose source type is in `allowed`,
    /// in storage order.
    pub fn candidates(&self, allowed: &[SourceType]) -> Result<Vec<Candidate>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;

        let mut result = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            let bytes = value.value();
            let Some(source_type) = peek_source(bytes) else {
                continue;
            };
            if !allowed.contains(&source_type) {
                continue;
            }
            if let Some((_, vector)) = decode_vector(bytes) {
                result.push(Candidate {
                    id: key.value(),
                    source_type,
                    vector,
                });
            }
        }
        Ok(result)
    }

    /// Load one full record by sequence number.
    pub fn load_record(&self, id: u64) -> Result<Option<EmbeddingRecord>> {
        let txn = self.db.begin_read()?;
        let vectors = txn.open_table(VECTORS)?;
        let bodies = txn.open_table(RECORDS)?;

        let Some(vector) = vectors.get(id)? else {
            return Ok(None);
        };
        let Some(body) = bodies.get(id)? else {
            return Ok(None);
        };
        let Some((_, vector)) = decode_vector(vector.value()) else {
            return Ok(None);
        };
        let body: RecordBody = serde_json::from_str(body.value())?;

        Ok(Some(assemble(body, vector)))
    }

    /// All records in storage order.
    pub fn list_records(&self) -> Result<Vec<EmbeddingRecord>> {
        let txn = self.db.begin_read()?;
        let vectors = txn.open_table(VECTORS)?;
        let bodies = txn.open_table(RECORDS)?;

        let mut result = Vec::new();
        for entry in bodies.iter()? {
            let (key, body) = entry?;
            let Some(bytes) = vectors.get(key.value())? else {
                continue;
            };
            let Some((_, vector)) = decode_vector(bytes.value()) else {
                continue;
            };
            let body: RecordBody = serde_json::from_str(body.value())?;
            result.push(assemble(body, vector));
        }
        Ok(result)
    }

    pub fn count(&self) -> Result<usize> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        let mut count = 0;
        for entry in table.iter()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Number of stored records per source type.
    pub fn count_by_source(&self) -> Result<BTreeMap<SourceType, usize>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        let mut counts = BTreeMap::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            if let Some(source) = peek_source(value.value()) {
                *counts.entry(source).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    /// The fixed vector dimension, or `None` while the store is empty.
    pub fn dimension(&self) -> Result<Option<usize>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        Ok(table
            .first()?
            .and_then(|(_, bytes)| decode_vector(bytes.value()))
            .map(|(_, v)| v.len()))
    }
}

impl std::fmt::Debug for EmbeddingDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingDb").finish_non_exhaustive()
    }
}

fn assemble(body: RecordBody, vector: Vec<f32>) -> EmbeddingRecord {
    EmbeddingRecord {
        object_id: body.object_id,
        source_type: body.source_type,
        vector,
        text: body.text,
        metadata: body.metadata,
        created_at: body.created_at,
    }
}

fn encode_vector(source: SourceType, vector: &[f32]) -> Vec<u8> {
    let mut bytes = vec![0u8; HEADER_SIZE + std::mem::size_of_val(vector)];
    bytes[0..4].copy_from_slice(&(vector.len() as u32).to_le_bytes());
    bytes[4] = source.tag();
    bytes[HEADER_SIZE..].copy_from_slice(bytemuck::cast_slice(vector));
    bytes
}

fn peek_source(bytes: &[u8]) -> Option<SourceType> {
    if bytes.len() < HEADER_SIZE {
        return None;
    }
    SourceType::from_tag(bytes[4])
}

/// Decode a stored entry. Returns `None` for truncated or corrupt entries.
fn decode_vector(bytes: &[u8]) -> Option<(SourceType, Vec<f32>)> {
    let source = peek_source(bytes)?;
    let dimension = u32::from_le_bytes(bytes[0..4].try_into().ok()?) as usize;
    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != dimension * 4 {
        return None;
    }
    // Copies into an aligned buffer; redb values carry no alignment.
    let vector: Vec<f32> = bytemuck::pod_collect_to_vec(payload);
    Some((source, vector))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, EmbeddingDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = EmbeddingDb::open(&tmp.path().join("embeddings.db")).unwrap();
        (tmp, db)
    }

    fn record(id: &str, source: SourceType, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            object_id: id.to_string(),
            source_type: source,
            vector,
            text: format!("blurb for {id}"),
            metadata: Metadata::from([(
                "name".to_string(),
                serde_json::json!(id),
            )]),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn insert_and_load() {
        let (_tmp, db) = test_db();

        let ids = db
            .insert_batch(&[record("p1", SourceType::Product, vec![3.0, 4.0])])
            .unwrap();
        assert_eq!(ids, vec![1]);

        let loaded = db.load_record(1).unwrap().unwrap();
        assert_eq!(loaded.object_id, "p1");
        assert_eq!(loaded.source_type, SourceType::Product);
        assert_eq!(loaded.text, "blurb for p1");
        assert_eq!(loaded.metadata["name"], serde_json::json!("p1"));
        // Stored vectors are normalized.
        assert!((loaded.vector[0] - 0.6).abs() < 1e-6);
        assert!((loaded.vector[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn load_missing_returns_none() {
        let (_tmp, db) = test_db();
        assert!(db.load_record(999).unwrap().is_none());
    }

    #[test]
    fn sequence_continues_across_batches() {
        let (_tmp, db) = test_db();
        db.insert_batch(&[record("a", SourceType::Product, vec![1.0, 0.0])])
            .unwrap();
        let ids = db
            .insert_batch(&[
                record("b", SourceType::Sale, vec![0.0, 1.0]),
                record("c", SourceType::Customer, vec![1.0, 1.0]),
            ])
            .unwrap();
        assert_eq!(ids, vec![2, 3]);

        let names: Vec<_> = db
            .list_records()
            .unwrap()
            .into_iter()
            .map(|r| r.object_id)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let (_tmp, db) = test_db();
        db.insert_batch(&[record("a", SourceType::Product, vec![1.0, 0.0])])
            .unwrap();

        let err = db
            .insert_batch(&[record("b", SourceType::Product, vec![1.0, 0.0, 0.0])])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 2,
                found: 3
            }
        ));
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn rejects_mismatch_within_one_batch() {
        let (_tmp, db) = test_db();
        let err = db
            .insert_batch(&[
                record("a", SourceType::Product, vec![1.0, 0.0]),
                record("b", SourceType::Product, vec![1.0]),
            ])
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
        assert_eq!(db.count().unwrap(), 0);
    }

    #[test]
    fn candidates_filter_by_source() {
        let (_tmp, db) = test_db();
        db.insert_batch(&[
            record("p", SourceType::Product, vec![1.0, 0.0]),
            record("s", SourceType::Sale, vec![0.0, 1.0]),
            record("c", SourceType::Category, vec![1.0, 1.0]),
        ])
        .unwrap();

        let found = db
            .candidates(&[SourceType::Product, SourceType::Category])
            .unwrap();
        let sources: Vec<_> = found.iter().map(|c| c.source_type).collect();
        assert_eq!(sources, vec![SourceType::Product, SourceType::Category]);
        assert_eq!(found[0].id, 1);
        assert_eq!(found[1].id, 3);
    }

    #[test]
    fn clear_removes_everything() {
        let (_tmp, db) = test_db();
        db.insert_batch(&[
            record("a", SourceType::Product, vec![1.0, 0.0]),
            record("b", SourceType::Product, vec![0.0, 1.0]),
        ])
        .unwrap();

        assert_eq!(db.clear().unwrap(), 2);
        assert_eq!(db.count().unwrap(), 0);
        assert_eq!(db.dimension().unwrap(), None);

        // A new dimension is accepted after clearing.
        db.insert_batch(&[record("c", SourceType::Product, vec![1.0, 0.0, 0.0])])
            .unwrap();
        assert_eq!(db.dimension().unwrap(), Some(3));
    }

    #[test]
    fn count_by_source_groups() {
        let (_tmp, db) = test_db();
        db.insert_batch(&[
            record("a", SourceType::Product, vec![1.0, 0.0]),
            record("b", SourceType::Product, vec![0.0, 1.0]),
            record("c", SourceType::Customer, vec![1.0, 1.0]),
        ])
        .unwrap();

        let counts = db.count_by_source().unwrap();
        assert_eq!(counts[&SourceType::Product], 2);
        assert_eq!(counts[&SourceType::Customer], 1);
        assert!(!counts.contains_key(&SourceType::Sale));
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("embeddings.db");

        {
            let db = EmbeddingDb::open(&path).unwrap();
            db.insert_batch(&[record("a", SourceType::Unit, vec![0.0, 2.0])])
                .unwrap();
        }

        {
            let db = EmbeddingDb::open(&path).unwrap();
            let loaded = db.load_record(1).unwrap().unwrap();
            assert_eq!(loaded.source_type, SourceType::Unit);
            assert_eq!(loaded.vector, vec![0.0, 1.0]);
        }
    }

    #[test]
    fn decode_rejects_truncated_entries() {
        let mut bytes = encode_vector(SourceType::Product, &[1.0, 2.0]);
        bytes.pop();
        assert!(decode_vector(&bytes).is_none());
        assert!(decode_vector(&[0, 1]).is_none());
    }
}
