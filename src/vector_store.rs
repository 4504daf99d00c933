//! Vector store abstraction and the records that flow through it.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod pinecone;

pub use pinecone::{IndexDescription, IndexSpec, PineconeClient, PineconeIndex};

/// Flat JSON metadata attached to a vector.
pub type Metadata = Map<String, Value>;

/// One vector ready to be written to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorRecord {
    /// Stable identifier; writing the same id again overwrites.
    pub id: String,
    /// Embedding values.
    pub values: Vec<f32>,
    /// Filterable metadata.
    pub metadata: Metadata,
}

/// Zips parallel id / vector / metadata lists into records.
pub fn records_from_parts(
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
    metadata: Vec<Metadata>,
) -> Result<Vec<VectorRecord>> {
    anyhow::ensure!(
        ids.len() == vectors.len() && ids.len() == metadata.len(),
        "ids ({}), vectors ({}) and metadata ({}) must have the same length",
        ids.len(),
        vectors.len(),
        metadata.len()
    );
    Ok(ids
        .into_iter()
        .zip(vectors)
        .zip(metadata)
        .map(|((id, values), metadata)| VectorRecord {
            id,
            values,
            metadata,
        })
        .collect())
}

/// Drops `null` entries; the store rejects them.
pub fn clean_metadata(metadata: &Metadata) -> Metadata {
    metadata
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// A nearest-neighbour result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryMatch {
    /// Record id.
    pub id: String,
    /// Similarity score under the index metric.
    pub score: f32,
    /// Stored metadata, when requested.
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

/// Which vectors a delete call removes.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteRequest {
    /// Exactly these ids.
    Ids(Vec<String>),
    /// Every vector whose metadata matches the filter.
    Filter(Value),
    /// Everything in the namespace.
    All,
}

/// Per-namespace counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceStats {
    /// Vectors stored in the namespace.
    #[serde(default)]
    pub vector_count: u64,
}

/// Index-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    /// Vector dimension.
    #[serde(default)]
    pub dimension: usize,
    /// Fraction of capacity used (pod indexes only).
    #[serde(default)]
    pub index_fullness: f64,
    /// Vectors across all namespaces.
    #[serde(default)]
    pub total_vector_count: u64,
    /// Counters keyed by namespace (`""` is the default namespace).
    #[serde(default)]
    pub namespaces: BTreeMap<String, NamespaceStats>,
}

impl IndexStats {
    /// Vector count of one namespace, zero when absent.
    pub fn namespace_count(&self, namespace: &str) -> u64 {
        self.namespaces
            .get(namespace)
            .map(|ns| ns.vector_count)
            .unwrap_or(0)
    }
}

/// Storage backend for embedded chunks.
pub trait VectorStore {
    /// Writes records in one request and returns how many were stored.
    fn upsert(&self, records: &[VectorRecord], namespace: &str) -> Result<usize>;

    /// Writes records in slices of `batch_size`.
    fn upsert_batch(
        &self,
        records: &[VectorRecord],
        batch_size: usize,
        namespace: &str,
    ) -> Result<usize> {
        let mut total = 0usize;
        for (batch_idx, batch) in records.chunks(batch_size.max(1)).enumerate() {
            let upserted = self.upsert(batch, namespace)?;
            tracing::debug!(batch = batch_idx + 1, upserted, "upserted batch");
            total += upserted;
        }
        tracing::info!(total, requested = records.len(), "upsert finished");
        Ok(total)
    }

    /// Returns up to `top_k` nearest neighbours of `vector`.
    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Value>,
        namespace: &str,
        include_metadata: bool,
    ) -> Result<Vec<QueryMatch>>;

    /// Removes vectors.
    fn delete(&self, request: &DeleteRequest, namespace: &str) -> Result<()>;

    /// Index-wide statistics.
    fn stats(&self) -> Result<IndexStats>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn records_require_parallel_lengths() {
        let err = records_from_parts(
            vec!["a".into(), "b".into()],
            vec![vec![0.1]],
            vec![Metadata::new(), Metadata::new()],
        )
        .unwrap_err();
        assert!(err.to_string().contains("same length"));

        let records = records_from_parts(
            vec!["a".into()],
            vec![vec![0.5, 0.25]],
            vec![Metadata::new()],
        )
        .unwrap();
        assert_eq!(records[0].id, "a");
        assert_eq!(records[0].values, vec![0.5, 0.25]);
    }

    #[test]
    fn clean_metadata_drops_nulls_only() {
        let Value::Object(meta) = json!({"source": "a.pdf", "title": null, "chunk_index": 0, "flag": false})
        else {
            unreachable!()
        };
        let cleaned = clean_metadata(&meta);
        assert_eq!(
            Value::Object(cleaned),
            json!({"source": "a.pdf", "chunk_index": 0, "flag": false})
        );
    }

    #[test]
    fn stats_parse_camel_case_payload() {
        let stats: IndexStats = serde_json::from_value(json!({
            "namespaces": {"": {"vectorCount": 12}, "drafts": {"vectorCount": 3}},
            "dimension": 768,
            "indexFullness": 0.0,
            "totalVectorCount": 15
        }))
        .unwrap();
        assert_eq!(stats.dimension, 768);
        assert_eq!(stats.total_vector_count, 15);
        assert_eq!(stats.namespace_count(""), 12);
        assert_eq!(stats.namespace_count("missing"), 0);
    }
}
