//! Pinecone REST client: control plane (index management) and data plane
//! (vectors).

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    clean_metadata, DeleteRequest, IndexStats, Metadata, QueryMatch, VectorRecord, VectorStore,
};
use crate::config::{Metric, PineconeSettings};
use crate::http::{error_body, is_retryable_error, retry_backoff, should_retry};

const API_VERSION: &str = "2024-07";

/// Shared HTTP plumbing for both planes.
#[derive(Clone)]
struct Transport {
    client: Client,
    max_retries: usize,
    retry_base: Duration,
}

impl Transport {
    fn new(api_key: &str, timeout: Duration, max_retries: usize) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing Pinecone API key");
        let mut headers = HeaderMap::new();
        headers.insert(
            "Api-Key",
            HeaderValue::from_str(api_key.trim()).context("invalid Pinecone API key")?,
        );
        headers.insert(
            "X-Pinecone-API-Version",
            HeaderValue::from_static(API_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build Pinecone HTTP client")?;
        Ok(Self {
            client,
            max_retries: max_retries.max(1),
            retry_base: Duration::from_millis(500),
        })
    }

    /// Sends the request built by `build`, retrying 429/5xx and transport errors.
    fn send<F>(&self, what: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            match build(&self.client).send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    let body = error_body(resp);
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tracing::warn!(%status, attempt, what, "retrying Pinecone request");
                        thread::sleep(retry_backoff(self.retry_base, attempt));
                        continue;
                    }
                    anyhow::bail!("Pinecone {} failed ({}): {}", what, status, body);
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        tracing::warn!(error = %err, attempt, what, "retrying Pinecone request");
                        thread::sleep(retry_backoff(self.retry_base, attempt));
                        continue;
                    }
                    return Err(anyhow::Error::new(err).context(format!("Pinecone {what} failed")));
                }
            }
        }
    }
}

/// Parameters for a new serverless index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    /// Index name.
    pub name: String,
    /// Vector dimension.
    pub dimension: usize,
    /// Similarity metric.
    pub metric: Metric,
    /// Cloud provider (`aws`, `gcp`, `azure`).
    pub cloud: String,
    /// Cloud region.
    pub region: String,
}

/// Index as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IndexDescription {
    /// Index name.
    pub name: String,
    /// Vector dimension.
    #[serde(default)]
    pub dimension: usize,
    /// Metric name.
    #[serde(default)]
    pub metric: String,
    /// Data-plane host (no scheme).
    #[serde(default)]
    pub host: String,
    /// Readiness.
    #[serde(default)]
    pub status: Option<IndexStatus>,
}

impl IndexDescription {
    fn is_ready(&self) -> bool {
        self.status.as_ref().map(|s| s.ready).unwrap_or(false)
    }
}

/// Provisioning state of an index.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IndexStatus {
    /// True once the index accepts data-plane traffic.
    #[serde(default)]
    pub ready: bool,
    /// Free-form state (`Initializing`, `Ready`, ...).
    #[serde(default)]
    pub state: String,
}

/// Control-plane client.
pub struct PineconeClient {
    transport: Transport,
    controller_url: String,
    index: IndexSpec,
    ready_poll_interval: Duration,
    ready_poll_attempts: usize,
}

impl PineconeClient {
    /// Builds a client that manages the index described by `index`.
    pub fn new(
        api_key: &str,
        controller_url: &str,
        index: IndexSpec,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self> {
        anyhow::ensure!(
            controller_url.starts_with("http://") || controller_url.starts_with("https://"),
            "Pinecone controller URL must be an http(s) URL"
        );
        anyhow::ensure!(!index.name.trim().is_empty(), "index name is required");
        let transport = Transport::new(api_key, timeout, max_retries)?;
        tracing::info!(index = %index.name, "initialized Pinecone client");
        Ok(Self {
            transport,
            controller_url: controller_url.trim_end_matches('/').to_string(),
            index,
            ready_poll_interval: Duration::from_secs(1),
            ready_poll_attempts: 60,
        })
    }

    /// Builds a client from the shared settings; fails without an API key.
    pub fn from_settings(settings: &PineconeSettings) -> Result<Self> {
        let api_key = settings.require_api_key()?;
        let index = IndexSpec {
            name: settings.index_name.clone(),
            dimension: settings.dimension,
            metric: settings.metric,
            cloud: settings.cloud.clone(),
            region: settings.region.clone(),
        };
        Self::new(
            api_key,
            &settings.controller_url,
            index,
            settings.timeout(),
            settings.max_retries,
        )
    }

    /// Overrides the base delay between retried requests.
    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.transport.retry_base = retry_base;
        self
    }

    /// Overrides how long [`Self::ensure_index`] waits for a new index.
    pub fn with_ready_poll(mut self, interval: Duration, attempts: usize) -> Self {
        self.ready_poll_interval = interval;
        self.ready_poll_attempts = attempts.max(1);
        self
    }

    /// Name of the managed index.
    pub fn index_name(&self) -> &str {
        &self.index.name
    }

    /// All indexes in the project.
    pub fn list_indexes(&self) -> Result<Vec<IndexDescription>> {
        let url = format!("{}/indexes", self.controller_url);
        let resp = self.transport.send("list indexes", |client| client.get(&url))?;
        let parsed: IndexList = resp
            .json()
            .context("failed to parse Pinecone index list")?;
        Ok(parsed.indexes)
    }

    /// Creates a serverless index.
    pub fn create_index(&self, spec: &IndexSpec) -> Result<()> {
        anyhow::ensure!(spec.dimension > 0, "index dimension must be positive");
        let url = format!("{}/indexes", self.controller_url);
        let body = CreateIndexRequest {
            name: &spec.name,
            dimension: spec.dimension,
            metric: spec.metric.as_str(),
            spec: ServerlessEnvelope {
                serverless: ServerlessSpec {
                    cloud: &spec.cloud,
                    region: &spec.region,
                },
            },
        };
        self.transport
            .send("create index", |client| client.post(&url).json(&body))?;
        tracing::info!(index = %spec.name, dimension = spec.dimension, "created Pinecone index");
        Ok(())
    }

    /// Describes one index, including its data-plane host.
    pub fn describe_index(&self, name: &str) -> Result<IndexDescription> {
        let url = format!("{}/indexes/{}", self.controller_url, name);
        let resp = self
            .transport
            .send("describe index", |client| client.get(&url))?;
        resp.json()
            .with_context(|| format!("failed to parse description of index {name}"))
    }

    /// Creates the managed index with `dimension` if it is missing, waits for
    /// it to become ready and connects to it.
    pub fn ensure_index(&self, dimension: usize) -> Result<PineconeIndex> {
        let exists = self
            .list_indexes()?
            .iter()
            .any(|index| index.name == self.index.name);
        if exists {
            tracing::info!(index = %self.index.name, "index already exists");
        } else {
            tracing::info!(index = %self.index.name, dimension, "creating index");
            let spec = IndexSpec {
                dimension,
                ..self.index.clone()
            };
            self.create_index(&spec)?;
        }

        let mut attempts = 0usize;
        loop {
            let description = self.describe_index(&self.index.name)?;
            if description.is_ready() || description.status.is_none() {
                return self.index_from_description(&description);
            }
            attempts += 1;
            anyhow::ensure!(
                attempts < self.ready_poll_attempts,
                "index {} not ready after {} checks",
                self.index.name,
                attempts
            );
            tracing::debug!(index = %self.index.name, attempts, "waiting for index to become ready");
            thread::sleep(self.ready_poll_interval);
        }
    }

    /// Connects to the managed index, which must already exist.
    pub fn connect(&self) -> Result<PineconeIndex> {
        let description = self.describe_index(&self.index.name)?;
        self.index_from_description(&description)
    }

    fn index_from_description(&self, description: &IndexDescription) -> Result<PineconeIndex> {
        anyhow::ensure!(
            !description.host.trim().is_empty(),
            "index {} has no host yet",
            description.name
        );
        let base_url = if description.host.starts_with("http://")
            || description.host.starts_with("https://")
        {
            description.host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", description.host.trim_end_matches('/'))
        };
        tracing::info!(index = %description.name, host = %base_url, "connected to Pinecone index");
        Ok(PineconeIndex {
            transport: self.transport.clone(),
            base_url,
            name: description.name.clone(),
            dimension: description.dimension,
        })
    }
}

/// Data-plane handle for one index. Obtained from [`PineconeClient`].
#[derive(Clone)]
pub struct PineconeIndex {
    transport: Transport,
    base_url: String,
    name: String,
    dimension: usize,
}

impl PineconeIndex {
    /// Index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Vector dimension reported by the control plane (0 when unknown).
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Data-plane base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl VectorStore for PineconeIndex {
    fn upsert(&self, records: &[VectorRecord], namespace: &str) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        if self.dimension > 0 {
            if let Some(bad) = records.iter().find(|r| r.values.len() != self.dimension) {
                anyhow::bail!(
                    "vector {} has dimension {}, index {} expects {}",
                    bad.id,
                    bad.values.len(),
                    self.name,
                    self.dimension
                );
            }
        }
        let vectors: Vec<UpsertVector<'_>> = records
            .iter()
            .map(|record| UpsertVector {
                id: &record.id,
                values: &record.values,
                metadata: clean_metadata(&record.metadata),
            })
            .collect();
        let body = UpsertRequest { vectors, namespace };
        let url = format!("{}/vectors/upsert", self.base_url);
        let resp = self
            .transport
            .send("upsert", |client| client.post(&url).json(&body))?;
        let parsed: UpsertResponse = resp
            .json()
            .context("failed to parse Pinecone upsert response")?;
        tracing::info!(upserted = parsed.upserted_count, index = %self.name, "upserted vectors");
        Ok(parsed.upserted_count)
    }

    fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Value>,
        namespace: &str,
        include_metadata: bool,
    ) -> Result<Vec<QueryMatch>> {
        anyhow::ensure!(top_k > 0, "top_k must be positive");
        let body = QueryRequest {
            vector,
            top_k,
            filter,
            namespace,
            include_metadata,
            include_values: false,
        };
        let url = format!("{}/query", self.base_url);
        let resp = self
            .transport
            .send("query", |client| client.post(&url).json(&body))?;
        let parsed: QueryResponse = resp
            .json()
            .context("failed to parse Pinecone query response")?;
        tracing::debug!(matches = parsed.matches.len(), "query finished");
        Ok(parsed.matches)
    }

    fn delete(&self, request: &DeleteRequest, namespace: &str) -> Result<()> {
        let body = match request {
            DeleteRequest::Ids(ids) if ids.is_empty() => {
                tracing::warn!("no deletion criteria specified");
                return Ok(());
            }
            DeleteRequest::Ids(ids) => DeleteBody {
                ids: Some(ids),
                filter: None,
                delete_all: None,
                namespace,
            },
            DeleteRequest::Filter(filter) => DeleteBody {
                ids: None,
                filter: Some(filter),
                delete_all: None,
                namespace,
            },
            DeleteRequest::All => DeleteBody {
                ids: None,
                filter: None,
                delete_all: Some(true),
                namespace,
            },
        };
        let url = format!("{}/vectors/delete", self.base_url);
        self.transport
            .send("delete", |client| client.post(&url).json(&body))?;
        match request {
            DeleteRequest::Ids(ids) => tracing::info!(count = ids.len(), "deleted vectors"),
            DeleteRequest::Filter(_) => tracing::info!("deleted vectors matching filter"),
            DeleteRequest::All => tracing::info!(namespace, "deleted all vectors in namespace"),
        }
        Ok(())
    }

    fn stats(&self) -> Result<IndexStats> {
        let url = format!("{}/describe_index_stats", self.base_url);
        let resp = self.transport.send("describe index stats", |client| {
            client.post(&url).json(&serde_json::json!({}))
        })?;
        let stats: IndexStats = resp
            .json()
            .context("failed to parse Pinecone index stats")?;
        tracing::info!(total = stats.total_vector_count, index = %self.name, "index stats");
        Ok(stats)
    }
}

#[derive(Debug, Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexDescription>,
}

#[derive(Serialize)]
struct CreateIndexRequest<'a> {
    name: &'a str,
    dimension: usize,
    metric: &'a str,
    spec: ServerlessEnvelope<'a>,
}

#[derive(Serialize)]
struct ServerlessEnvelope<'a> {
    serverless: ServerlessSpec<'a>,
}

#[derive(Serialize)]
struct ServerlessSpec<'a> {
    cloud: &'a str,
    region: &'a str,
}

#[derive(Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    metadata: Metadata,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<UpsertVector<'a>>,
    #[serde(skip_serializing_if = "str::is_empty")]
    namespace: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a Value>,
    #[serde(skip_serializing_if = "str::is_empty")]
    namespace: &'a str,
    include_metadata: bool,
    include_values: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    ids: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delete_all: Option<bool>,
    #[serde(skip_serializing_if = "str::is_empty")]
    namespace: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn delete_bodies_match_request_kind() {
        let ids = vec!["a".to_string()];
        let body = DeleteBody {
            ids: Some(&ids),
            filter: None,
            delete_all: None,
            namespace: "",
        };
        assert_eq!(serde_json::to_value(&body).unwrap(), json!({"ids": ["a"]}));

        let body = DeleteBody {
            ids: None,
            filter: None,
            delete_all: Some(true),
            namespace: "drafts",
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"deleteAll": true, "namespace": "drafts"})
        );
    }

    #[test]
    fn query_body_uses_camel_case() {
        let filter = json!({"sector": {"$eq": "energy"}});
        let body = QueryRequest {
            vector: &[0.5],
            top_k: 3,
            filter: Some(&filter),
            namespace: "",
            include_metadata: true,
            include_values: false,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "vector": [0.5],
                "topK": 3,
                "filter": {"sector": {"$eq": "energy"}},
                "includeMetadata": true,
                "includeValues": false
            })
        );
    }

    #[test]
    fn readiness_defaults_to_false() {
        let description: IndexDescription =
            serde_json::from_value(json!({"name": "kb", "host": "kb.svc.pinecone.io"})).unwrap();
        assert!(!description.is_ready());
        assert_eq!(description.dimension, 0);
    }
}
