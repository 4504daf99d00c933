//! Knowledge base: wires document processing, chunking, embeddings and the
//! vector store into ingestion and search.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::chunker::{build_chunker, Chunker};
use crate::config::IngestionSettings;
use crate::document::{discover_documents, display_name, extension_of, ProcessorRegistry};
use crate::embedder::Embedder;
use crate::error::{DocumentError, IngestError};
use crate::llm::{
    build_answer_prompt, GenerationOptions, OllamaLlm, ANSWER_SYSTEM_PROMPT,
};
use crate::metadata::{extract_metadata_from_filename, DocumentType, Sector};
use crate::vector_store::{
    clean_metadata, records_from_parts, DeleteRequest, IndexStats, Metadata, QueryMatch,
    VectorStore,
};

/// Characters of chunk text stored in the `content` metadata field.
pub const CONTENT_PREVIEW_CHARS: usize = 500;

/// Outcome of ingesting one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// File that was ingested.
    pub file: PathBuf,
    /// Chunks produced.
    pub chunks: usize,
    /// Vectors the store acknowledged.
    pub upserted: usize,
}

/// Outcome of ingesting a directory.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// Documents discovered.
    pub total: usize,
    /// Successful ingests, in discovery order.
    pub succeeded: Vec<IngestReport>,
    /// Files that failed, with the rendered error.
    pub failed: Vec<(PathBuf, String)>,
}

impl BatchReport {
    /// Chunks created across successful files.
    pub fn total_chunks(&self) -> usize {
        self.succeeded.iter().map(|report| report.chunks).sum()
    }
}

/// Well-known metadata of a search hit.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HitMetadata {
    /// Source path.
    pub source: Option<String>,
    /// File extension.
    pub file_type: Option<String>,
    /// Inferred document type.
    pub document_type: Option<String>,
    /// Inferred sector.
    pub sector: Option<String>,
    /// Position of the chunk within its document.
    pub chunk_index: Option<u64>,
    /// Chunks in the document.
    pub total_chunks: Option<u64>,
    /// Remaining metadata fields.
    pub extra: Metadata,
}

impl HitMetadata {
    fn from_map(mut map: Metadata) -> Self {
        let mut take_str = |key: &str| match map.remove(key) {
            Some(Value::String(s)) => Some(s),
            Some(other) if !other.is_null() => Some(other.to_string()),
            _ => None,
        };
        let source = take_str("source");
        let file_type = take_str("file_type");
        let document_type = take_str("document_type");
        let sector = take_str("sector");
        // The store may hand integers back as floats.
        let mut take_count = |key: &str| {
            map.remove(key).and_then(|value| {
                value
                    .as_u64()
                    .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            })
        };
        let chunk_index = take_count("chunk_index");
        let total_chunks = take_count("total_chunks");
        Self {
            source,
            file_type,
            document_type,
            sector,
            chunk_index,
            total_chunks,
            extra: map,
        }
    }
}

/// A search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Chunk id.
    pub id: String,
    /// Similarity score.
    pub score: f32,
    /// Stored chunk preview.
    pub content: String,
    /// Chunk metadata.
    pub metadata: HitMetadata,
}

impl From<QueryMatch> for SearchHit {
    fn from(m: QueryMatch) -> Self {
        let mut map = m.metadata.unwrap_or_default();
        let content = match map.remove("content") {
            Some(Value::String(s)) => s,
            _ => String::new(),
        };
        Self {
            id: m.id,
            score: m.score,
            content,
            metadata: HitMetadata::from_map(map),
        }
    }
}

/// Parameters for [`KnowledgeBase::answer`].
pub struct AnswerRequest<'a> {
    /// Question to answer.
    pub question: &'a str,
    /// Chunks to retrieve.
    pub top_k: usize,
    /// Optional metadata filter.
    pub filter: Option<&'a Value>,
    /// Namespace to search.
    pub namespace: &'a str,
    /// Optional answer length hint.
    pub max_words: Option<usize>,
    /// Sampling parameters.
    pub options: &'a GenerationOptions,
}

/// A generated answer and the chunks it was grounded on.
#[derive(Debug, Clone)]
pub struct Answer {
    /// Retrieved context.
    pub hits: Vec<SearchHit>,
    /// Model output.
    pub text: String,
}

/// Builds a Pinecone-style `$eq` filter from optional sector and document type.
pub fn metadata_filter(sector: Option<Sector>, document_type: Option<DocumentType>) -> Option<Value> {
    let mut clauses = serde_json::Map::new();
    if let Some(sector) = sector {
        clauses.insert("sector".into(), json!({ "$eq": sector.as_str() }));
    }
    if let Some(document_type) = document_type {
        clauses.insert("document_type".into(), json!({ "$eq": document_type.as_str() }));
    }
    (!clauses.is_empty()).then_some(Value::Object(clauses))
}

/// Deterministic chunk id: hex SHA-256 of `"{path}_{index}"`.
pub fn chunk_id(path: &Path, index: usize) -> String {
    let digest = Sha256::digest(format!("{}_{}", path.display(), index).as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Document ingestion and semantic search over an [`Embedder`] and a [`VectorStore`].
pub struct KnowledgeBase<E, S> {
    embedder: E,
    store: S,
    registry: ProcessorRegistry,
    chunker: Box<dyn Chunker>,
    batch_size: usize,
}

impl<E: Embedder, S: VectorStore> KnowledgeBase<E, S> {
    /// Knowledge base with the default processors and the configured chunker.
    pub fn new(embedder: E, store: S, settings: &IngestionSettings) -> Self {
        Self::with_parts(
            embedder,
            store,
            ProcessorRegistry::new(),
            build_chunker(settings),
            settings.batch_size,
        )
    }

    /// Knowledge base from explicit parts.
    pub fn with_parts(
        embedder: E,
        store: S,
        registry: ProcessorRegistry,
        chunker: Box<dyn Chunker>,
        batch_size: usize,
    ) -> Self {
        tracing::info!(model = embedder.model(), "initialized knowledge base");
        Self {
            embedder,
            store,
            registry,
            chunker,
            batch_size: batch_size.max(1),
        }
    }

    /// Embedding backend.
    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    /// Vector store backend.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Extracts, chunks, embeds and stores one document.
    ///
    /// Re-ingesting a path overwrites its earlier vectors because chunk ids
    /// are derived from the path and chunk position.
    pub fn ingest_document(
        &self,
        path: &Path,
        overrides: Option<&Metadata>,
        namespace: &str,
    ) -> Result<IngestReport, IngestError> {
        tracing::info!(file = %display_name(path), "ingesting document");
        let document = self.registry.process_document(path)?;

        let file_size = fs::metadata(path)
            .map_err(|source| DocumentError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        let mut base = Metadata::new();
        base.insert("source".into(), json!(path.display().to_string()));
        base.insert("file_type".into(), json!(extension_of(path)));
        base.insert("file_size".into(), json!(file_size));
        base.insert("processed_at".into(), json!(chrono::Utc::now().to_rfc3339()));
        merge_object(&mut base, serde_json::to_value(&document.properties));
        merge_object(
            &mut base,
            serde_json::to_value(extract_metadata_from_filename(&display_name(path))),
        );
        if let Some(overrides) = overrides {
            base.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let chunks = self.chunker.chunk(&document.content);
        if chunks.is_empty() {
            tracing::warn!(file = %display_name(path), "no chunks created");
            return Err(IngestError::NoChunks(path.to_path_buf()));
        }
        tracing::info!(file = %display_name(path), chunks = chunks.len(), "created chunks");

        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts)
            .map_err(IngestError::Embedding)?;

        let total = chunks.len();
        let mut ids = Vec::with_capacity(total);
        let mut metadata = Vec::with_capacity(total);
        for chunk in &chunks {
            ids.push(chunk_id(path, chunk.index));
            let mut meta = Metadata::new();
            meta.insert("chunk_index".into(), json!(chunk.index));
            meta.insert("total_chunks".into(), json!(total));
            meta.insert(
                "content".into(),
                json!(chunk.text.chars().take(CONTENT_PREVIEW_CHARS).collect::<String>()),
            );
            meta.extend(base.iter().map(|(k, v)| (k.clone(), v.clone())));
            metadata.push(clean_metadata(&meta));
        }

        let records = records_from_parts(ids, vectors, metadata).map_err(IngestError::Embedding)?;
        let upserted = self
            .store
            .upsert_batch(&records, self.batch_size, namespace)
            .map_err(IngestError::Store)?;
        tracing::info!(file = %display_name(path), upserted, "ingested document");
        Ok(IngestReport {
            file: path.to_path_buf(),
            chunks: total,
            upserted,
        })
    }

    /// Ingests every supported document under `dir`. Individual failures are
    /// recorded and do not stop the batch.
    pub fn ingest_directory(&self, dir: &Path, namespace: &str) -> Result<BatchReport> {
        let extensions = self.registry.supported_extensions();
        let documents = discover_documents(dir, &extensions)
            .with_context(|| format!("failed to scan {}", dir.display()))?;
        tracing::info!(dir = %dir.display(), documents = documents.len(), "found documents");

        let mut report = BatchReport {
            total: documents.len(),
            ..BatchReport::default()
        };
        for path in documents {
            match self.ingest_document(&path, None, namespace) {
                Ok(done) => {
                    tracing::info!(file = %display_name(&path), chunks = done.chunks, "ingested");
                    report.succeeded.push(done);
                }
                Err(err) => {
                    tracing::error!(file = %display_name(&path), error = %err, "ingest failed");
                    report.failed.push((path, err.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Embeds `query` and returns the nearest chunks.
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&Value>,
        namespace: &str,
    ) -> Result<Vec<SearchHit>> {
        tracing::info!(query, top_k, "searching knowledge base");
        let vector = self
            .embedder
            .embed_query(query)
            .context("failed to embed query")?;
        let matches = self.store.query(&vector, top_k, filter, namespace, true)?;
        let hits: Vec<SearchHit> = matches.into_iter().map(SearchHit::from).collect();
        tracing::info!(results = hits.len(), "search finished");
        Ok(hits)
    }

    /// Retrieves context for `request.question` and asks `llm` to answer from it.
    pub fn answer(&self, llm: &OllamaLlm, request: &AnswerRequest<'_>) -> Result<Answer> {
        let hits = self.search(
            request.question,
            request.top_k,
            request.filter,
            request.namespace,
        )?;
        anyhow::ensure!(
            !hits.is_empty(),
            "no matching chunks in the knowledge base; has anything been ingested?"
        );
        let prompt = build_answer_prompt(request.question, &hits, request.max_words);
        let text = llm
            .generate(&prompt, Some(ANSWER_SYSTEM_PROMPT), request.options)
            .context("failed to generate answer")?;
        Ok(Answer { hits, text })
    }

    /// Index statistics; logs the vector count of `namespace`.
    pub fn stats(&self, namespace: &str) -> Result<IndexStats> {
        let stats = self.store.stats()?;
        tracing::info!(
            namespace,
            vectors = stats.namespace_count(namespace),
            total = stats.total_vector_count,
            "knowledge base stats"
        );
        Ok(stats)
    }

    /// Removes every chunk whose `source` is `path`.
    pub fn delete_document(&self, path: &Path, namespace: &str) -> Result<()> {
        let filter = json!({ "source": { "$eq": path.display().to_string() } });
        self.store
            .delete(&DeleteRequest::Filter(filter), namespace)
            .with_context(|| format!("failed to delete vectors of {}", path.display()))?;
        tracing::info!(file = %display_name(path), "deleted document");
        Ok(())
    }
}

fn merge_object(target: &mut Metadata, value: serde_json::Result<Value>) {
    if let Ok(Value::Object(map)) = value {
        target.extend(map);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::FixedSizeChunker;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;

    struct FakeEmbedder {
        fail_on: Option<&'static str>,
    }

    impl Embedder for FakeEmbedder {
        fn model(&self) -> &str {
            "fake"
        }

        fn dimension(&self) -> usize {
            3
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if let Some(marker) = self.fail_on {
                anyhow::ensure!(!text.contains(marker), "model unavailable");
            }
            let len = text.chars().count() as f32;
            let vowels = text.chars().filter(|c| "aeiou".contains(*c)).count() as f32;
            Ok(vec![1.0, len / 100.0, vowels / 100.0])
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        records: RefCell<Vec<(String, crate::vector_store::VectorRecord)>>,
        deletes: RefCell<Vec<(DeleteRequest, String)>>,
        upsert_calls: RefCell<usize>,
    }

    impl VectorStore for MemoryStore {
        fn upsert(
            &self,
            records: &[crate::vector_store::VectorRecord],
            namespace: &str,
        ) -> Result<usize> {
            *self.upsert_calls.borrow_mut() += 1;
            let mut stored = self.records.borrow_mut();
            for record in records {
                stored.retain(|(ns, existing)| !(ns == namespace && existing.id == record.id));
                stored.push((namespace.to_string(), record.clone()));
            }
            Ok(records.len())
        }

        fn query(
            &self,
            vector: &[f32],
            top_k: usize,
            filter: Option<&Value>,
            namespace: &str,
            _include_metadata: bool,
        ) -> Result<Vec<QueryMatch>> {
            let sector = filter.and_then(|f| f.pointer("/sector/$eq")).cloned();
            let mut matches: Vec<QueryMatch> = self
                .records
                .borrow()
                .iter()
                .filter(|(ns, _)| ns == namespace)
                .filter(|(_, r)| sector.as_ref().map_or(true, |s| r.metadata.get("sector") == Some(s)))
                .map(|(_, r)| QueryMatch {
                    id: r.id.clone(),
                    score: r.values.iter().zip(vector).map(|(a, b)| a * b).sum(),
                    metadata: Some(r.metadata.clone()),
                })
                .collect();
            matches.sort_by(|a, b| b.score.total_cmp(&a.score));
            matches.truncate(top_k);
            Ok(matches)
        }

        fn delete(&self, request: &DeleteRequest, namespace: &str) -> Result<()> {
            self.deletes
                .borrow_mut()
                .push((request.clone(), namespace.to_string()));
            Ok(())
        }

        fn stats(&self) -> Result<IndexStats> {
            Ok(IndexStats {
                dimension: 3,
                total_vector_count: self.records.borrow().len() as u64,
                ..IndexStats::default()
            })
        }
    }

    fn knowledge_base(fail_on: Option<&'static str>) -> KnowledgeBase<FakeEmbedder, MemoryStore> {
        KnowledgeBase::with_parts(
            FakeEmbedder { fail_on },
            MemoryStore::default(),
            ProcessorRegistry::new(),
            Box::new(FixedSizeChunker::new(120, 20)),
            2,
        )
    }

    const ENERGY_TEXT: &str = "The West African Power Pool links national grids. Member states agree to harmonise tariffs. A regional market opens in phases. Solar capacity targets rise each year. Cross-border lines need joint financing. Progress is reviewed at every summit.";

    #[test]
    fn chunk_ids_are_stable_sha256_hex() {
        let path = Path::new("data/raw/energy_policy.pdf");
        let id = chunk_id(path, 3);
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, chunk_id(path, 3));
        assert_ne!(id, chunk_id(path, 4));
    }

    #[test]
    fn ingest_document_stores_chunks_with_merged_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("energy_policy_2024-05-01.txt");
        fs::write(&path, ENERGY_TEXT).unwrap();
        let kb = knowledge_base(None);

        let mut overrides = Metadata::new();
        overrides.insert("sector".into(), json!("investment"));
        overrides.insert("track".into(), json!("plenary"));
        let report = kb.ingest_document(&path, Some(&overrides), "").unwrap();

        assert!(report.chunks > 1);
        assert_eq!(report.upserted, report.chunks);
        assert_eq!(*kb.store().upsert_calls.borrow(), report.chunks.div_ceil(2));

        let stored = kb.store().records.borrow();
        let (_, first) = &stored[0];
        assert_eq!(first.id, chunk_id(&path, 0));
        let meta = &first.metadata;
        assert_eq!(meta["source"], json!(path.display().to_string()));
        assert_eq!(meta["chunk_index"], json!(0));
        assert_eq!(meta["total_chunks"], json!(report.chunks));
        assert_eq!(meta["file_type"], json!("txt"));
        assert_eq!(meta["file_size"], json!(ENERGY_TEXT.len()));
        assert_eq!(meta["document_type"], json!("policy"));
        assert_eq!(meta["date"], json!("2024-05-01"));
        assert_eq!(meta["sector"], json!("investment"));
        assert_eq!(meta["track"], json!("plenary"));
        assert!(meta["content"].as_str().unwrap().starts_with("The West African Power Pool"));
        assert!(meta.contains_key("processed_at"));
        assert!(!meta.values().any(Value::is_null));
    }

    #[test]
    fn reingesting_overwrites_previous_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mining_code.txt");
        fs::write(&path, ENERGY_TEXT).unwrap();
        let kb = knowledge_base(None);

        let first = kb.ingest_document(&path, None, "").unwrap();
        kb.ingest_document(&path, None, "").unwrap();
        assert_eq!(kb.store().records.borrow().len(), first.chunks);
    }

    #[test]
    fn embedding_failure_is_reported_as_embedding_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, ENERGY_TEXT).unwrap();
        let kb = knowledge_base(Some("Solar"));

        let err = kb.ingest_document(&path, None, "").unwrap_err();
        assert!(matches!(err, IngestError::Embedding(_)));
        assert!(kb.store().records.borrow().is_empty());
    }

    #[test]
    fn ingest_directory_continues_past_failures() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a_energy.txt"), ENERGY_TEXT).unwrap();
        fs::write(dir.path().join("b_empty.txt"), "").unwrap();
        fs::write(dir.path().join("c_broken.pdf"), b"not a pdf").unwrap();
        fs::write(dir.path().join("ignored.csv"), "x,y").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/d_agri.md"), ENERGY_TEXT).unwrap();
        let kb = knowledge_base(None);

        let report = kb.ingest_directory(dir.path(), "summit").unwrap();
        assert_eq!(report.total, 4);
        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(report.failed.len(), 2);
        assert!(report.total_chunks() > 0);
        let failed: Vec<String> = report
            .failed
            .iter()
            .map(|(path, _)| display_name(path))
            .collect();
        assert_eq!(failed, vec!["b_empty.txt".to_string(), "c_broken.pdf".to_string()]);
    }

    #[test]
    fn search_maps_metadata_into_hits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("energy_strategy.txt");
        fs::write(&path, ENERGY_TEXT).unwrap();
        let kb = knowledge_base(None);
        kb.ingest_document(&path, None, "").unwrap();

        let filter = metadata_filter(Some(Sector::Energy), None);
        let hits = kb.search("solar targets", 2, filter.as_ref(), "").unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
        let meta = &hits[0].metadata;
        assert_eq!(meta.sector.as_deref(), Some("energy"));
        assert_eq!(meta.document_type.as_deref(), Some("policy"));
        assert_eq!(meta.file_type.as_deref(), Some("txt"));
        assert!(meta.chunk_index.is_some());
        assert!(!hits[0].content.is_empty());
        assert!(!meta.extra.contains_key("content"));

        let none = kb
            .search("solar", 5, metadata_filter(Some(Sector::Minerals), None).as_ref(), "")
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn hit_metadata_accepts_float_counts() {
        let hit = SearchHit::from(QueryMatch {
            id: "x".into(),
            score: 0.5,
            metadata: Some(
                json!({"chunk_index": 4.0, "total_chunks": 9, "content": "text", "title": "T"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            ),
        });
        assert_eq!(hit.content, "text");
        assert_eq!(hit.metadata.chunk_index, Some(4));
        assert_eq!(hit.metadata.total_chunks, Some(9));
        assert_eq!(hit.metadata.source, None);
        assert_eq!(hit.metadata.extra.get("title"), Some(&json!("T")));
    }

    #[test]
    fn delete_document_filters_by_source() {
        let kb = knowledge_base(None);
        kb.delete_document(Path::new("data/raw/a.pdf"), "drafts").unwrap();
        assert_eq!(
            kb.store().deletes.borrow()[0],
            (
                DeleteRequest::Filter(json!({"source": {"$eq": "data/raw/a.pdf"}})),
                "drafts".to_string()
            )
        );
    }

    #[test]
    fn filters_combine_sector_and_type() {
        assert_eq!(metadata_filter(None, None), None);
        assert_eq!(
            metadata_filter(Some(Sector::Agriculture), Some(DocumentType::Treaty)),
            Some(json!({
                "sector": {"$eq": "agriculture"},
                "document_type": {"$eq": "treaty"}
            }))
        );
    }
}
