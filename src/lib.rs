#![warn(missing_docs)]
//! Core library for the summit knowledge base: document ingestion, chunking,
//! Ollama embeddings and Pinecone-backed semantic search.

pub mod chunker;
pub mod config;
pub mod document;
pub mod embedder;
pub mod error;
mod http;
pub mod knowledge;
pub mod llm;
pub mod logging;
pub mod metadata;
pub mod vector_store;

pub use chunker::{build_chunker, Chunker, TextChunk};
pub use config::{load_dotenv, Settings};
pub use document::{ExtractedDocument, ProcessorRegistry};
pub use embedder::{Embedder, OllamaEmbedder};
pub use error::{DocumentError, IngestError};
pub use knowledge::{BatchReport, IngestReport, KnowledgeBase, SearchHit};
pub use llm::OllamaLlm;
pub use vector_store::{PineconeClient, PineconeIndex, VectorStore};
