//! Error types surfaced by document processing and ingestion.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while turning a file on disk into plain text.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The path does not exist, is not a regular file, or is empty.
    #[error("invalid document path {0:?}")]
    InvalidPath(PathBuf),
    /// No registered processor handles the file extension.
    #[error("unsupported document format {extension:?} for {path:?}")]
    UnsupportedFormat {
        /// Offending file.
        path: PathBuf,
        /// Lowercase extension (empty when the file has none).
        extension: String,
    },
    /// Reading the file failed.
    #[error("failed to read {path:?}: {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The PDF text layer could not be extracted.
    #[error("failed to extract PDF text from {path:?}: {message}")]
    Pdf {
        /// File being parsed.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
    /// The DOCX container or its XML parts were malformed.
    #[error("failed to parse DOCX {path:?}: {message}")]
    Docx {
        /// File being parsed.
        path: PathBuf,
        /// Parser message.
        message: String,
    },
    /// Extraction succeeded but produced no text.
    #[error("no text could be extracted from {0:?}")]
    Empty(PathBuf),
}

/// Errors raised by [`crate::KnowledgeBase::ingest_document`].
#[derive(Debug, Error)]
pub enum IngestError {
    /// Text extraction failed.
    #[error("processing failed: {0}")]
    Processing(#[from] DocumentError),
    /// The chunker produced nothing for the extracted text.
    #[error("no chunks created from {0:?}")]
    NoChunks(PathBuf),
    /// The embedding service rejected or failed a request.
    #[error("embedding failed: {0:#}")]
    Embedding(anyhow::Error),
    /// The vector store rejected or failed an upsert.
    #[error("vector store upsert failed: {0:#}")]
    Store(anyhow::Error),
}
