//! Turns PDF, DOCX and plain-text files into sanitized text plus document properties.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::error::DocumentError;

pub mod docx;
pub mod pdf;
pub mod text;

pub use docx::DocxProcessor;
pub use pdf::PdfProcessor;
pub use text::TextProcessor;

/// Properties embedded in the document container (PDF Info dictionary, DOCX core properties).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentProperties {
    /// Declared title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Declared author / creator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Declared subject.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Producing application (PDF only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    /// Creation timestamp as stored in the file (DOCX only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
}

impl DocumentProperties {
    /// Drops blank values so they never reach the vector store.
    pub fn normalized(self) -> Self {
        fn keep(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }
        Self {
            title: keep(self.title),
            author: keep(self.author),
            subject: keep(self.subject),
            creator: keep(self.creator),
            created: keep(self.created),
        }
    }
}

/// Text extracted from a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    /// Sanitized body text.
    pub content: String,
    /// Container-level properties.
    pub properties: DocumentProperties,
}

/// A format-specific extractor.
pub trait DocumentProcessor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Lowercase extensions (without the dot) this processor accepts.
    fn formats(&self) -> &'static [&'static str];

    /// Reads the file and returns its raw (unsanitized) text.
    fn process(&self, path: &Path) -> Result<ExtractedDocument, DocumentError>;

    /// True when the path's extension is one of [`Self::formats`].
    fn can_process(&self, path: &Path) -> bool {
        let ext = extension_of(path);
        self.formats().iter().any(|format| *format == ext)
    }
}

/// Lowercase extension without the leading dot (empty when absent).
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

/// True when `path` exists, is a regular file and is not empty.
pub fn validate_file_path(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

/// Removes ASCII control characters and normalizes whitespace.
///
/// Keeps `\t`, `\n` and `\r`, collapses space/tab runs to one space, squeezes three or more
/// newlines down to a blank line, trims each line and the whole text. Trimming drops the `\r`
/// of a CRLF line ending.
pub fn sanitize_text(input: &str) -> String {
    let mut collapsed = String::with_capacity(input.len());
    let mut in_blank_run = false;
    for ch in input.chars() {
        if is_stripped_control(ch) {
            continue;
        }
        if ch == ' ' || ch == '\t' {
            if !in_blank_run {
                collapsed.push(' ');
            }
            in_blank_run = true;
        } else {
            collapsed.push(ch);
            in_blank_run = false;
        }
    }

    let mut out = String::with_capacity(collapsed.len());
    let mut newline_run = 0usize;
    for (idx, line) in collapsed.split('\n').enumerate() {
        if idx > 0 {
            newline_run += 1;
            if newline_run <= 2 {
                out.push('\n');
            }
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            newline_run = 0;
            out.push_str(trimmed);
        }
    }
    out.trim().to_string()
}

fn is_stripped_control(ch: char) -> bool {
    matches!(ch, '\u{0}'..='\u{8}' | '\u{b}' | '\u{c}' | '\u{e}'..='\u{1f}' | '\u{7f}')
}

/// Ordered set of processors; the first one accepting an extension wins.
pub struct ProcessorRegistry {
    processors: Vec<Box<dyn DocumentProcessor>>,
}

impl ProcessorRegistry {
    /// PDF, DOCX and plain-text processors.
    pub fn new() -> Self {
        Self {
            processors: vec![
                Box::new(PdfProcessor),
                Box::new(DocxProcessor),
                Box::new(TextProcessor),
            ],
        }
    }

    /// Builds a registry from custom processors.
    pub fn with_processors(processors: Vec<Box<dyn DocumentProcessor>>) -> Self {
        Self { processors }
    }

    /// Every extension some processor accepts.
    pub fn supported_extensions(&self) -> Vec<&'static str> {
        self.processors
            .iter()
            .flat_map(|processor| processor.formats().iter().copied())
            .collect()
    }

    /// Returns the processor for `path`, if any.
    pub fn get_processor(&self, path: &Path) -> Option<&dyn DocumentProcessor> {
        let found = self
            .processors
            .iter()
            .find(|processor| processor.can_process(path))
            .map(|processor| processor.as_ref());
        if found.is_none() {
            tracing::warn!(path = %path.display(), "no processor found for extension");
        }
        found
    }

    /// Validates, extracts and sanitizes a document.
    pub fn process_document(&self, path: &Path) -> Result<ExtractedDocument, DocumentError> {
        if !validate_file_path(path) {
            return Err(DocumentError::InvalidPath(path.to_path_buf()));
        }
        let processor =
            self.get_processor(path)
                .ok_or_else(|| DocumentError::UnsupportedFormat {
                    path: path.to_path_buf(),
                    extension: extension_of(path),
                })?;

        tracing::info!(file = %display_name(path), processor = processor.name(), "processing document");
        let extracted = processor.process(path)?;
        let content = sanitize_text(&extracted.content);
        if content.is_empty() {
            return Err(DocumentError::Empty(path.to_path_buf()));
        }
        tracing::info!(
            file = %display_name(path),
            characters = content.chars().count(),
            "processed document"
        );
        Ok(ExtractedDocument {
            content,
            properties: extracted.properties.normalized(),
        })
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Recursively lists files under `dir` whose extension is in `extensions`, sorted by path.
pub fn discover_documents(dir: &Path, extensions: &[&str]) -> anyhow::Result<Vec<PathBuf>> {
    anyhow::ensure!(dir.is_dir(), "{:?} is not a directory", dir);
    let mut documents = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = extension_of(entry.path());
        if extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&ext)) {
            documents.push(entry.into_path());
        }
    }
    documents.sort();
    Ok(documents)
}

/// File name for logs, falling back to the full path.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub(crate) fn read_bytes(path: &Path) -> Result<Vec<u8>, DocumentError> {
    fs::read(path).map_err(|source| DocumentError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_whitespace_and_controls() {
        let raw = "  Title\x07  with\t\ttabs  \r\n\n\n\n  body line  \nnext\x00 line ";
        assert_eq!(sanitize_text(raw), "Title with tabs\n\nbody line\nnext line");
    }

    #[test]
    fn sanitize_keeps_carriage_returns_and_non_ascii_controls() {
        assert_eq!(sanitize_text("Abuja\rAccord"), "Abuja\rAccord");
        assert_eq!(sanitize_text("line one\r\nline two\r\n"), "line one\nline two");
        assert_eq!(sanitize_text("a\u{85}b\x0Bc\x0C"), "a\u{85}bc");
    }

    #[test]
    fn sanitize_keeps_single_blank_lines() {
        assert_eq!(sanitize_text("a\n\nb\nc"), "a\n\nb\nc");
        assert_eq!(sanitize_text("\n\n  \n"), "");
    }

    #[test]
    fn extension_matching_is_case_insensitive() {
        let registry = ProcessorRegistry::new();
        assert_eq!(
            registry.get_processor(Path::new("REPORT.PDF")).map(|p| p.name()),
            Some("pdf")
        );
        assert_eq!(
            registry.get_processor(Path::new("notes.markdown")).map(|p| p.name()),
            Some("text")
        );
        assert!(registry.get_processor(Path::new("slides.pptx")).is_none());
        assert!(registry.get_processor(Path::new("README")).is_none());
    }

    #[test]
    fn missing_files_are_rejected() {
        let registry = ProcessorRegistry::new();
        let err = registry
            .process_document(Path::new("/definitely/not/here.txt"))
            .unwrap_err();
        assert!(matches!(err, DocumentError::InvalidPath(_)));
    }

    #[test]
    fn properties_drop_blank_values() {
        let props = DocumentProperties {
            title: Some("  Vision 2050 ".to_string()),
            author: Some("   ".to_string()),
            ..Default::default()
        }
        .normalized();
        assert_eq!(props.title.as_deref(), Some("Vision 2050"));
        assert_eq!(props.author, None);
    }
}
