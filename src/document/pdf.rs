//! PDF text layer and Info dictionary extraction.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use lopdf::{Dictionary, Object};

use super::{read_bytes, DocumentProcessor, DocumentProperties, ExtractedDocument};
use crate::error::DocumentError;

const PDFTOPPM: &str = "pdftoppm";
const TESSERACT: &str = "tesseract";
const OCR_DPI: &str = "300";

/// Extracts the embedded text layer. Scanned PDFs without one are OCR'd when `pdftoppm` and
/// `tesseract` are on `PATH`, and yield an empty document otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfProcessor;

impl DocumentProcessor for PdfProcessor {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn formats(&self) -> &'static [&'static str] {
        &["pdf"]
    }

    fn process(&self, path: &Path) -> Result<ExtractedDocument, DocumentError> {
        let bytes = read_bytes(path)?;
        let pdf_error = |message: String| DocumentError::Pdf {
            path: path.to_path_buf(),
            message,
        };
        // pdf-extract panics on some malformed font tables.
        let mut content =
            std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(&bytes))
                .map_err(|_| pdf_error("PDF parser panicked".to_string()))?
                .map_err(|err| pdf_error(err.to_string()))?;
        if content.trim().is_empty() {
            tracing::info!(path = %path.display(), "PDF has no text layer; attempting OCR");
            match ocr_pages(path, PDFTOPPM, TESSERACT) {
                Some(text) => content = text,
                None => tracing::warn!(
                    path = %path.display(),
                    "OCR unavailable; install poppler-utils and tesseract to read scanned PDFs"
                ),
            }
        }
        let properties = read_info(&bytes).unwrap_or_else(|| {
            tracing::debug!(path = %path.display(), "PDF Info dictionary unavailable");
            DocumentProperties::default()
        });
        Ok(ExtractedDocument {
            content,
            properties,
        })
    }
}

/// Renders each page with `pdftoppm` and reads it back with `tesseract`.
///
/// Returns `None` when either tool is missing or rendering fails.
fn ocr_pages(path: &Path, pdftoppm: &str, tesseract: &str) -> Option<String> {
    if !tool_available(pdftoppm) || !tool_available(tesseract) {
        return None;
    }
    let workdir = tempfile::tempdir().ok()?;
    let prefix = workdir.path().join("page");
    let status = Command::new(pdftoppm)
        .args(["-r", OCR_DPI, "-png"])
        .arg(path)
        .arg(&prefix)
        .stderr(Stdio::null())
        .status()
        .ok()?;
    if !status.success() {
        tracing::warn!(path = %path.display(), %status, "pdftoppm failed");
        return None;
    }

    // pdftoppm zero-pads page numbers, so lexical order is page order.
    let mut pages: Vec<PathBuf> = fs::read_dir(workdir.path())
        .ok()?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|page| page.extension().is_some_and(|ext| ext == "png"))
        .collect();
    pages.sort();

    let mut text = String::new();
    for page in &pages {
        let output = match Command::new(tesseract)
            .arg(page)
            .arg("stdout")
            .stderr(Stdio::null())
            .output()
        {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                tracing::warn!(page = %page.display(), status = %output.status, "tesseract failed");
                continue;
            }
            Err(err) => {
                tracing::warn!(page = %page.display(), error = %err, "failed to run tesseract");
                continue;
            }
        };
        text.push_str(&String::from_utf8_lossy(&output.stdout));
        text.push('\n');
    }
    tracing::info!(path = %path.display(), pages = pages.len(), "OCR complete");
    Some(text)
}

fn tool_available(program: &str) -> bool {
    Command::new(program)
        .arg("-v")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

fn read_info(bytes: &[u8]) -> Option<DocumentProperties> {
    let document = lopdf::Document::load_mem(bytes).ok()?;
    let info = match document.trailer.get(b"Info").ok()? {
        Object::Reference(id) => document.get_object(*id).ok()?,
        other => other,
    };
    let dict = info.as_dict().ok()?;
    Some(DocumentProperties {
        title: info_string(dict, b"Title"),
        author: info_string(dict, b"Author"),
        subject: info_string(dict, b"Subject"),
        creator: info_string(dict, b"Creator"),
        created: None,
    })
}

fn info_string(dict: &Dictionary, key: &[u8]) -> Option<String> {
    match dict.get(key).ok()? {
        Object::String(raw, _) => Some(decode_pdf_string(raw)),
        _ => None,
    }
}

/// Decodes a PDF text string: UTF-16BE when it carries a BOM, PDFDocEncoding (treated as
/// Latin-1) otherwise.
pub(crate) fn decode_pdf_string(raw: &[u8]) -> String {
    if let Some(body) = raw.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    raw.iter().map(|&byte| byte as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_utf16_and_latin1_strings() {
        let utf16 = [0xFE, 0xFF, 0x00, b'C', 0x00, 0xF4, 0x00, b't', 0x00, b'e'];
        assert_eq!(decode_pdf_string(&utf16), "Côte");
        assert_eq!(decode_pdf_string(b"Abuja Accord"), "Abuja Accord");
        assert_eq!(decode_pdf_string(&[b'C', 0xF4, b't', b'e']), "Côte");
    }

    #[test]
    fn ocr_is_skipped_when_tools_are_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanned.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();
        assert!(!tool_available("summit-kb-missing-renderer"));
        assert_eq!(
            ocr_pages(&path, "summit-kb-missing-renderer", "summit-kb-missing-ocr"),
            None
        );
    }

    #[test]
    fn garbage_bytes_are_a_pdf_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"this is not a pdf").unwrap();
        let err = PdfProcessor.process(&path).unwrap_err();
        assert!(matches!(err, DocumentError::Pdf { .. }));
    }
}
