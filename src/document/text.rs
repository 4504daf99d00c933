//! Plain text and Markdown files.

use std::borrow::Cow;
use std::path::Path;

use super::{read_bytes, DocumentProcessor, DocumentProperties, ExtractedDocument};
use crate::error::DocumentError;

/// Reads `txt`, `md` and `markdown` files.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextProcessor;

impl DocumentProcessor for TextProcessor {
    fn name(&self) -> &'static str {
        "text"
    }

    fn formats(&self) -> &'static [&'static str] {
        &["txt", "md", "markdown"]
    }

    fn process(&self, path: &Path) -> Result<ExtractedDocument, DocumentError> {
        let bytes = read_bytes(path)?;
        let (content, fallback) = decode_text(&bytes);
        if fallback {
            tracing::debug!(path = %path.display(), "file is not UTF-8; decoded as Latin-1");
        }
        Ok(ExtractedDocument {
            content: content.into_owned(),
            properties: DocumentProperties::default(),
        })
    }
}

/// Decodes UTF-8 (stripping a BOM) and falls back to Latin-1, which accepts any byte.
///
/// The flag is true when the fallback was used.
pub fn decode_text(bytes: &[u8]) -> (Cow<'_, str>, bool) {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => (Cow::Borrowed(text), false),
        Err(_) => (
            Cow::Owned(bytes.iter().map(|&byte| byte as char).collect()),
            true,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_utf8_with_and_without_bom() {
        let (text, fallback) = decode_text("Côte d'Ivoire".as_bytes());
        assert_eq!(text, "Côte d'Ivoire");
        assert!(!fallback);

        let (text, fallback) = decode_text(b"\xEF\xBB\xBFAbuja");
        assert_eq!(text, "Abuja");
        assert!(!fallback);
    }

    #[test]
    fn falls_back_to_latin1() {
        let (text, fallback) = decode_text(b"C\xF4te d'Ivoire");
        assert_eq!(text, "Côte d'Ivoire");
        assert!(fallback);
    }
}
