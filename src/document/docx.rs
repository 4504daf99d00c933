//! DOCX extraction: paragraphs from `word/document.xml`, properties from `docProps/core.xml`.

use std::io::{Cursor, Read};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use zip::ZipArchive;

use super::{read_bytes, DocumentProcessor, DocumentProperties, ExtractedDocument};
use crate::error::DocumentError;

const BODY_PART: &str = "word/document.xml";
const CORE_PART: &str = "docProps/core.xml";

/// Office Open XML word-processing documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocxProcessor;

impl DocumentProcessor for DocxProcessor {
    fn name(&self) -> &'static str {
        "docx"
    }

    fn formats(&self) -> &'static [&'static str] {
        &["docx"]
    }

    fn process(&self, path: &Path) -> Result<ExtractedDocument, DocumentError> {
        let bytes = read_bytes(path)?;
        let docx_error = |message: String| DocumentError::Docx {
            path: path.to_path_buf(),
            message,
        };
        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).map_err(|err| docx_error(err.to_string()))?;

        let body = read_part(&mut archive, BODY_PART)
            .map_err(docx_error)?
            .ok_or_else(|| docx_error(format!("missing {BODY_PART}")))?;
        let paragraphs = extract_paragraphs(&body).map_err(docx_error)?;

        let properties = match read_part(&mut archive, CORE_PART).map_err(docx_error)? {
            Some(core) => parse_core_properties(&core).map_err(docx_error)?,
            None => DocumentProperties::default(),
        };

        Ok(ExtractedDocument {
            content: paragraphs.join("\n\n"),
            properties,
        })
    }
}

fn read_part<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, String> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err.to_string()),
    };
    let mut xml = String::new();
    file.read_to_string(&mut xml)
        .map_err(|err| format!("failed to read {name}: {err}"))?;
    Ok(Some(xml))
}

/// Returns the non-blank paragraphs of a `document.xml` body, in order.
pub fn extract_paragraphs(xml: &str) -> Result<Vec<String>, String> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text_run = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"p" => current.clear(),
                b"t" => in_text_run = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => current.push('\t'),
                b"br" | b"cr" => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) if in_text_run => {
                let text = e
                    .unescape()
                    .map_err(|err| format!("bad text in {BODY_PART}: {err}"))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => {
                    if !current.trim().is_empty() {
                        paragraphs.push(std::mem::take(&mut current));
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(format!(
                    "XML error in {BODY_PART} at byte {}: {err}",
                    reader.buffer_position()
                ))
            }
            _ => {}
        }
    }
    Ok(paragraphs)
}

/// Reads title, creator, subject and created from `core.xml`.
pub fn parse_core_properties(xml: &str) -> Result<DocumentProperties, String> {
    let mut reader = Reader::from_str(xml);
    let mut properties = DocumentProperties::default();
    let mut field: Option<Vec<u8>> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                field = Some(e.local_name().as_ref().to_vec());
            }
            Ok(Event::Text(e)) => {
                let Some(name) = field.as_deref() else {
                    continue;
                };
                let value = e
                    .unescape()
                    .map_err(|err| format!("bad text in {CORE_PART}: {err}"))?
                    .into_owned();
                match name {
                    b"title" => properties.title = Some(value),
                    b"creator" => properties.author = Some(value),
                    b"subject" => properties.subject = Some(value),
                    b"created" => properties.created = Some(value),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => field = None,
            Ok(Event::Eof) => break,
            Err(err) => return Err(format!("XML error in {CORE_PART}: {err}")),
            _ => {}
        }
    }
    Ok(properties.normalized())
}
