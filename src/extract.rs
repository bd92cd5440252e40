//! Plain-text extraction for the supported document formats.
//!
//! Dispatch is by file extension. Extraction never fails from the caller's
//! point of view: any error is logged and yields an empty string, which the
//! engine reports as "no text extracted".
//!
//! | Extension | Method |
//! |-----------|--------|
//! | `pdf` | `pdf-extract` |
//! | `docx` | `word/document.xml` via `zip` + `quick-xml`, one line per paragraph |
//! | `json` | parsed and re-serialized pretty-printed |
//! | `txt`, `csv`, `md`, `html`, `xml` | UTF-8 as-is |

use std::io::Read;

use tracing::warn;

/// Extensions (lowercase, no dot) the default extractor understands.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "txt", "csv", "json", "md", "html", "xml"];

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Turns file bytes into plain text.
pub trait TextExtractor: Send + Sync {
    /// Extract text from `bytes`, using `filename` to pick the format.
    /// Returns an empty string on any failure.
    fn extract_text(&self, bytes: &[u8], filename: &str) -> String;
}

/// Extractor for every format in [`SUPPORTED_EXTENSIONS`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FileFormatExtractor;

impl TextExtractor for FileFormatExtractor {
    fn extract_text(&self, bytes: &[u8], filename: &str) -> String {
        let ext = extension_of(filename);
        let result = match ext.as_str() {
            "pdf" => extract_pdf(bytes),
            "docx" => extract_docx(bytes),
            "json" => extract_json(bytes),
            "txt" | "csv" | "md" | "html" | "xml" => extract_utf8(bytes),
            other => Err(format!("unsupported extension: '{}'", other)),
        };
        match result {
            Ok(text) => text,
            Err(e) => {
                warn!(filename, error = %e, "text extraction failed");
                String::new()
            }
        }
    }
}

/// Lowercase extension of `filename` without the dot ("" when none).
pub fn extension_of(filename: &str) -> String {
    std::path::Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn extract_utf8(bytes: &[u8]) -> Result<String, String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| format!("invalid UTF-8: {}", e))
}

fn extract_json(bytes: &[u8]) -> Result<String, String> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| format!("invalid JSON: {}", e))?;
    serde_json::to_string_pretty(&value).map_err(|e| e.to_string())
}

fn extract_pdf(bytes: &[u8]) -> Result<String, String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| format!("PDF extraction failed: {}", e))
}

fn extract_docx(bytes: &[u8]) -> Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| "word/document.xml not found".to_string())?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| e.to_string())?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err("word/document.xml exceeds size limit".to_string());
    }
    docx_paragraphs(&doc_xml)
}

/// Collect `w:t` text, one line per `w:p` paragraph.
fn docx_paragraphs(xml: &[u8]) -> Result<String, String> {
    use quick_xml::events::Event;

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                current.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("OOXML parse failed: {}", e)),
            _ => {}
        }
        buf.clear();
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    Ok(paragraphs.join("\n"))
}
