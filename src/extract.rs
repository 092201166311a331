//! Plain-text extraction for uploaded documents.
//!
//! Uploads arrive as bytes plus a declared MIME type; this module turns them
//! into UTF-8 text for the chunker. Plain text and Markdown are decoded
//! lossily, PDFs go through `pdf-extract`, and DOCX files are unzipped and
//! stripped down to their `<w:t>` runs with a newline per paragraph.

use std::io::Read;

use miette::Diagnostic;
use thiserror::Error;

/// MIME types the pipeline accepts.
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// All accepted MIME types, in display order.
pub const SUPPORTED_MIME_TYPES: [&str; 4] = [MIME_TEXT, MIME_MARKDOWN, MIME_PDF, MIME_DOCX];

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// True when `mime_type` is one of the accepted upload types.
#[must_use]
pub fn is_supported_mime(mime_type: &str) -> bool {
    SUPPORTED_MIME_TYPES.contains(&mime_type)
}

/// Extraction failure; the ingestion pipeline records it on the document.
#[derive(Debug, Error, Diagnostic)]
pub enum ExtractError {
    #[error("Unsupported file type: {mime_type}")]
    #[diagnostic(
        code(ragweave::extract::unsupported),
        help("Accepted types are text/plain, text/markdown, application/pdf, and DOCX.")
    )]
    Unsupported { mime_type: String },

    #[error("PDF extraction failed: {message}")]
    #[diagnostic(code(ragweave::extract::pdf))]
    Pdf { message: String },

    #[error("DOCX extraction failed: {message}")]
    #[diagnostic(code(ragweave::extract::docx))]
    Docx { message: String },
}

/// Extracts plain text from `bytes` according to the declared MIME type.
pub fn extract_text(bytes: &[u8], mime_type: &str) -> Result<String, ExtractError> {
    match mime_type {
        MIME_TEXT | MIME_MARKDOWN => Ok(String::from_utf8_lossy(bytes).into_owned()),
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        _ => Err(ExtractError::Unsupported {
            mime_type: mime_type.to_string(),
        }),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf {
        message: e.to_string(),
    })
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let docx_err = |message: String| ExtractError::Docx { message };

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| docx_err(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| docx_err(format!("word/document.xml: {e}")))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| docx_err(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(docx_err("word/document.xml exceeds size limit".to_string()));
    }

    extract_docx_runs(&doc_xml)
}

/// Collects `<w:t>` text runs, inserting a newline at each paragraph end.
///
/// Text outside `<w:t>` (formatting markup, inter-tag whitespace) is ignored;
/// text inside a run is kept verbatim so spacing between runs survives.
fn extract_docx_runs(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text_run = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text_run = true;
                }
            }
            Ok(quick_xml::events::Event::Text(te)) => {
                if in_text_run {
                    out.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"t" => in_text_run = false,
                    b"p" => out.push('\n'),
                    _ => {}
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => {
                return Err(ExtractError::Docx {
                    message: e.to_string(),
                });
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
