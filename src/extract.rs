//! PDF signature repair and per-page text extraction.
//!
//! Uploaded files occasionally arrive with junk bytes ahead of the PDF
//! header (truncated multipart framing, BOMs, proxy artifacts). Before
//! extraction the stored bytes are realigned to the first `%PDF`
//! occurrence; extraction itself is delegated to `pdf-extract`.

use crate::error::EngineError;

pub const PDF_MAGIC: &[u8] = b"%PDF";

/// One extracted text unit with its 1-based page number.
#[derive(Debug, Clone)]
pub struct PageText {
    pub page: i64,
    pub text: String,
}

/// Realign `bytes` to the PDF header. Returns the slice starting at the
/// first `%PDF` occurrence, or `None` when the signature is absent.
pub fn repair_signature(bytes: &[u8]) -> Option<&[u8]> {
    if bytes.starts_with(PDF_MAGIC) {
        return Some(bytes);
    }
    bytes
        .windows(PDF_MAGIC.len())
        .position(|w| w == PDF_MAGIC)
        .map(|start| &bytes[start..])
}

/// Extract the text of every page, in order.
pub fn extract_pages(bytes: &[u8]) -> Result<Vec<PageText>, EngineError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| EngineError::Ingestion(format!("PDF extraction failed: {e}")))?;

    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| PageText {
            page: i as i64 + 1,
            text,
        })
        .collect())
}
