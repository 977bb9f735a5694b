use crate::error::{IngestError, Result};
use log::debug;
use std::panic;

/// Pulls the text layer out of a PDF.
pub fn extract_text(bytes: &[u8], filename: &str) -> Result<String> {
    // pdf-extract panics on some malformed inputs.
    match panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes)) {
        Ok(Ok(text)) => {
            debug!("'{}': extracted {} characters of PDF text", filename, text.len());
            Ok(text)
        }
        Ok(Err(e)) => Err(IngestError::parsing(filename, format!("cannot read PDF: {}", e))),
        Err(_) => Err(IngestError::parsing(filename, "PDF parser aborted on malformed input")),
    }
}

/// A text layer this thin means the pages are images.
pub fn is_scanned(text: &str, threshold: usize) -> bool {
    text.chars().filter(|c| !c.is_whitespace()).count() < threshold
}

pub fn truncate_chars(text: &str, budget: usize) -> &str {
    match text.char_indices().nth(budget) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
