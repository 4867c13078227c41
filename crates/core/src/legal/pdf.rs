use std::path::Path;

use crate::error::GuardianError;

#[derive(Debug, Clone)]
pub struct PdfPage {
    /// 1-based page number.
    pub number: usize,
    pub text: String,
}

/// Extract per-page text from a PDF, preserving page numbers for chunk
/// metadata. A malformed document is an ingest error; a well-formed
/// document with no text (scanned images) yields pages with empty text.
pub fn extract_pages(path: &Path) -> Result<Vec<PdfPage>, GuardianError> {
    if !path.exists() {
        return Err(GuardianError::Ingest(format!(
            "document not found: {}",
            path.display()
        )));
    }

    let pages = pdf_extract::extract_text_by_pages(path)
        .map_err(|e| GuardianError::Ingest(format!("failed to parse {}: {e}", path.display())))?;

    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| PdfPage {
            number: i + 1,
            text,
        })
        .collect())
}

pub fn source_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document.pdf")
        .to_string()
}
