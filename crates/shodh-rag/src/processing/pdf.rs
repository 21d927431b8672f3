//! PDF text extraction (C3). Walks pages via `lopdf`'s content-stream parser
//! (grounded on `LoPdfParser::extract_document`/`extract_page_text`) and, if
//! that yields no text across the whole document, falls back to
//! `pdf_extract`'s whole-document extraction the way `parser.rs::parse_pdf`
//! does — rewrapped as a single page since that path has no page
//! boundaries to offer.

use crate::error::RagError;
use crate::processing::lopdf_parser::LoPdfParser;
use crate::types::PageText;
use std::path::Path;

/// Extract per-page text from a PDF. Never raises on content-related
/// issues — PDFs with no extractable text (scanned/image-only) yield an
/// empty vector. Only unreadable or missing files are an `ExtractionError`.
pub fn extract_pages(path: &Path) -> Result<Vec<PageText>, RagError> {
    if !path.exists() {
        return Err(RagError::Extraction {
            path: path.to_path_buf(),
            source: anyhow::anyhow!("file does not exist"),
        });
    }

    let parsed = LoPdfParser::parse(path).map_err(|e| RagError::Extraction {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut pages: Vec<PageText> = parsed
        .pages
        .iter()
        .map(|p| PageText {
            page_number: p.page_number,
            text: p.text.trim().to_string(),
        })
        .collect();

    let has_text = pages.iter().any(|p| !p.text.is_empty());
    if !has_text {
        if let Some(fallback) = fallback_whole_document(path) {
            if !fallback.trim().is_empty() {
                pages = vec![PageText {
                    page_number: 1,
                    text: fallback.trim().to_string(),
                }];
            }
        }
    }

    // Pages with no extractable text are kept with empty strings rather
    // than dropped, so page numbers stay meaningful to callers.
    Ok(pages)
}

fn fallback_whole_document(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    pdf_extract::extract_text_from_mem(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn missing_file_is_extraction_error() {
        let result = extract_pages(&PathBuf::from("/nonexistent/does-not-exist.pdf"));
        assert!(matches!(result, Err(RagError::Extraction { .. })));
    }
}
