use crate::error::IngestError;
use lopdf::Document;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor: Send + Sync {
    /// Returns every page in document order, 1-indexed. Pages without text are
    /// returned with empty text; callers decide whether to skip them.
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document = Document::load(path).map_err(|error| IngestError::PdfParse {
            path: path.to_path_buf(),
            details: error.to_string(),
        })?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse {
                    path: path.to_path_buf(),
                    details: format!("page {page_no}: {error}"),
                })?;

            pages.push(PageText {
                number: page_no,
                text,
            });
        }

        debug!(path = %path.display(), pages = pages.len(), "extracted pdf text");
        Ok(pages)
    }
}

pub fn extract_page_texts(path: &Path) -> Result<Vec<PageText>, IngestError> {
    LopdfExtractor.extract_pages(path)
}
