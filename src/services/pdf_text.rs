use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::services::storage::{FileStore, StorageError};

const UNREADABLE_MESSAGE: &str = "Unable to extract text from PDF. Ensure it's a typed document.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub text: String,
    pub page_count: usize,
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("{0}")]
    Unreadable(String),
    #[error("PDF has {pages} pages, exceeding the {max} page limit")]
    PageLimitExceeded { pages: usize, max: usize },
    #[error("text extraction timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, file_ref: &str) -> Result<ExtractedDocument, ExtractionError>;
}

/// Text layer extraction for digital PDFs via `pdf-extract`.
#[derive(Clone)]
pub struct PdfTextExtractor {
    files: Arc<dyn FileStore>,
    max_pages: usize,
}

impl PdfTextExtractor {
    pub fn new(files: Arc<dyn FileStore>, max_pages: usize) -> Self {
        Self { files, max_pages }
    }
}

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract(&self, file_ref: &str) -> Result<ExtractedDocument, ExtractionError> {
        let bytes = self.files.read(file_ref).await?;
        let max_pages = self.max_pages;

        // pdf-extract can panic on hostile input; a panicked task reads as unreadable.
        tokio::task::spawn_blocking(move || extract_from_bytes(&bytes, max_pages))
            .await
            .map_err(|err| ExtractionError::Unreadable(format!("{UNREADABLE_MESSAGE} ({err})")))?
    }
}

pub(crate) fn extract_from_bytes(
    bytes: &[u8],
    max_pages: usize,
) -> Result<ExtractedDocument, ExtractionError> {
    let document = lopdf::Document::load_mem(bytes).map_err(|err| {
        tracing::debug!(error = %err, "PDF failed to parse");
        ExtractionError::Unreadable(UNREADABLE_MESSAGE.to_string())
    })?;
    let page_count = document.get_pages().len();
    if page_count > max_pages {
        return Err(ExtractionError::PageLimitExceeded { pages: page_count, max: max_pages });
    }

    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|err| {
        tracing::debug!(error = %err, "PDF text layer extraction failed");
        ExtractionError::Unreadable(UNREADABLE_MESSAGE.to_string())
    })?;

    let text = pages.join("\n");
    if text.trim().is_empty() {
        return Err(ExtractionError::Unreadable(UNREADABLE_MESSAGE.to_string()));
    }

    Ok(ExtractedDocument { text, page_count })
}


#[cfg(test)]
mod tests {
    use super::test_pdfs::text_pdf;
    use super::*;
    use crate::services::storage::LocalFileStore;

    #[test]
    fn extracts_text_and_page_count() {
        let pdf = text_pdf(&["Executive Summary", "Research Methods"]);
        let doc = extract_from_bytes(&pdf, 25).expect("extract");
        assert_eq!(doc.page_count, 2);
        assert!(doc.text.contains("Executive"));
        assert!(doc.text.contains("Research"));
    }

    #[test]
    fn page_limit_is_enforced() {
        let pdf = text_pdf(&["one", "two", "three"]);
        match extract_from_bytes(&pdf, 2) {
            Err(ExtractionError::PageLimitExceeded { pages, max }) => {
                assert_eq!((pages, max), (3, 2));
            }
            other => panic!("expected page limit error, got {other:?}"),
        }
    }

    #[test]
    fn garbage_is_unreadable() {
        assert!(matches!(
            extract_from_bytes(b"not a pdf", 25),
            Err(ExtractionError::Unreadable(_))
        ));
    }

    #[tokio::test]
    async fn extractor_reads_through_file_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("entry.pdf"), text_pdf(&["Findings"])).expect("write");
        let extractor = PdfTextExtractor::new(Arc::new(LocalFileStore::new(dir.path())), 25);

        let doc = extractor.extract("entry.pdf").await.expect("extract");
        assert_eq!(doc.page_count, 1);

        let missing = extractor.extract("missing.pdf").await;
        assert!(matches!(missing, Err(ExtractionError::Storage(StorageError::NotFound(_)))));
    }
}
