use std::path::Path;

use thiserror::Error;

use crate::core::config::Settings;

pub const PDF_MIME: &str = "application/pdf";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("Only PDF files are accepted")]
    NotPdf,
    #[error("MIME type '{0}' is not accepted, expected application/pdf")]
    WrongContentType(String),
    #[error("File exceeds {limit_mb}MB limit")]
    TooLarge { size: u64, limit_mb: u64 },
    #[error("File is empty")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPolicy {
    pub max_file_size_mb: u64,
}

impl UploadPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self { max_file_size_mb: settings.uploads().max_file_size_mb }
    }

    /// Checks what the upload layer knows before the file reaches storage.
    /// An empty content type is tolerated; browsers sometimes omit it.
    pub fn validate_upload(
        &self,
        filename: &str,
        content_type: &str,
        size: u64,
    ) -> Result<(), UploadError> {
        let is_pdf = Path::new(filename.trim())
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if !is_pdf {
            return Err(UploadError::NotPdf);
        }

        let mime = content_type.trim().to_ascii_lowercase();
        if !mime.is_empty() && mime != PDF_MIME {
            return Err(UploadError::WrongContentType(mime));
        }

        if size == 0 {
            return Err(UploadError::Empty);
        }
        if size > self.max_file_size_mb.saturating_mul(1024 * 1024) {
            return Err(UploadError::TooLarge { size, limit_mb: self.max_file_size_mb });
        }

        Ok(())
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self { max_file_size_mb: 15 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_pdf_within_limit() {
        let policy = UploadPolicy::default();
        assert_eq!(policy.validate_upload("Report.PDF", "application/pdf", 1024), Ok(()));
        assert_eq!(policy.validate_upload("report.pdf", "", 1024), Ok(()));
    }

    #[test]
    fn rejects_other_types() {
        let policy = UploadPolicy::default();
        assert_eq!(policy.validate_upload("report.docx", PDF_MIME, 10), Err(UploadError::NotPdf));
        assert_eq!(policy.validate_upload("pdf", PDF_MIME, 10), Err(UploadError::NotPdf));
        assert_eq!(
            policy.validate_upload("report.pdf", "image/png", 10),
            Err(UploadError::WrongContentType("image/png".to_string()))
        );
    }

    #[test]
    fn enforces_size_limit() {
        let policy = UploadPolicy { max_file_size_mb: 1 };
        assert_eq!(policy.validate_upload("a.pdf", PDF_MIME, 1024 * 1024), Ok(()));
        assert_eq!(
            policy.validate_upload("a.pdf", PDF_MIME, 1024 * 1024 + 1),
            Err(UploadError::TooLarge { size: 1024 * 1024 + 1, limit_mb: 1 })
        );
        assert_eq!(policy.validate_upload("a.pdf", PDF_MIME, 0), Err(UploadError::Empty));
    }
}
