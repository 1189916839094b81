use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::Client;
use thiserror::Error;

use crate::core::config::Settings;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file {0} not found")]
    NotFound(String),
    #[error("file reference {0:?} escapes the upload directory")]
    InvalidRef(String),
    #[error("storage I/O failed for {file_ref}: {message}")]
    Io { file_ref: String, message: String },
}

/// Where uploaded documents live between submit and cleanup.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn read(&self, file_ref: &str) -> Result<Vec<u8>, StorageError>;

    /// Removing a missing file succeeds.
    async fn delete(&self, file_ref: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, file_ref: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(file_ref);
        let clean = !file_ref.is_empty()
            && relative.components().all(|component| matches!(component, Component::Normal(_)));
        if !clean {
            return Err(StorageError::InvalidRef(file_ref.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn io_error(file_ref: &str, err: std::io::Error) -> StorageError {
        StorageError::Io { file_ref: file_ref.to_string(), message: err.to_string() }
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn read(&self, file_ref: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(file_ref)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == IoErrorKind::NotFound => {
                Err(StorageError::NotFound(file_ref.to_string()))
            }
            Err(err) => Err(Self::io_error(file_ref, err)),
        }
    }

    async fn delete(&self, file_ref: &str) -> Result<(), StorageError> {
        let path = self.resolve(file_ref)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == IoErrorKind::NotFound => Ok(()),
            Err(err) => Err(Self::io_error(file_ref, err)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3FileStore {
    client: Client,
    bucket: String,
}

impl S3FileStore {
    /// `None` when no S3 credentials are configured.
    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Option<Self>> {
        if !settings.s3().is_configured() {
            return Ok(None);
        }

        let creds = Credentials::new(
            settings.s3().access_key.clone(),
            settings.s3().secret_key.clone(),
            None,
            None,
            "rubric-grader-static",
        );

        let config = aws_config::defaults(BehaviorVersion::latest())
            .endpoint_url(settings.s3().endpoint.clone())
            .region(aws_config::Region::new(settings.s3().region.clone()))
            .credentials_provider(creds)
            .load()
            .await;

        let client = Client::new(&config);

        Ok(Some(Self { client, bucket: settings.s3().bucket.clone() }))
    }

    fn io_error(file_ref: &str, err: impl std::fmt::Display) -> StorageError {
        StorageError::Io { file_ref: file_ref.to_string(), message: err.to_string() }
    }
}

#[async_trait]
impl FileStore for S3FileStore {
    async fn read(&self, file_ref: &str) -> Result<Vec<u8>, StorageError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(file_ref)
            .send()
            .await
            .map_err(|err| {
                if err.as_service_error().is_some_and(|service| service.is_no_such_key()) {
                    StorageError::NotFound(file_ref.to_string())
                } else {
                    Self::io_error(file_ref, err)
                }
            })?;

        let bytes = object.body.collect().await.map_err(|err| Self::io_error(file_ref, err))?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn delete(&self, file_ref: &str) -> Result<(), StorageError> {
        // S3 DeleteObject already succeeds for missing keys.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(file_ref)
            .send()
            .await
            .map_err(|err| Self::io_error(file_ref, err))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_store_reads_and_deletes_idempotently() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("report.pdf"), b"%PDF-1.5").expect("write");
        let store = LocalFileStore::new(dir.path());

        assert_eq!(store.read("report.pdf").await.expect("read"), b"%PDF-1.5");
        store.delete("report.pdf").await.expect("delete");
        store.delete("report.pdf").await.expect("second delete");
        assert!(matches!(store.read("report.pdf").await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn local_store_rejects_traversal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = LocalFileStore::new(dir.path());

        for bad in ["../secret.pdf", "/etc/passwd", "a/../../b.pdf", ""] {
            assert!(
                matches!(store.read(bad).await, Err(StorageError::InvalidRef(_))),
                "{bad} should be rejected"
            );
        }
    }
}
