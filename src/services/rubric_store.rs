use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

use crate::core::time::primitive_now_utc;
use crate::repositories;
use crate::schemas::rubric::{normalize_event_code, Rubric, RubricError};

#[derive(Debug, Error)]
pub enum RubricStoreError {
    #[error(transparent)]
    Invalid(#[from] RubricError),
    #[error("rubric store state is unavailable: {0}")]
    Poisoned(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Rubric records keyed by normalized event code. Writes replace a whole
/// record; readers never observe a partially written rubric.
#[async_trait]
pub trait RubricStore: Send + Sync {
    async fn get(&self, event_code: &str) -> Result<Option<Arc<Rubric>>, RubricStoreError>;

    async fn put(&self, rubric: Rubric) -> Result<(), RubricStoreError>;

    /// Inserts only when no record exists for the code. Returns whether it inserted.
    async fn put_if_absent(&self, rubric: Rubric) -> Result<bool, RubricStoreError>;

    async fn list_codes(&self) -> Result<Vec<String>, RubricStoreError>;
}

#[derive(Clone)]
pub struct PgRubricStore {
    pool: PgPool,
}

impl PgRubricStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RubricStore for PgRubricStore {
    async fn get(&self, event_code: &str) -> Result<Option<Arc<Rubric>>, RubricStoreError> {
        let code = normalize_event_code(event_code);
        let Some(row) = repositories::rubrics::find_by_code(&self.pool, &code).await? else {
            return Ok(None);
        };
        let rubric = row.rubric_data.0.normalized();
        rubric.validate()?;
        Ok(Some(Arc::new(rubric)))
    }

    async fn put(&self, rubric: Rubric) -> Result<(), RubricStoreError> {
        let rubric = rubric.normalized();
        rubric.validate()?;
        repositories::rubrics::upsert(&self.pool, &rubric, primitive_now_utc()).await?;
        Ok(())
    }

    async fn put_if_absent(&self, rubric: Rubric) -> Result<bool, RubricStoreError> {
        let rubric = rubric.normalized();
        rubric.validate()?;
        let inserted =
            repositories::rubrics::insert_if_absent(&self.pool, &rubric, primitive_now_utc())
                .await?;
        Ok(inserted)
    }

    async fn list_codes(&self) -> Result<Vec<String>, RubricStoreError> {
        Ok(repositories::rubrics::list_codes(&self.pool).await?)
    }
}

#[derive(Default)]
pub struct MemoryRubricStore {
    rubrics: RwLock<HashMap<String, Arc<Rubric>>>,
}

impl MemoryRubricStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned(err: impl std::fmt::Display) -> RubricStoreError {
        RubricStoreError::Poisoned(err.to_string())
    }
}

#[async_trait]
impl RubricStore for MemoryRubricStore {
    async fn get(&self, event_code: &str) -> Result<Option<Arc<Rubric>>, RubricStoreError> {
        let rubrics = self.rubrics.read().map_err(Self::poisoned)?;
        Ok(rubrics.get(&normalize_event_code(event_code)).cloned())
    }

    async fn put(&self, rubric: Rubric) -> Result<(), RubricStoreError> {
        let rubric = rubric.normalized();
        rubric.validate()?;
        let mut rubrics = self.rubrics.write().map_err(Self::poisoned)?;
        rubrics.insert(rubric.event_code.clone(), Arc::new(rubric));
        Ok(())
    }

    async fn put_if_absent(&self, rubric: Rubric) -> Result<bool, RubricStoreError> {
        let rubric = rubric.normalized();
        rubric.validate()?;
        let mut rubrics = self.rubrics.write().map_err(Self::poisoned)?;
        if rubrics.contains_key(&rubric.event_code) {
            return Ok(false);
        }
        rubrics.insert(rubric.event_code.clone(), Arc::new(rubric));
        Ok(true)
    }

    async fn list_codes(&self) -> Result<Vec<String>, RubricStoreError> {
        let rubrics = self.rubrics.read().map_err(Self::poisoned)?;
        let mut codes: Vec<String> = rubrics.keys().cloned().collect();
        codes.sort();
        Ok(codes)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub inserted: usize,
    pub skipped: usize,
    pub invalid: usize,
}

/// Loads every `*.json` rubric in `dir` whose event code is not stored yet.
/// Malformed files are logged and counted, never fatal.
pub async fn seed_rubrics_from_dir(
    store: &dyn RubricStore,
    dir: &Path,
) -> anyhow::Result<SeedReport> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read rubrics directory {}", dir.display()))?;

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut report = SeedReport::default();
    for path in paths {
        let raw = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read rubric file {}", path.display()))?;

        let rubric: Rubric = match serde_json::from_slice(&raw) {
            Ok(rubric) => rubric,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Skipping unparseable rubric file");
                report.invalid += 1;
                continue;
            }
        };

        match store.put_if_absent(rubric).await {
            Ok(true) => report.inserted += 1,
            Ok(false) => report.skipped += 1,
            Err(RubricStoreError::Invalid(err)) => {
                tracing::warn!(path = %path.display(), error = %err, "Skipping invalid rubric file");
                report.invalid += 1;
            }
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("Failed to store rubric from {}", path.display())));
            }
        }
    }

    tracing::info!(
        inserted = report.inserted,
        skipped = report.skipped,
        invalid = report.invalid,
        "Rubric seeding finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::rubric::fixtures::rubric;

    #[tokio::test]
    async fn lookups_are_normalized() {
        let store = MemoryRubricStore::new();
        store.put(rubric(" for ")).await.expect("put");

        let found = store.get("For").await.expect("get").expect("present");
        assert_eq!(found.event_code, "FOR");
        assert_eq!(store.list_codes().await.expect("codes"), vec!["FOR".to_string()]);
    }

    #[tokio::test]
    async fn put_rejects_invalid_rubric() {
        let store = MemoryRubricStore::new();
        let mut broken = rubric("FOR");
        broken.total_points = 1;

        assert!(matches!(store.put(broken).await, Err(RubricStoreError::Invalid(_))));
        assert!(store.get("FOR").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn put_swaps_whole_record() {
        let store = MemoryRubricStore::new();
        store.put(rubric("FOR")).await.expect("put");
        let before = store.get("FOR").await.expect("get").expect("present");

        let mut updated = rubric("FOR");
        updated.event_name = Some("Renamed".to_string());
        store.put(updated).await.expect("put");

        let after = store.get("FOR").await.expect("get").expect("present");
        assert_eq!(before.event_name.as_deref(), Some("Finance Operations Research"));
        assert_eq!(after.event_name.as_deref(), Some("Renamed"));
    }

    #[tokio::test]
    async fn seeding_skips_existing_and_invalid_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let for_json = serde_json::to_vec(&rubric("FOR")).expect("encode");
        std::fs::write(dir.path().join("for.json"), for_json).expect("write");
        let bor_json = serde_json::to_vec(&rubric("BOR")).expect("encode");
        std::fs::write(dir.path().join("bor.json"), bor_json).expect("write");
        std::fs::write(dir.path().join("broken.json"), b"{not json").expect("write");
        std::fs::write(dir.path().join("notes.txt"), b"ignored").expect("write");

        let store = MemoryRubricStore::new();
        let mut existing = rubric("BOR");
        existing.event_name = Some("Already stored".to_string());
        store.put(existing).await.expect("put");

        let report = seed_rubrics_from_dir(&store, dir.path()).await.expect("seed");
        assert_eq!(report, SeedReport { inserted: 1, skipped: 1, invalid: 1 });

        let kept = store.get("BOR").await.expect("get").expect("present");
        assert_eq!(kept.event_name.as_deref(), Some("Already stored"));
        assert!(store.get("FOR").await.expect("get").is_some());
    }
}
