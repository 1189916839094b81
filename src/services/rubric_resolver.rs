use std::sync::Arc;

use thiserror::Error;

use crate::schemas::rubric::{normalize_event_code, Rubric};
use crate::services::rubric_store::{RubricStore, RubricStoreError};

#[derive(Debug, Clone)]
pub struct ResolvedRubric {
    pub rubric: Arc<Rubric>,
    pub outline: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no rubric registered for event {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] RubricStoreError),
}

#[derive(Clone)]
pub struct RubricResolver {
    store: Arc<dyn RubricStore>,
}

impl RubricResolver {
    pub fn new(store: Arc<dyn RubricStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, event_code: &str) -> Result<ResolvedRubric, ResolveError> {
        let code = normalize_event_code(event_code);
        let rubric =
            self.store.get(&code).await?.ok_or_else(|| ResolveError::NotFound(code.clone()))?;
        let outline = rubric.required_outline.clone();
        Ok(ResolvedRubric { rubric, outline })
    }
}
