use super::{score_blocking, CandidateSource, SourceError};
use crate::backends::{distance_to_similarity, AnnIndex, Catalog};
use crate::models::{Candidate, SourceName};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Nearest neighbours of the subject's embedding in the item index.
pub struct EmbeddingSource {
    catalog: Option<Arc<Catalog>>,
    index: Option<Arc<dyn AnnIndex>>,
}

impl EmbeddingSource {
    pub fn new(catalog: Option<Arc<Catalog>>, index: Option<Arc<dyn AnnIndex>>) -> Self {
        Self { catalog, index }
    }

    fn nearest(
        catalog: &Catalog,
        index: &dyn AnnIndex,
        subject_id: &str,
        limit: usize,
    ) -> Result<Vec<Candidate>, SourceError> {
        let vector = index
            .subject_vector(subject_id)
            .ok_or_else(|| SourceError::SubjectUnknown {
                name: SourceName::Embedding,
                subject_id: subject_id.to_string(),
            })?;

        let hits = index
            .search(&vector, limit)
            .map_err(|e| SourceError::Backend {
                name: SourceName::Embedding,
                message: e.to_string(),
            })?;

        Ok(hits
            .into_iter()
            .filter_map(|(item_id, distance)| match catalog.item(&item_id) {
                Some(item) => Some(
                    Candidate::new(&item.id, &item.title, &item.category, item.price)
                        .with_source_score(SourceName::Embedding, distance_to_similarity(distance))
                        .with_reason("Semantically similar"),
                ),
                None => {
                    debug!(item_id = %item_id, "indexed item missing from catalog");
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl CandidateSource for EmbeddingSource {
    fn name(&self) -> SourceName {
        SourceName::Embedding
    }

    async fn warm_up(&self) -> Result<(), String> {
        if self.catalog.is_none() {
            return Err("catalog not loaded".to_string());
        }
        match &self.index {
            Some(index) if index.is_empty() => Err("embedding index is empty".to_string()),
            Some(_) => Ok(()),
            None => Err("embedding index not loaded".to_string()),
        }
    }

    async fn fetch(&self, subject_id: &str, limit: usize) -> Result<Vec<Candidate>, SourceError> {
        let (catalog, index) = match (&self.catalog, &self.index) {
            (Some(catalog), Some(index)) => (catalog.clone(), index.clone()),
            _ => return Err(SourceError::Unavailable(SourceName::Embedding)),
        };
        let subject_id = subject_id.to_string();

        score_blocking(SourceName::Embedding, move || {
            let candidates = Self::nearest(&catalog, index.as_ref(), &subject_id, limit)?;
            debug!(subject_id = %subject_id, count = candidates.len(), "embedding candidates found");
            Ok(candidates)
        })
        .await
    }
}
