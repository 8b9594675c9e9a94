use super::{rank_and_truncate, score_blocking, CandidateSource, SourceError};
use crate::backends::latent_factor::{LatentFactorError, RATING_MAX, RATING_MIN};
use crate::backends::{Catalog, LatentFactorModel};
use crate::models::{Candidate, SourceName};
use crate::utils::normalize_score;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Ranks the catalog by predicted rating from the latent-factor model.
pub struct LatentFactorSource {
    catalog: Option<Arc<Catalog>>,
    model: Option<Arc<dyn LatentFactorModel>>,
}

impl LatentFactorSource {
    pub fn new(catalog: Option<Arc<Catalog>>, model: Option<Arc<dyn LatentFactorModel>>) -> Self {
        Self { catalog, model }
    }

    fn score_subject(
        catalog: &Catalog,
        model: &dyn LatentFactorModel,
        subject_id: &str,
        limit: usize,
    ) -> Result<Vec<Candidate>, SourceError> {
        if !model.knows_subject(subject_id) {
            return Err(SourceError::SubjectUnknown {
                name: SourceName::Latent,
                subject_id: subject_id.to_string(),
            });
        }

        let mut scored = Vec::with_capacity(catalog.items().len());
        for item in catalog.items() {
            let rating = match model.predict(subject_id, &item.id) {
                Ok(rating) => rating,
                Err(LatentFactorError::UnknownItem(_)) => continue,
                Err(e) => {
                    return Err(SourceError::Backend {
                        name: SourceName::Latent,
                        message: e.to_string(),
                    })
                }
            };
            let score = normalize_score(rating, RATING_MIN, RATING_MAX);
            scored.push(
                Candidate::new(&item.id, &item.title, &item.category, item.price)
                    .with_source_score(SourceName::Latent, score)
                    .with_reason("Popular among similar pairs"),
            );
        }

        Ok(rank_and_truncate(scored, SourceName::Latent, limit))
    }
}

#[async_trait]
impl CandidateSource for LatentFactorSource {
    fn name(&self) -> SourceName {
        SourceName::Latent
    }

    async fn warm_up(&self) -> Result<(), String> {
        if self.catalog.is_none() {
            return Err("catalog not loaded".to_string());
        }
        if self.model.is_none() {
            return Err("latent factors not loaded".to_string());
        }
        Ok(())
    }

    async fn fetch(&self, subject_id: &str, limit: usize) -> Result<Vec<Candidate>, SourceError> {
        let (catalog, model) = match (&self.catalog, &self.model) {
            (Some(catalog), Some(model)) => (catalog.clone(), model.clone()),
            _ => return Err(SourceError::Unavailable(SourceName::Latent)),
        };
        let subject_id = subject_id.to_string();

        score_blocking(SourceName::Latent, move || {
            let candidates = Self::score_subject(&catalog, model.as_ref(), &subject_id, limit)?;
            debug!(subject_id = %subject_id, count = candidates.len(), "latent candidates scored");
            Ok(candidates)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::latent_factor::MockLatentFactorModel;
    use crate::backends::CatalogItem;

    fn catalog() -> Arc<Catalog> {
        let items = ["item_1", "item_2", "item_3"]
            .iter()
            .map(|id| CatalogItem {
                id: id.to_string(),
                title: id.to_string(),
                category: "cafe".to_string(),
                price: 500.0,
                tags: vec![],
                popularity: 0.1,
            })
            .collect();
        Arc::new(Catalog::new(items, vec![]))
    }

    #[tokio::test]
    async fn test_fetch_normalizes_and_ranks() {
        let mut model = MockLatentFactorModel::new();
        model.expect_knows_subject().times(1).return_const(true);
        model
            .expect_predict()
            .returning(|_, item| match item {
                "item_1" => Ok(4.0),
                "item_2" => Ok(9.0),
                other => Err(LatentFactorError::UnknownItem(other.to_string())),
            });

        let source = LatentFactorSource::new(Some(catalog()), Some(Arc::new(model)));
        let candidates = source.fetch("pair_1", 5).await.unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].id, "item_2");
        assert!((candidates[0].source_score(SourceName::Latent) - 0.9).abs() < 1e-6);
        assert_eq!(candidates[1].reasons, vec!["Popular among similar pairs".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_subject_short_circuits() {
        let mut model = MockLatentFactorModel::new();
        model.expect_knows_subject().return_const(false);
        model.expect_predict().never();

        let source = LatentFactorSource::new(Some(catalog()), Some(Arc::new(model)));
        let err = source.fetch("pair_9", 5).await.unwrap_err();
        assert!(!err.is_component_failure());
    }

    #[tokio::test]
    async fn test_backend_error_is_component_failure() {
        let mut model = MockLatentFactorModel::new();
        model.expect_knows_subject().return_const(true);
        model
            .expect_predict()
            .returning(|s, _| Err(LatentFactorError::UnknownSubject(s.to_string())));

        let source = LatentFactorSource::new(Some(catalog()), Some(Arc::new(model)));
        let err = source.fetch("pair_1", 5).await.unwrap_err();
        assert!(matches!(err, SourceError::Backend { .. }));
        assert!(err.is_component_failure());
    }
}
