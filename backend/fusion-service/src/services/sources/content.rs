use super::{rank_and_truncate, score_blocking, CandidateSource, SourceError};
use crate::backends::{Catalog, CatalogItem, Subject};
use crate::models::{Candidate, SourceName};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const INTEREST_WEIGHT: f32 = 0.5;
const PRICE_WEIGHT: f32 = 0.3;
const POPULARITY_WEIGHT: f32 = 0.2;
const STRONG_INTEREST: u8 = 5;

/// Scores every catalog item against the pair's interests, budget and item popularity.
pub struct ContentSimilaritySource {
    catalog: Option<Arc<Catalog>>,
}

impl ContentSimilaritySource {
    pub fn new(catalog: Option<Arc<Catalog>>) -> Self {
        Self { catalog }
    }

    fn score_item(interests: &[String], budget_level: u8, item: &CatalogItem) -> Candidate {
        let overlap = interest_overlap(interests, &item.tags);
        let price_match = budget_price_match(budget_level, item.price);
        let popularity = item.popularity.clamp(0.0, 1.0);
        let score = INTEREST_WEIGHT * overlap + PRICE_WEIGHT * price_match + POPULARITY_WEIGHT * popularity;

        let mut candidate = Candidate::new(&item.id, &item.title, &item.category, item.price)
            .with_source_score(SourceName::Content, score);
        if overlap > 0.3 {
            candidate.push_reason("Matches shared interests");
        }
        if price_match > 0.7 {
            candidate.push_reason("Fits the budget");
        }
        candidate
    }

    fn score_subject(catalog: &Catalog, subject: &Subject, limit: usize) -> Vec<Candidate> {
        let interests = subject.strong_interests(STRONG_INTEREST);
        let budget_level = subject.budget_level();
        let scored = catalog
            .items()
            .iter()
            .map(|item| Self::score_item(&interests, budget_level, item))
            .collect();
        rank_and_truncate(scored, SourceName::Content, limit)
    }
}

#[async_trait]
impl CandidateSource for ContentSimilaritySource {
    fn name(&self) -> SourceName {
        SourceName::Content
    }

    async fn warm_up(&self) -> Result<(), String> {
        match &self.catalog {
            Some(catalog) if !catalog.is_empty() => Ok(()),
            Some(_) => Err("catalog has no items".to_string()),
            None => Err("catalog not loaded".to_string()),
        }
    }

    async fn fetch(&self, subject_id: &str, limit: usize) -> Result<Vec<Candidate>, SourceError> {
        let catalog = self
            .catalog
            .clone()
            .ok_or(SourceError::Unavailable(SourceName::Content))?;
        let subject_id = subject_id.to_string();

        score_blocking(SourceName::Content, move || {
            let subject = catalog
                .subject(&subject_id)
                .ok_or_else(|| SourceError::SubjectUnknown {
                    name: SourceName::Content,
                    subject_id: subject_id.clone(),
                })?;

            let candidates = Self::score_subject(&catalog, subject, limit);
            debug!(subject_id = %subject_id, count = candidates.len(), "content candidates scored");
            Ok(candidates)
        })
        .await
    }
}

/// Share of the item's tags covered by the pair's strong interests, in [0, 1].
pub fn interest_overlap(interests: &[String], tags: &[String]) -> f32 {
    if tags.is_empty() {
        return 0.0;
    }
    let hits = tags
        .iter()
        .filter(|tag| interests.iter().any(|i| i == &tag.to_lowercase()))
        .count();
    (hits as f32 / tags.len() as f32).min(1.0)
}

/// How well a price fits the budget level (1 low, 2 medium, 3 high).
pub fn budget_price_match(budget_level: u8, price: f64) -> f32 {
    let (min, max) = match budget_level {
        1 => (0.0, 1000.0),
        3 => (2000.0, 20000.0),
        _ => (500.0, 5000.0),
    };

    if (min..=max).contains(&price) {
        1.0
    } else if price < min {
        0.7
    } else {
        (1.0 - (price - max) / max).max(0.0) as f32
    }
}
