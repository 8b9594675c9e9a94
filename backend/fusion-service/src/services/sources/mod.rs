mod content;
mod embedding;
mod latent;

use crate::models::{Candidate, SourceName};
use async_trait::async_trait;
use std::cmp::Ordering;
use thiserror::Error;

pub use content::{budget_price_match, interest_overlap, ContentSimilaritySource};
pub use embedding::EmbeddingSource;
pub use latent::LatentFactorSource;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SourceError {
    #[error("source {0} is unavailable")]
    Unavailable(SourceName),

    /// The backing index has never seen this subject. Not a component failure.
    #[error("source {name} does not know subject {subject_id}")]
    SubjectUnknown {
        name: SourceName,
        subject_id: String,
    },

    #[error("source {name} failed: {message}")]
    Backend { name: SourceName, message: String },

    #[error("source {name} timed out after {elapsed_ms} ms")]
    Timeout { name: SourceName, elapsed_ms: u64 },
}

impl SourceError {
    /// Whether this error should mark the source Failed in the health registry.
    pub fn is_component_failure(&self) -> bool {
        !matches!(self, SourceError::SubjectUnknown { .. })
    }
}

/// One scoring subsystem exposed in the uniform candidate shape.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    fn name(&self) -> SourceName;

    /// Startup probe. Errors here leave the source Failed.
    async fn warm_up(&self) -> Result<(), String>;

    /// Up to `limit` scored candidates for the subject, best first.
    async fn fetch(&self, subject_id: &str, limit: usize) -> Result<Vec<Candidate>, SourceError>;
}

/// Run a source's synchronous scoring on the blocking pool. The returned
/// future yields while scoring runs, so callers can time it out.
pub(crate) async fn score_blocking<F>(source: SourceName, scoring: F) -> Result<Vec<Candidate>, SourceError>
where
    F: FnOnce() -> Result<Vec<Candidate>, SourceError> + Send + 'static,
{
    tokio::task::spawn_blocking(scoring)
        .await
        .map_err(|e| SourceError::Backend {
            name: source,
            message: format!("scoring task failed: {}", e),
        })?
}

/// Best-first ordering used by every source before truncation.
pub(crate) fn rank_and_truncate(mut candidates: Vec<Candidate>, source: SourceName, limit: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.source_score(source)
            .partial_cmp(&a.source_score(source))
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    candidates.truncate(limit);
    candidates
}
