/// Ranking Module
///
/// Turns merged candidates into a final ordering score.
///
/// # Strategies
/// - **LearnedRanker**: feature vectors scored by the externally trained GBDT model
/// - **WeightedFusion**: linear combination of the raw per-source scores
///
/// Both sit behind [`RankingStrategy`] so the pipeline can walk its tier table
/// without knowing which one it holds.
pub mod learned;
pub mod weighted;

pub use learned::LearnedRanker;
pub use weighted::{FusionWeights, WeightedFusion};

use crate::models::{Candidate, ComponentName, RecommendationContext, SourceName};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RankingError {
    #[error("ranker is not loaded")]
    Unavailable,

    #[error("feature schema {schema} does not match the model inputs")]
    SchemaMismatch { schema: String },

    #[error("ranker inference failed: {0}")]
    Inference(String),

    #[error("ranker timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    /// Every candidate was dropped during feature extraction.
    #[error("no candidate could be featurized")]
    NoRankableCandidates,
}

impl RankingError {
    pub fn is_component_failure(&self) -> bool {
        !matches!(self, RankingError::NoRankableCandidates)
    }
}

pub type Result<T> = std::result::Result<T, RankingError>;

/// Everything a strategy needs to score one tier attempt.
#[derive(Debug, Clone)]
pub struct RankingRequest {
    pub subject_id: String,
    pub candidates: Vec<Candidate>,
    pub context: RecommendationContext,
    /// Sources whose scores participate in this tier.
    pub sources: Vec<SourceName>,
    /// Per-request weight override (experiment treatment).
    pub weights: Option<FusionWeights>,
}

pub trait RankingStrategy: Send + Sync {
    fn component(&self) -> ComponentName;

    /// Candidates with `combined_score` set. Candidates that cannot be scored
    /// may be dropped; order is not significant.
    fn rank(&self, request: RankingRequest) -> Result<Vec<Candidate>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_featurization_is_not_component_failure() {
        assert!(!RankingError::NoRankableCandidates.is_component_failure());
        assert!(RankingError::Inference("shape".into()).is_component_failure());
        assert!(RankingError::Timeout { elapsed_ms: 250 }.is_component_failure());
    }
}
