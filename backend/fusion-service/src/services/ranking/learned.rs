use super::{RankingError, RankingRequest, RankingStrategy, Result};
use crate::backends::RankingModel;
use crate::models::{Candidate, ComponentName};
use crate::services::features::{to_matrix, FeatureExtractor, FeatureVector};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// GBDT ranker over `features-v1` vectors.
pub struct LearnedRanker {
    model: Option<Arc<dyn RankingModel>>,
    extractor: Arc<FeatureExtractor>,
}

impl LearnedRanker {
    pub fn new(model: Option<Arc<dyn RankingModel>>, extractor: Arc<FeatureExtractor>) -> Self {
        Self { model, extractor }
    }

    /// Startup probe: the model must be loaded and expect exactly our schema.
    pub fn check(&self) -> std::result::Result<(), String> {
        let model = self.model.as_ref().ok_or("ranking model not loaded")?;
        self.check_schema(model.as_ref()).map_err(|e| e.to_string())
    }

    pub fn model_version(&self) -> Option<String> {
        self.model.as_ref().map(|m| m.version().to_string())
    }

    pub fn feature_importance(&self) -> Option<BTreeMap<String, f32>> {
        self.model.as_ref().map(|m| m.feature_importance())
    }

    /// Most important features by the model's own importance, highest first.
    pub fn top_factors(&self, features: &FeatureVector, n: usize) -> Vec<(String, f32)> {
        let Some(importance) = self.feature_importance() else {
            return Vec::new();
        };
        let mut factors: Vec<(String, f32)> = importance
            .into_iter()
            .filter(|(name, _)| features.get(name) != 0.0)
            .collect();
        factors.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        factors.truncate(n);
        factors
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    fn check_schema(&self, model: &dyn RankingModel) -> Result<()> {
        let schema = self.extractor.schema();
        if !schema.matches(model.feature_names()) {
            return Err(RankingError::SchemaMismatch {
                schema: schema.version().to_string(),
            });
        }
        Ok(())
    }
}

impl RankingStrategy for LearnedRanker {
    fn component(&self) -> ComponentName {
        ComponentName::LearnedRanker
    }

    fn rank(&self, request: RankingRequest) -> Result<Vec<Candidate>> {
        let model = self.model.as_ref().ok_or(RankingError::Unavailable)?;
        self.check_schema(model.as_ref())?;

        let mut kept: Vec<Candidate> = Vec::with_capacity(request.candidates.len());
        let mut vectors: Vec<FeatureVector> = Vec::with_capacity(request.candidates.len());
        for candidate in request.candidates {
            match self
                .extractor
                .extract(&request.subject_id, &candidate, &request.context)
            {
                Ok(features) => {
                    vectors.push(features);
                    kept.push(candidate);
                }
                Err(e) => debug!(candidate_id = %candidate.id, error = %e, "dropping candidate"),
            }
        }
        if kept.is_empty() {
            warn!(subject_id = %request.subject_id, "no candidate survived feature extraction");
            return Err(RankingError::NoRankableCandidates);
        }

        let matrix = to_matrix(&vectors, self.extractor.schema());
        let scores = model
            .predict(matrix)
            .map_err(|e| RankingError::Inference(e.to_string()))?;
        if scores.len() != kept.len() {
            return Err(RankingError::Inference(format!(
                "model returned {} scores for {} candidates",
                scores.len(),
                kept.len()
            )));
        }

        for (candidate, score) in kept.iter_mut().zip(scores.iter()) {
            candidate.combined_score = *score;
        }
        Ok(kept)
    }
}
