use super::{RankingRequest, RankingStrategy, Result};
use crate::config::{ConfigError, FusionWeightsConfig};
use crate::models::{Candidate, ComponentName, SourceName};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};
use tracing::info;

const SUM_TOLERANCE: f32 = 0.01;

/// Per-source fusion weights. Always valid once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FusionWeightsConfig")]
pub struct FusionWeights {
    content: f32,
    latent: f32,
    embedding: f32,
}

impl FusionWeights {
    pub fn new(content: f32, latent: f32, embedding: f32) -> std::result::Result<Self, ConfigError> {
        for (source, value) in [
            (SourceName::Content, content),
            (SourceName::Latent, latent),
            (SourceName::Embedding, embedding),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::WeightRange {
                    name: source.to_string(),
                    value,
                });
            }
        }

        let sum = content + latent + embedding;
        if (sum - 1.0).abs() > SUM_TOLERANCE {
            return Err(ConfigError::WeightsSum { sum });
        }

        Ok(Self {
            content,
            latent,
            embedding,
        })
    }

    pub fn weight(&self, source: SourceName) -> f32 {
        match source {
            SourceName::Content => self.content,
            SourceName::Latent => self.latent,
            SourceName::Embedding => self.embedding,
        }
    }

    /// Weights restricted to `sources` and rescaled to sum to 1. Falls back to
    /// equal shares when every selected weight is zero.
    pub fn renormalized(&self, sources: &[SourceName]) -> Vec<(SourceName, f32)> {
        let total: f32 = sources.iter().map(|s| self.weight(*s)).sum();
        sources
            .iter()
            .map(|&s| {
                let w = if total > f32::EPSILON {
                    self.weight(s) / total
                } else {
                    1.0 / sources.len() as f32
                };
                (s, w)
            })
            .collect()
    }
}

impl Default for FusionWeights {
    fn default() -> Self {
        let d = FusionWeightsConfig::default();
        Self {
            content: d.content,
            latent: d.latent,
            embedding: d.embedding,
        }
    }
}

impl TryFrom<FusionWeightsConfig> for FusionWeights {
    type Error = ConfigError;

    fn try_from(cfg: FusionWeightsConfig) -> std::result::Result<Self, Self::Error> {
        FusionWeights::new(cfg.content, cfg.latent, cfg.embedding)
    }
}

impl From<FusionWeights> for FusionWeightsConfig {
    fn from(w: FusionWeights) -> Self {
        FusionWeightsConfig {
            content: w.content,
            latent: w.latent,
            embedding: w.embedding,
        }
    }
}

/// Linear combiner over raw per-source scores, with caller-adjustable weights.
pub struct WeightedFusion {
    weights: RwLock<FusionWeights>,
    /// Incremented on every weight swap.
    generation: AtomicU64,
}

impl WeightedFusion {
    pub fn new(weights: FusionWeights) -> Self {
        Self {
            weights: RwLock::new(weights),
            generation: AtomicU64::new(0),
        }
    }

    pub fn weights(&self) -> FusionWeights {
        *self.weights.read()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Swap in new weights; they were validated on construction.
    pub fn set_weights(&self, weights: FusionWeights) {
        let mut current = self.weights.write();
        *current = weights;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        drop(current);
        info!(
            generation,
            content = weights.content,
            latent = weights.latent,
            embedding = weights.embedding,
            "Fusion weights updated"
        );
    }

    pub fn score(weights: &[(SourceName, f32)], candidate: &Candidate) -> f32 {
        weights
            .iter()
            .map(|(source, w)| w * candidate.source_score(*source))
            .sum()
    }
}

impl RankingStrategy for WeightedFusion {
    fn component(&self) -> ComponentName {
        ComponentName::WeightedFusion
    }

    fn rank(&self, request: RankingRequest) -> Result<Vec<Candidate>> {
        let weights = request.weights.unwrap_or_else(|| self.weights());
        let effective = weights.renormalized(&request.sources);

        Ok(request
            .candidates
            .into_iter()
            .map(|mut candidate| {
                candidate.combined_score = Self::score(&effective, &candidate);
                candidate
            })
            .collect())
    }
}
