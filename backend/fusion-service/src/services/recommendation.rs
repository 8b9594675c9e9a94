//! Request-level orchestration around the fusion pipeline: experiment
//! assignment, result caching, explanations and performance counters.

use crate::config::ConfigError;
use crate::metrics;
use crate::models::{ComponentName, MethodUsed, RankedResult, RecommendationContext};
use crate::services::cache::{CacheKey, ResultCache};
use crate::services::experiments::{ExperimentAssignment, ExperimentBucketer};
use crate::services::explain::{source_factors, Explainer, Explanation, Factor};
use crate::services::pipeline::{FusionPipeline, PipelineError, RunOptions};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

const EXPLANATION_FACTORS: usize = 3;
const NO_VARIANT: &str = "none";

#[derive(Debug, Error)]
pub enum RecommendError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone, Default)]
pub struct RecommendRequest {
    pub subject_id: String,
    pub top_k: usize,
    pub context: RecommendationContext,
    pub experiment_id: Option<String>,
    pub include_explanations: bool,
    pub max_latency: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct Recommendation {
    pub result: RankedResult,
    pub experiment: Option<ExperimentAssignment>,
    pub explanations: Option<Vec<Explanation>>,
    pub cache_hit: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PerformanceStats {
    pub total_requests: u64,
    pub cache_hits: u64,
    /// Times the serving method differed from the previous request's.
    pub model_switches: u64,
    pub avg_latency_ms: f64,
    pub last_method: Option<MethodUsed>,
}

impl PerformanceStats {
    fn record(&mut self, method: MethodUsed, cache_hit: bool, elapsed: Duration) {
        let latency_ms = elapsed.as_secs_f64() * 1000.0;
        self.total_requests += 1;
        if cache_hit {
            self.cache_hits += 1;
        }
        if self.last_method.map_or(false, |last| last != method) {
            self.model_switches += 1;
        }
        self.last_method = Some(method);
        self.avg_latency_ms += (latency_ms - self.avg_latency_ms) / self.total_requests as f64;
    }
}

pub struct RecommendationService {
    pipeline: Arc<FusionPipeline>,
    cache: Arc<ResultCache<RankedResult>>,
    bucketer: Arc<ExperimentBucketer>,
    explainer: Arc<dyn Explainer>,
    stats: Mutex<PerformanceStats>,
}

impl RecommendationService {
    pub fn new(
        pipeline: Arc<FusionPipeline>,
        cache: Arc<ResultCache<RankedResult>>,
        bucketer: Arc<ExperimentBucketer>,
        explainer: Arc<dyn Explainer>,
    ) -> Self {
        Self {
            pipeline,
            cache,
            bucketer,
            explainer,
            stats: Mutex::new(PerformanceStats::default()),
        }
    }

    pub fn pipeline(&self) -> &Arc<FusionPipeline> {
        &self.pipeline
    }

    pub fn cache(&self) -> &Arc<ResultCache<RankedResult>> {
        &self.cache
    }

    pub fn stats(&self) -> PerformanceStats {
        self.stats.lock().clone()
    }

    /// Key for a request under the current health epoch and fusion weights.
    /// Both are read before the pipeline runs, so a result computed while
    /// either changes is stored under a key no later request looks up.
    pub fn cache_key(&self, request: &RecommendRequest, assignment: Option<&ExperimentAssignment>) -> CacheKey {
        CacheKey {
            subject_id: request.subject_id.clone(),
            top_k: request.top_k,
            context_digest: request.context.digest(),
            variant: assignment
                .map(|a| format!("{}={}", a.experiment_id, a.variant))
                .unwrap_or_else(|| NO_VARIANT.to_string()),
            health_epoch: self.pipeline.registry().epoch(),
            weights_generation: self.pipeline.weighted().generation(),
        }
    }

    pub async fn recommend(&self, request: &RecommendRequest) -> Result<Recommendation, RecommendError> {
        let started = Instant::now();

        let assignment = request
            .experiment_id
            .as_deref()
            .map(|experiment_id| self.bucketer.resolve(&request.subject_id, experiment_id))
            .transpose()?;

        let key = self.cache_key(request, assignment.as_ref());

        let (result, cache_hit) = match self.cache.get(&key) {
            Some(cached) => {
                debug!(subject_id = %request.subject_id, key = %key, "serving cached result");
                (cached, true)
            }
            None => {
                let treatment = assignment
                    .as_ref()
                    .and_then(|a| a.treatment.clone())
                    .unwrap_or_default();
                let options = RunOptions {
                    deadline: request.max_latency,
                    weights: treatment.weights,
                    disable_learned_ranker: treatment.disable_learned_ranker,
                };
                let result = self
                    .pipeline
                    .run(&request.subject_id, request.top_k, &request.context, &options)
                    .await?;
                if result.method_used != MethodUsed::Unavailable {
                    self.cache.put(key, &result, self.cache.default_ttl());
                }
                (result, false)
            }
        };

        let explanations = if request.include_explanations {
            self.explain(&request.subject_id, &request.context, &result)
        } else {
            None
        };

        let elapsed = started.elapsed();
        metrics::record_request(result.method_used.as_str(), elapsed);
        self.stats.lock().record(result.method_used, cache_hit, elapsed);
        info!(
            subject_id = %request.subject_id,
            method_used = %result.method_used,
            cache_hit,
            returned = result.recommendations.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "recommendation served"
        );

        Ok(Recommendation {
            result,
            experiment: assignment,
            explanations,
            cache_hit,
            elapsed,
        })
    }

    /// Runs after ranking; never changes the result.
    fn explain(
        &self,
        subject_id: &str,
        context: &RecommendationContext,
        result: &RankedResult,
    ) -> Option<Vec<Explanation>> {
        if !self.pipeline.registry().is_ready(ComponentName::Explainer) {
            return None;
        }
        let learned = self.pipeline.learned();
        let use_model_factors = result.method_used == MethodUsed::LearnedRankerFull;

        let explanations = result
            .recommendations
            .iter()
            .map(|candidate| {
                let model_factors = if use_model_factors {
                    learned
                        .extractor()
                        .extract(subject_id, candidate, context)
                        .map(|features| learned.top_factors(&features, EXPLANATION_FACTORS))
                        .unwrap_or_default()
                } else {
                    Vec::new()
                };
                let factors = if model_factors.is_empty() {
                    source_factors(candidate, EXPLANATION_FACTORS)
                } else {
                    model_factors
                };
                Explanation {
                    item_id: candidate.id.clone(),
                    text: self.explainer.explain(candidate, &factors),
                    top_factors: factors
                        .into_iter()
                        .map(|(name, weight)| Factor { name, weight })
                        .collect(),
                }
            })
            .collect();
        Some(explanations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_track_switches_and_latency() {
        let mut stats = PerformanceStats::default();
        stats.record(MethodUsed::LearnedRankerFull, false, Duration::from_millis(10));
        stats.record(MethodUsed::LearnedRankerFull, true, Duration::from_millis(30));
        stats.record(MethodUsed::WeightedFusionFull, false, Duration::from_millis(20));

        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.model_switches, 1);
        assert!((stats.avg_latency_ms - 20.0).abs() < 1e-6);
        assert_eq!(stats.last_method, Some(MethodUsed::WeightedFusionFull));
    }
}
