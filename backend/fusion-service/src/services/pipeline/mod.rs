//! The fusion pipeline.
//!
//! Walks the tier table from highest to lowest quality, skipping tiers whose
//! components are not Ready. A tier attempt fetches the sources it needs
//! (memoized for the request), merges candidates by id, ranks them and
//! applies the context filters. Any source or ranker failure marks the
//! offending component failed and moves to the next tier. A call cut short
//! by the request deadline, rather than by its own timeout, blames nobody:
//! the request ends with what was already fetched. Attempts are bounded by
//! the table length and by the request deadline.

pub mod filters;
pub mod tiers;

use crate::config::PipelineConfig;
use crate::metrics;
use crate::models::{Candidate, ComponentName, RankedResult, RecommendationContext, SourceName};
use crate::services::health::ComponentHealthRegistry;
use crate::services::ranking::{
    FusionWeights, LearnedRanker, RankingError, RankingRequest, RankingStrategy, WeightedFusion,
};
use crate::services::sources::{CandidateSource, SourceError};
use crate::utils::with_timeout;
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use filters::{apply_context, merge_candidates, sort_and_truncate};
pub use tiers::{Tier, TIER_TABLE_VERSION};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    #[error("subject {0} is unknown to every source")]
    SubjectNotFound(String),
}

/// Per-request knobs on top of the static configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the configured request deadline (never extends it).
    pub deadline: Option<Duration>,
    pub weights: Option<FusionWeights>,
    pub disable_learned_ranker: bool,
}

/// How one ranking attempt ended.
enum RankOutcome {
    Ranked(Vec<Candidate>),
    /// Tier abandoned; the next one may still serve.
    Skipped,
    /// The request deadline ran out before the ranker answered.
    OutOfTime,
}

/// Request-local bookkeeping of which sources answered.
#[derive(Default)]
struct SourceMemo {
    fetched: BTreeMap<SourceName, Vec<Candidate>>,
    unknown_subject: BTreeSet<SourceName>,
    failed: BTreeSet<SourceName>,
}

impl SourceMemo {
    fn usable(&self, source: SourceName) -> bool {
        !self.unknown_subject.contains(&source) && !self.failed.contains(&source)
    }

    fn subject_unknown_everywhere(&self) -> bool {
        !self.unknown_subject.is_empty() && self.fetched.is_empty() && self.failed.is_empty()
    }
}

pub struct FusionPipeline {
    sources: Vec<Arc<dyn CandidateSource>>,
    learned: Arc<LearnedRanker>,
    weighted: Arc<WeightedFusion>,
    registry: Arc<ComponentHealthRegistry>,
    config: PipelineConfig,
}

impl FusionPipeline {
    pub fn new(
        mut sources: Vec<Arc<dyn CandidateSource>>,
        learned: Arc<LearnedRanker>,
        weighted: Arc<WeightedFusion>,
        registry: Arc<ComponentHealthRegistry>,
        config: PipelineConfig,
    ) -> Self {
        sources.sort_by_key(|s| s.name());
        sources.dedup_by_key(|s| s.name());
        Self {
            sources,
            learned,
            weighted,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ComponentHealthRegistry> {
        &self.registry
    }

    pub fn learned(&self) -> &Arc<LearnedRanker> {
        &self.learned
    }

    pub fn weighted(&self) -> &Arc<WeightedFusion> {
        &self.weighted
    }

    pub fn sources(&self) -> &[Arc<dyn CandidateSource>] {
        &self.sources
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn source(&self, name: SourceName) -> Option<&Arc<dyn CandidateSource>> {
        self.sources.iter().find(|s| s.name() == name)
    }

    fn usable_sources(&self, memo: &SourceMemo) -> Vec<SourceName> {
        self.sources
            .iter()
            .map(|s| s.name())
            .filter(|&name| memo.usable(name) && self.registry.is_ready(name.into()))
            .collect()
    }

    fn fail_component(&self, tier: Tier, component: ComponentName, reason: &str) {
        metrics::record_tier_failure(tier.method().as_str(), component.as_str());
        self.registry.mark_failed(component, reason);
    }

    pub async fn run(
        &self,
        subject_id: &str,
        top_k: usize,
        context: &RecommendationContext,
        options: &RunOptions,
    ) -> Result<RankedResult, PipelineError> {
        let started = Instant::now();
        let deadline = options
            .deadline
            .map(|d| d.min(self.config.request_deadline()))
            .unwrap_or_else(|| self.config.request_deadline());
        let limit = top_k.saturating_mul(self.config.candidate_multiplier).max(top_k);
        let mut memo = SourceMemo::default();

        for tier in Tier::ALL {
            if started.elapsed() >= deadline {
                return Ok(self.out_of_time(subject_id, tier, started, &memo, top_k, context));
            }
            if tier == Tier::LearnedRankerFull && options.disable_learned_ranker {
                continue;
            }
            if let Some(strategy) = tier.strategy() {
                if !self.registry.is_ready(strategy) {
                    continue;
                }
            }
            let Some(wanted) = tier.sources(&self.usable_sources(&memo)) else {
                continue;
            };

            let remaining = deadline.saturating_sub(started.elapsed());
            let deadline_hit = self
                .fetch_missing(tier, subject_id, limit, &wanted, remaining, &mut memo)
                .await;
            if deadline_hit {
                return Ok(self.out_of_time(subject_id, tier, started, &memo, top_k, context));
            }
            if let Some(missing) = wanted.iter().find(|s| !memo.fetched.contains_key(*s)) {
                debug!(subject_id, tier = %tier, source = %missing, "tier lost a source");
                continue;
            }

            let merged = merge_candidates(wanted.iter().map(|s| memo.fetched[s].clone()));
            let considered = merged.len();
            let remaining = deadline.saturating_sub(started.elapsed());
            let ranked = match self
                .rank(tier, subject_id, merged, context, &wanted, options, remaining)
                .await
            {
                RankOutcome::Ranked(ranked) => ranked,
                RankOutcome::Skipped => continue,
                RankOutcome::OutOfTime => {
                    return Ok(self.out_of_time(subject_id, tier, started, &memo, top_k, context));
                }
            };

            let result = self.finish(tier, ranked, &wanted, considered, top_k, context);
            info!(
                subject_id,
                tier = %tier,
                returned = result.recommendations.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "recommendations ranked"
            );
            return Ok(result);
        }

        if memo.subject_unknown_everywhere() {
            info!(subject_id, "subject unknown to every consulted source");
            return Err(PipelineError::SubjectNotFound(subject_id.to_string()));
        }

        warn!(subject_id, "every tier failed, returning empty result");
        Ok(RankedResult::unavailable())
    }

    /// Fetch the wanted sources not yet in `memo`, concurrently. Returns true
    /// when a call was cut short by the request deadline rather than by its
    /// own timeout; such a source is not blamed.
    async fn fetch_missing(
        &self,
        tier: Tier,
        subject_id: &str,
        limit: usize,
        wanted: &[SourceName],
        remaining: Duration,
        memo: &mut SourceMemo,
    ) -> bool {
        let source_timeout = self.config.source_timeout();
        let timeout = source_timeout.min(remaining);
        let deadline_bound = remaining < source_timeout;
        let calls = wanted
            .iter()
            .filter(|name| !memo.fetched.contains_key(*name))
            .filter_map(|&name| self.source(name).map(|source| (name, source.clone())))
            .map(|(name, source)| async move {
                (name, with_timeout(timeout, source.fetch(subject_id, limit)).await)
            });

        let mut deadline_hit = false;
        for (name, outcome) in join_all(calls).await {
            let outcome = match outcome {
                Ok(result) => result,
                Err(_) if deadline_bound => {
                    debug!(subject_id, source = %name, "request deadline reached while fetching");
                    deadline_hit = true;
                    continue;
                }
                Err(_) => Err(SourceError::Timeout {
                    name,
                    elapsed_ms: timeout.as_millis() as u64,
                }),
            };
            match outcome {
                Ok(candidates) => {
                    memo.fetched.insert(name, candidates);
                }
                Err(e) if !e.is_component_failure() => {
                    debug!(subject_id, source = %name, "source does not know subject");
                    metrics::record_tier_failure(tier.method().as_str(), name.as_str());
                    memo.unknown_subject.insert(name);
                }
                Err(e) => {
                    warn!(subject_id, source = %name, error = %e, "source failed");
                    self.fail_component(tier, name.into(), &e.to_string());
                    memo.failed.insert(name);
                }
            }
        }
        deadline_hit
    }

    #[allow(clippy::too_many_arguments)]
    async fn rank(
        &self,
        tier: Tier,
        subject_id: &str,
        candidates: Vec<Candidate>,
        context: &RecommendationContext,
        sources: &[SourceName],
        options: &RunOptions,
        remaining: Duration,
    ) -> RankOutcome {
        let strategy: Arc<dyn RankingStrategy> = match tier {
            Tier::LearnedRankerFull => self.learned.clone(),
            Tier::WeightedFusionFull | Tier::WeightedFusionPartial => self.weighted.clone(),
            Tier::SingleSource => return RankOutcome::Ranked(passthrough(candidates, sources)),
        };
        let component = strategy.component();
        let request = RankingRequest {
            subject_id: subject_id.to_string(),
            candidates,
            context: context.clone(),
            sources: sources.to_vec(),
            weights: options.weights,
        };

        let ranker_timeout = self.config.ranker_timeout();
        let timeout = ranker_timeout.min(remaining);
        let outcome = match with_timeout(
            timeout,
            tokio::task::spawn_blocking(move || strategy.rank(request)),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(RankingError::Inference(format!("ranker task failed: {}", join_err))),
            Err(_) if remaining < ranker_timeout => {
                debug!(subject_id, tier = %tier, "request deadline reached while ranking");
                return RankOutcome::OutOfTime;
            }
            Err(_) => Err(RankingError::Timeout {
                elapsed_ms: timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(ranked) => RankOutcome::Ranked(ranked),
            Err(e) if e.is_component_failure() => {
                warn!(subject_id, tier = %tier, error = %e, "ranker failed");
                self.fail_component(tier, component, &e.to_string());
                RankOutcome::Skipped
            }
            Err(e) => {
                warn!(subject_id, tier = %tier, error = %e, "tier skipped");
                metrics::record_tier_failure(tier.method().as_str(), component.as_str());
                RankOutcome::Skipped
            }
        }
    }

    fn finish(
        &self,
        tier: Tier,
        ranked: Vec<Candidate>,
        sources: &[SourceName],
        considered: usize,
        top_k: usize,
        context: &RecommendationContext,
    ) -> RankedResult {
        let filtered = apply_context(ranked, context, self.config.effective_boost());
        RankedResult {
            recommendations: sort_and_truncate(filtered, top_k),
            method_used: tier.method(),
            sources_used: sources.to_vec(),
            candidates_considered: considered,
        }
    }

    fn out_of_time(
        &self,
        subject_id: &str,
        tier: Tier,
        started: Instant,
        memo: &SourceMemo,
        top_k: usize,
        context: &RecommendationContext,
    ) -> RankedResult {
        warn!(
            subject_id,
            tier = %tier,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request deadline exceeded, abandoning remaining tiers"
        );
        self.partial_result(memo, top_k, context)
    }

    /// Deadline hit: serve the best source already fetched, without further calls.
    fn partial_result(&self, memo: &SourceMemo, top_k: usize, context: &RecommendationContext) -> RankedResult {
        match memo.fetched.iter().next() {
            Some((&source, candidates)) => {
                let considered = candidates.len();
                let ranked = passthrough(candidates.clone(), &[source]);
                self.finish(Tier::SingleSource, ranked, &[source], considered, top_k, context)
            }
            None => RankedResult::unavailable(),
        }
    }
}

/// Combined score is the single source's own score.
fn passthrough(candidates: Vec<Candidate>, sources: &[SourceName]) -> Vec<Candidate> {
    let Some(&source) = sources.first() else {
        return candidates;
    };
    candidates
        .into_iter()
        .map(|mut c| {
            c.combined_score = c.source_score(source);
            c
        })
        .collect()
}
