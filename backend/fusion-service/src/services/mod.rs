// ============================================
// Fusion services
// ============================================
//
//   Request → Experiment bucketing → Result cache
//                                        ↓ (miss)
//             Candidate sources → Merge → Ranking strategy → Context filters
//                                        ↓
//                          Tier fallback driven by component health

pub mod cache;
pub mod experiments;
pub mod explain;
pub mod features;
pub mod health;
pub mod pipeline;
pub mod ranking;
pub mod recommendation;
pub mod sources;

pub use cache::{CacheKey, ResultCache};
pub use experiments::{Experiment, ExperimentAssignment, ExperimentBucketer, Treatment, Variant};
pub use explain::{Explainer, Explanation, TemplateExplainer};
pub use features::{FeatureExtractor, FeatureSchema};
pub use health::{ComponentHealthRegistry, ComponentStatus};
pub use pipeline::{FusionPipeline, PipelineError, RunOptions};
pub use ranking::{FusionWeights, LearnedRanker, RankingStrategy, WeightedFusion};
pub use recommendation::{PerformanceStats, Recommendation, RecommendationService, RecommendRequest};
pub use sources::{CandidateSource, ContentSimilaritySource, EmbeddingSource, LatentFactorSource};
