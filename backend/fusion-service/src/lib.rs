pub mod backends;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

pub use config::Config;
pub use error::{AppError, Result};
pub use state::{AppState, Backends, Components};

// Re-export the fusion core
pub use services::{
    CandidateSource, ComponentHealthRegistry, ExperimentBucketer, FusionPipeline, FusionWeights,
    LearnedRanker, RecommendationService, ResultCache, WeightedFusion,
};
