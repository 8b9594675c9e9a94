use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{key} has invalid value {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("fusion weights must sum to 1.0 (±0.01), got {sum:.4}")]
    WeightsSum { sum: f32 },

    #[error("fusion weight for {name} must be within [0, 1], got {value}")]
    WeightRange { name: String, value: f32 },

    #[error("unknown component: {0}")]
    UnknownComponent(String),

    #[error("unknown experiment: {0}")]
    UnknownExperiment(String),

    #[error("invalid experiment {id}: {reason}")]
    InvalidExperiment { id: String, reason: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub data: DataConfig,
    pub pipeline: PipelineConfig,
    pub cache: CacheConfig,
    pub weights: FusionWeightsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub host: String,
    pub port: u16,
    pub log_format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            env: "development".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8090,
            log_format: "plain".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    pub catalog_path: String,
    pub latent_factors_path: String,
    pub embeddings_path: String,
    pub ranker_model_path: String,
    pub ranker_metadata_path: String,
    pub experiments_path: Option<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            catalog_path: "data/catalog.json".to_string(),
            latent_factors_path: "data/latent_factors.json".to_string(),
            embeddings_path: "data/embeddings.json".to_string(),
            ranker_model_path: "models/ranker.onnx".to_string(),
            ranker_metadata_path: "models/ranker_metadata.json".to_string(),
            experiments_path: None,
        }
    }
}

/// Allowed range for the soft-boost bounds.
pub const SOFT_BOOST_FLOOR: f32 = 0.5;
pub const SOFT_BOOST_CEILING: f32 = 2.0;

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub source_timeout_ms: u64,
    pub ranker_timeout_ms: u64,
    pub request_deadline_ms: u64,
    pub candidate_multiplier: usize,
    pub soft_boost_factor: f32,
    pub soft_boost_min: f32,
    pub soft_boost_max: f32,
}

impl PipelineConfig {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    pub fn ranker_timeout(&self) -> Duration {
        Duration::from_millis(self.ranker_timeout_ms)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }

    /// Boost factor actually applied, clamped into the documented range.
    pub fn effective_boost(&self) -> f32 {
        self.soft_boost_factor.clamp(self.soft_boost_min, self.soft_boost_max)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_timeout_ms: 250,
            ranker_timeout_ms: 250,
            request_deadline_ms: 1500,
            candidate_multiplier: 2,
            soft_boost_factor: 1.2,
            soft_boost_min: 0.5,
            soft_boost_max: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub ttl_seconds: u64,
    pub capacity: usize,
    pub sweep_fraction: f32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 300,
            capacity: 1000,
            sweep_fraction: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FusionWeightsConfig {
    pub content: f32,
    pub latent: f32,
    pub embedding: f32,
}

impl Default for FusionWeightsConfig {
    fn default() -> Self {
        Self {
            content: 0.4,
            latent: 0.3,
            embedding: 0.3,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw,
    })
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = Config {
            app: AppConfig {
                env: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("PORT", "8090")?,
                log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "plain".to_string()),
            },
            data: DataConfig {
                catalog_path: env::var("CATALOG_PATH")
                    .unwrap_or_else(|_| "data/catalog.json".to_string()),
                latent_factors_path: env::var("LATENT_FACTORS_PATH")
                    .unwrap_or_else(|_| "data/latent_factors.json".to_string()),
                embeddings_path: env::var("EMBEDDINGS_PATH")
                    .unwrap_or_else(|_| "data/embeddings.json".to_string()),
                ranker_model_path: env::var("RANKER_MODEL_PATH")
                    .unwrap_or_else(|_| "models/ranker.onnx".to_string()),
                ranker_metadata_path: env::var("RANKER_METADATA_PATH")
                    .unwrap_or_else(|_| "models/ranker_metadata.json".to_string()),
                experiments_path: env::var("EXPERIMENTS_PATH").ok().filter(|p| !p.is_empty()),
            },
            pipeline: PipelineConfig {
                source_timeout_ms: env_or("SOURCE_TIMEOUT_MS", "250")?,
                ranker_timeout_ms: env_or("RANKER_TIMEOUT_MS", "250")?,
                request_deadline_ms: env_or("REQUEST_DEADLINE_MS", "1500")?,
                candidate_multiplier: env_or("CANDIDATE_MULTIPLIER", "2")?,
                soft_boost_factor: env_or("SOFT_BOOST_FACTOR", "1.2")?,
                soft_boost_min: env_or("SOFT_BOOST_MIN", "0.5")?,
                soft_boost_max: env_or("SOFT_BOOST_MAX", "2.0")?,
            },
            cache: CacheConfig {
                ttl_seconds: env_or("CACHE_TTL_SECONDS", "300")?,
                capacity: env_or("CACHE_CAPACITY", "1000")?,
                sweep_fraction: env_or("CACHE_SWEEP_FRACTION", "0.2")?,
            },
            weights: FusionWeightsConfig {
                content: env_or("FUSION_WEIGHT_CONTENT", "0.4")?,
                latent: env_or("FUSION_WEIGHT_LATENT", "0.3")?,
                embedding: env_or("FUSION_WEIGHT_EMBEDDING", "0.3")?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        if p.candidate_multiplier == 0 {
            return Err(invalid("CANDIDATE_MULTIPLIER", p.candidate_multiplier));
        }
        if p.request_deadline_ms == 0 {
            return Err(invalid("REQUEST_DEADLINE_MS", p.request_deadline_ms));
        }
        if !(SOFT_BOOST_FLOOR..=SOFT_BOOST_CEILING).contains(&p.soft_boost_min) {
            return Err(invalid("SOFT_BOOST_MIN", p.soft_boost_min));
        }
        if !(SOFT_BOOST_FLOOR..=SOFT_BOOST_CEILING).contains(&p.soft_boost_max)
            || p.soft_boost_max < p.soft_boost_min
        {
            return Err(invalid("SOFT_BOOST_MAX", p.soft_boost_max));
        }
        if self.cache.capacity == 0 {
            return Err(invalid("CACHE_CAPACITY", self.cache.capacity));
        }
        if !(self.cache.sweep_fraction > 0.0 && self.cache.sweep_fraction <= 1.0) {
            return Err(invalid("CACHE_SWEEP_FRACTION", self.cache.sweep_fraction));
        }
        crate::services::ranking::FusionWeights::try_from(self.weights)?;
        Ok(())
    }
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
