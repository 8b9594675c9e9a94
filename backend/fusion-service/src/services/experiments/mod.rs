// ============================================
// Experiment bucketing
// ============================================
//
// Deterministic A/B assignment of subjects to experiment variants.
//
// - Bucket = SHA-256(subject_id ":" experiment_id), first 8 bytes as a
//   big-endian u64, divided by 2^64 → uniform in [0, 1)
// - In experiment iff bucket < traffic_split
// - No process-local state: the same inputs give the same variant across
//   requests and restarts

use crate::config::ConfigError;
use crate::services::ranking::FusionWeights;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::info;

/// Overrides applied to in-experiment requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Treatment {
    #[serde(default)]
    pub weights: Option<FusionWeights>,
    #[serde(default)]
    pub disable_learned_ranker: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    /// Fraction of subjects in the treatment group, in [0, 1].
    pub traffic_split: f64,
    #[serde(default)]
    pub treatment: Treatment,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Control,
    Treatment,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Control => "control",
            Variant::Treatment => "treatment",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentAssignment {
    pub experiment_id: String,
    pub variant: Variant,
    #[serde(skip)]
    pub treatment: Option<Treatment>,
}

#[derive(Debug, Deserialize)]
struct ExperimentsFile {
    experiments: Vec<Experiment>,
}

#[derive(Debug, Default)]
pub struct ExperimentBucketer {
    experiments: HashMap<String, Experiment>,
}

impl ExperimentBucketer {
    pub fn new(experiments: Vec<Experiment>) -> Result<Self, ConfigError> {
        let mut by_id = HashMap::with_capacity(experiments.len());
        for experiment in experiments {
            if !(0.0..=1.0).contains(&experiment.traffic_split) {
                return Err(ConfigError::InvalidExperiment {
                    id: experiment.id,
                    reason: format!("traffic_split {} outside [0, 1]", experiment.traffic_split),
                });
            }
            if by_id.contains_key(&experiment.id) {
                return Err(ConfigError::InvalidExperiment {
                    id: experiment.id,
                    reason: "duplicate id".to_string(),
                });
            }
            by_id.insert(experiment.id.clone(), experiment);
        }
        Ok(Self { experiments: by_id })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading experiments {}", path.display()))?;
        let file: ExperimentsFile = serde_json::from_str(&raw)
            .with_context(|| format!("parsing experiments {}", path.display()))?;
        let bucketer = Self::new(file.experiments)?;
        info!(count = bucketer.experiments.len(), "Loaded experiments from {}", path.display());
        Ok(bucketer)
    }

    pub fn experiment(&self, id: &str) -> Option<&Experiment> {
        self.experiments.get(id)
    }

    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }

    /// Uniform position of the subject in [0, 1) for this experiment.
    pub fn bucket(subject_id: &str, experiment_id: &str) -> f64 {
        let mut hasher = Sha256::new();
        hasher.update(subject_id.as_bytes());
        hasher.update(b":");
        hasher.update(experiment_id.as_bytes());
        let digest = hasher.finalize();

        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(prefix) as f64 / 18_446_744_073_709_551_616.0
    }

    /// In-experiment or not.
    pub fn assign(subject_id: &str, experiment_id: &str, traffic_split: f64) -> bool {
        Self::bucket(subject_id, experiment_id) < traffic_split
    }

    /// Variant for a configured experiment; unknown ids are a configuration error.
    pub fn resolve(&self, subject_id: &str, experiment_id: &str) -> Result<ExperimentAssignment, ConfigError> {
        let experiment = self
            .experiments
            .get(experiment_id)
            .ok_or_else(|| ConfigError::UnknownExperiment(experiment_id.to_string()))?;

        let in_experiment = Self::assign(subject_id, experiment_id, experiment.traffic_split);
        Ok(ExperimentAssignment {
            experiment_id: experiment_id.to_string(),
            variant: if in_experiment { Variant::Treatment } else { Variant::Control },
            treatment: in_experiment.then(|| experiment.treatment.clone()),
        })
    }
}
