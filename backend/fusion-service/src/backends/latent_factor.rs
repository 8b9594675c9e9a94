//! Latent-factor scorer.
//!
//! Ratings are predicted as `global_mean + subject_bias + item_bias + <p_s, q_i>`
//! and clamped to the 0..10 rating scale. The factors themselves are trained
//! offline and only loaded here.

use anyhow::{bail, Context};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::info;

pub const RATING_MIN: f32 = 0.0;
pub const RATING_MAX: f32 = 10.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LatentFactorError {
    #[error("subject {0} has no latent factors")]
    UnknownSubject(String),

    #[error("item {0} has no latent factors")]
    UnknownItem(String),
}

#[cfg_attr(test, mockall::automock)]
pub trait LatentFactorModel: Send + Sync {
    fn knows_subject(&self, subject_id: &str) -> bool;

    /// Predicted rating on the 0..10 scale.
    fn predict(&self, subject_id: &str, item_id: &str) -> Result<f32, LatentFactorError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct FactorEntry {
    #[serde(default)]
    pub bias: f32,
    pub factors: Vec<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FactorTable {
    pub global_mean: f32,
    pub subjects: HashMap<String, FactorEntry>,
    pub items: HashMap<String, FactorEntry>,
}

impl FactorTable {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading latent factors {}", path.display()))?;
        let table: FactorTable = serde_json::from_str(&raw)
            .with_context(|| format!("parsing latent factors {}", path.display()))?;
        let dim = table.validate()?;

        info!(
            subjects = table.subjects.len(),
            items = table.items.len(),
            dim,
            "Loaded latent factors from {}",
            path.display()
        );
        Ok(table)
    }

    /// Every factor vector must share one dimension.
    pub fn validate(&self) -> anyhow::Result<usize> {
        let mut dim = None;
        for (kind, entries) in [("subject", &self.subjects), ("item", &self.items)] {
            for (id, entry) in entries {
                match dim {
                    None => dim = Some(entry.factors.len()),
                    Some(d) if d != entry.factors.len() => bail!(
                        "{} {} has {} factors, expected {}",
                        kind,
                        id,
                        entry.factors.len(),
                        d
                    ),
                    Some(_) => {}
                }
            }
        }
        Ok(dim.unwrap_or(0))
    }
}

impl LatentFactorModel for FactorTable {
    fn knows_subject(&self, subject_id: &str) -> bool {
        self.subjects.contains_key(subject_id)
    }

    fn predict(&self, subject_id: &str, item_id: &str) -> Result<f32, LatentFactorError> {
        let subject = self
            .subjects
            .get(subject_id)
            .ok_or_else(|| LatentFactorError::UnknownSubject(subject_id.to_string()))?;
        let item = self
            .items
            .get(item_id)
            .ok_or_else(|| LatentFactorError::UnknownItem(item_id.to_string()))?;

        let dot: f32 = subject
            .factors
            .iter()
            .zip(&item.factors)
            .map(|(p, q)| p * q)
            .sum();

        Ok((self.global_mean + subject.bias + item.bias + dot).clamp(RATING_MIN, RATING_MAX))
    }
}
