//! Nearest-neighbor search over precomputed item embeddings.

use anyhow::{bail, Context};
use ndarray::{Array1, Array2, ArrayView1};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnnError {
    #[error("query has dimension {got}, index expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("index is empty")]
    Empty,
}

pub trait AnnIndex: Send + Sync {
    /// `k` nearest items as `(item_id, distance)`, closest first.
    fn search(&self, vector: &[f32], k: usize) -> Result<Vec<(String, f32)>, AnnError>;

    fn subject_vector(&self, subject_id: &str) -> Option<Vec<f32>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Distance to similarity in (0, 1].
pub fn distance_to_similarity(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

#[derive(Debug, Deserialize)]
struct EmbeddingsFile {
    items: BTreeMap<String, Vec<f32>>,
    #[serde(default)]
    subjects: HashMap<String, Vec<f32>>,
}

/// Exact L2 search over a dense matrix.
#[derive(Debug)]
pub struct FlatIndex {
    item_ids: Vec<String>,
    vectors: Array2<f32>,
    subjects: HashMap<String, Vec<f32>>,
}

impl FlatIndex {
    pub fn new(
        items: Vec<(String, Vec<f32>)>,
        subjects: HashMap<String, Vec<f32>>,
    ) -> anyhow::Result<Self> {
        let dim = items.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut item_ids = Vec::with_capacity(items.len());
        let mut flat = Vec::with_capacity(items.len() * dim);

        for (id, vector) in items {
            if vector.len() != dim {
                bail!("embedding for {} has dimension {}, expected {}", id, vector.len(), dim);
            }
            item_ids.push(id);
            flat.extend(vector);
        }
        for (id, vector) in &subjects {
            if vector.len() != dim {
                bail!("subject vector for {} has dimension {}, expected {}", id, vector.len(), dim);
            }
        }

        let vectors = Array2::from_shape_vec((item_ids.len(), dim), flat)?;
        Ok(Self {
            item_ids,
            vectors,
            subjects,
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading embeddings {}", path.display()))?;
        let file: EmbeddingsFile = serde_json::from_str(&raw)
            .with_context(|| format!("parsing embeddings {}", path.display()))?;

        let index = Self::new(file.items.into_iter().collect(), file.subjects)?;
        info!(
            items = index.len(),
            dim = index.dim(),
            "Loaded embedding index from {}",
            path.display()
        );
        Ok(index)
    }

    pub fn dim(&self) -> usize {
        self.vectors.ncols()
    }

    fn l2(row: ArrayView1<f32>, query: &Array1<f32>) -> f32 {
        row.iter()
            .zip(query.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

impl AnnIndex for FlatIndex {
    fn search(&self, vector: &[f32], k: usize) -> Result<Vec<(String, f32)>, AnnError> {
        if self.item_ids.is_empty() {
            return Err(AnnError::Empty);
        }
        if vector.len() != self.dim() {
            return Err(AnnError::DimensionMismatch {
                expected: self.dim(),
                got: vector.len(),
            });
        }

        let query = Array1::from(vector.to_vec());
        let mut hits: Vec<(String, f32)> = self
            .vectors
            .outer_iter()
            .zip(&self.item_ids)
            .map(|(row, id)| (id.clone(), Self::l2(row, &query)))
            .collect();

        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        hits.truncate(k);
        Ok(hits)
    }

    fn subject_vector(&self, subject_id: &str) -> Option<Vec<f32>> {
        self.subjects.get(subject_id).cloned()
    }

    fn len(&self) -> usize {
        self.item_ids.len()
    }
}
