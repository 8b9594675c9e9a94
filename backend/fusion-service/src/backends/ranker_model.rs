/// Gradient-boosted ranking model inference
///
/// Loads an ONNX export of the ranker with tract-onnx, plus a metadata file
/// carrying the version, the ordered feature names the model was trained on
/// and its per-feature importance.
use anyhow::{bail, Context};
use ndarray::{Array1, Array2};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tract_onnx::prelude::*;
use tracing::info;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Inference error: {0}")]
    Inference(String),
}

pub trait RankingModel: Send + Sync {
    fn version(&self) -> &str;

    /// Ordered names of the model's input columns.
    fn feature_names(&self) -> &[String];

    fn input_dim(&self) -> usize {
        self.feature_names().len()
    }

    /// Scores for a `batch × input_dim` matrix.
    fn predict(&self, features: Array2<f32>) -> Result<Array1<f32>, ModelError>;

    fn feature_importance(&self) -> BTreeMap<String, f32>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct RankerMetadata {
    pub version: String,
    pub feature_names: Vec<String>,
    #[serde(default)]
    pub feature_importance: BTreeMap<String, f32>,
}

impl RankerMetadata {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading ranker metadata {}", path.display()))?;
        let metadata: RankerMetadata = serde_json::from_str(&raw)
            .with_context(|| format!("parsing ranker metadata {}", path.display()))?;
        if metadata.feature_names.is_empty() {
            bail!("ranker metadata {} declares no features", path.display());
        }
        Ok(metadata)
    }
}

pub struct OnnxRankingModel {
    plan: TractModel,
    metadata: RankerMetadata,
}

impl OnnxRankingModel {
    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(model_path: P, metadata_path: Q) -> anyhow::Result<Self> {
        let model_path = model_path.as_ref();
        let metadata = RankerMetadata::load(metadata_path)?;
        if !model_path.exists() {
            bail!("ranker model not found: {}", model_path.display());
        }

        let dim = metadata.feature_names.len();
        let plan = tract_onnx::onnx()
            .model_for_path(model_path)?
            .with_input_fact(0, f32::fact([1, dim]).into())?
            .into_optimized()?
            .into_runnable()?;

        info!(
            version = %metadata.version,
            input_dim = dim,
            "Loaded ONNX ranking model from {}",
            model_path.display()
        );
        Ok(Self { plan, metadata })
    }

    fn predict_row(&self, row: Vec<f32>) -> Result<f32, ModelError> {
        let dim = row.len();
        let input: Tensor = tract_ndarray::Array2::from_shape_vec((1, dim), row)
            .map_err(|e| ModelError::InvalidInput(e.to_string()))?
            .into();

        let output = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| ModelError::Inference(format!("ONNX inference failed: {}", e)))?;

        let scores = output[0]
            .to_array_view::<f32>()
            .map_err(|e| ModelError::Inference(format!("Output extraction failed: {}", e)))?;

        scores
            .iter()
            .next()
            .copied()
            .ok_or_else(|| ModelError::Inference("model returned no score".to_string()))
    }
}

impl RankingModel for OnnxRankingModel {
    fn version(&self) -> &str {
        &self.metadata.version
    }

    fn feature_names(&self) -> &[String] {
        &self.metadata.feature_names
    }

    fn predict(&self, features: Array2<f32>) -> Result<Array1<f32>, ModelError> {
        check_input(self.input_dim(), &features)?;
        let scores = features
            .outer_iter()
            .map(|row| self.predict_row(row.to_vec()))
            .collect::<Result<Vec<f32>, _>>()?;
        Ok(Array1::from(scores))
    }

    fn feature_importance(&self) -> BTreeMap<String, f32> {
        self.metadata.feature_importance.clone()
    }
}

/// Column count must match the model exactly; inputs are never padded.
pub fn check_input(expected: usize, features: &Array2<f32>) -> Result<(), ModelError> {
    let got = features.ncols();
    if got != expected {
        return Err(ModelError::InvalidInput(format!(
            "Expected {} features, got {}",
            expected, got
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_check_input_rejects_wrong_width() {
        let features = Array2::<f32>::zeros((3, 4));
        assert!(check_input(4, &features).is_ok());
        assert!(matches!(check_input(5, &features), Err(ModelError::InvalidInput(_))));
    }

    #[test]
    fn test_metadata_requires_features() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"version": "v1", "feature_names": []}}"#).unwrap();
        assert!(RankerMetadata::load(file.path()).is_err());
    }

    #[test]
    fn test_missing_model_file_fails() {
        let mut metadata = tempfile::NamedTempFile::new().unwrap();
        write!(metadata, r#"{{"version": "v1", "feature_names": ["content_score"]}}"#).unwrap();
        let result = OnnxRankingModel::load("/nonexistent/ranker.onnx", metadata.path());
        assert!(result.is_err());
    }
}
