use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Candidate sources, in priority order (content first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceName {
    Content,
    Latent,
    Embedding,
}

impl SourceName {
    pub const ALL: [SourceName; 3] = [SourceName::Content, SourceName::Latent, SourceName::Embedding];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceName::Content => "content",
            SourceName::Latent => "latent",
            SourceName::Embedding => "embedding",
        }
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every component tracked by the health registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentName {
    Content,
    Latent,
    Embedding,
    LearnedRanker,
    WeightedFusion,
    Explainer,
}

impl ComponentName {
    pub const ALL: [ComponentName; 6] = [
        ComponentName::Content,
        ComponentName::Latent,
        ComponentName::Embedding,
        ComponentName::LearnedRanker,
        ComponentName::WeightedFusion,
        ComponentName::Explainer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentName::Content => "content",
            ComponentName::Latent => "latent",
            ComponentName::Embedding => "embedding",
            ComponentName::LearnedRanker => "learned_ranker",
            ComponentName::WeightedFusion => "weighted_fusion",
            ComponentName::Explainer => "explainer",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl From<SourceName> for ComponentName {
    fn from(source: SourceName) -> Self {
        match source {
            SourceName::Content => ComponentName::Content,
            SourceName::Latent => ComponentName::Latent,
            SourceName::Embedding => ComponentName::Embedding,
        }
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recommendable item with the partial scores every source reported for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub title: String,
    pub category: String,
    pub price: f64,
    pub source_scores: BTreeMap<SourceName, f32>,
    pub combined_score: f32,
    pub reasons: Vec<String>,
}

impl Candidate {
    pub fn new(id: impl Into<String>, title: impl Into<String>, category: impl Into<String>, price: f64) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            category: category.into(),
            price,
            source_scores: BTreeMap::new(),
            combined_score: 0.0,
            reasons: Vec::new(),
        }
    }

    pub fn with_source_score(mut self, source: SourceName, score: f32) -> Self {
        self.source_scores.insert(source, score);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.push_reason(reason);
        self
    }

    pub fn source_score(&self, source: SourceName) -> f32 {
        self.source_scores.get(&source).copied().unwrap_or(0.0)
    }

    pub fn push_reason(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if !self.reasons.contains(&reason) {
            self.reasons.push(reason);
        }
    }

    /// Merge another report about the same item. Per-source scores are
    /// last-writer-wins; item attributes keep the first report.
    pub fn absorb(&mut self, other: Candidate) {
        debug_assert_eq!(self.id, other.id);
        self.source_scores.extend(other.source_scores);
        for reason in other.reasons {
            self.push_reason(reason);
        }
    }
}

/// Per-request context. Typed fields drive filters and features; anything
/// else is kept so that it still contributes to the cache key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u8>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl RecommendationContext {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Stable digest of the whole context (keys are serialized in sorted order).
    pub fn digest(&self) -> String {
        if self.is_empty() {
            return "none".to_string();
        }
        let canonical = serde_json::to_value(self)
            .map(|value| value.to_string())
            .unwrap_or_default();
        let hash = Sha256::digest(canonical.as_bytes());
        hash.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Which degradation tier produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodUsed {
    LearnedRankerFull,
    WeightedFusionFull,
    WeightedFusionPartial,
    SingleSource,
    Unavailable,
}

impl MethodUsed {
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodUsed::LearnedRankerFull => "learned_ranker_full",
            MethodUsed::WeightedFusionFull => "weighted_fusion_full",
            MethodUsed::WeightedFusionPartial => "weighted_fusion_partial",
            MethodUsed::SingleSource => "single_source",
            MethodUsed::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for MethodUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one pipeline run; this is also what the result cache stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub recommendations: Vec<Candidate>,
    pub method_used: MethodUsed,
    /// Sources whose scores contributed to the result.
    pub sources_used: Vec<SourceName>,
    pub candidates_considered: usize,
}

impl RankedResult {
    pub fn unavailable() -> Self {
        Self {
            recommendations: Vec::new(),
            method_used: MethodUsed::Unavailable,
            sources_used: Vec::new(),
            candidates_considered: 0,
        }
    }
}
