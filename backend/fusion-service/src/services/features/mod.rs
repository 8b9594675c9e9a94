//! Feature extraction for the learned ranker.
//!
//! Each (subject, candidate, context) triple maps to a named vector whose keys
//! are fixed by a versioned [`FeatureSchema`]. Extraction is pure: no clock,
//! no randomness, no hidden state. Values that cannot be derived default to
//! 0.0; only an unresolvable subject is an error.

use crate::backends::catalog::{Catalog, Member, Subject};
use crate::models::{Candidate, RecommendationContext, SourceName};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub const SCHEMA_VERSION_V1: &str = "features-v1";

const ARCHETYPES: [&str; 5] = ["artlovers", "gamers", "gourmets", "fitness", "travelers"];
const CATEGORIES: [&str; 4] = ["restaurant", "cafe", "entertainment", "gift"];
const AGE_SCALE: f32 = 50.0;
const PRICE_SCALE: f64 = 1000.0;

const FEATURES_V1: [&str; 32] = [
    "content_score",
    "latent_score",
    "embedding_score",
    "price_normalized",
    "price_log",
    "category_is_restaurant",
    "category_is_cafe",
    "category_is_entertainment",
    "category_is_gift",
    "item_popularity",
    "item_popularity_log",
    "subject_pair_age_diff",
    "subject_avg_age",
    "subject_same_archetype",
    "member1_archetype_artlovers",
    "member1_archetype_gamers",
    "member1_archetype_gourmets",
    "member1_archetype_fitness",
    "member1_archetype_travelers",
    "member2_archetype_artlovers",
    "member2_archetype_gamers",
    "member2_archetype_gourmets",
    "member2_archetype_fitness",
    "member2_archetype_travelers",
    "subject_budget_match",
    "subject_avg_activity",
    "day_of_week",
    "is_weekend",
    "content_latent_product",
    "content_embedding_product",
    "latent_embedding_product",
    "price_match_score",
];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FeatureExtractionError {
    #[error("subject {0} cannot be resolved")]
    SubjectUnresolved(String),
}

/// Ordered, versioned list of feature names.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    version: &'static str,
    names: Vec<String>,
}

impl FeatureSchema {
    pub fn v1() -> Self {
        Self {
            version: SCHEMA_VERSION_V1,
            names: FEATURES_V1.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn version(&self) -> &str {
        self.version
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// A model is compatible only if it expects exactly these columns in this order.
    pub fn matches(&self, model_features: &[String]) -> bool {
        self.names.as_slice() == model_features
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureVector {
    values: BTreeMap<String, f32>,
}

impl FeatureVector {
    pub fn get(&self, name: &str) -> f32 {
        self.values.get(name).copied().unwrap_or(0.0)
    }

    fn set(&mut self, name: &str, value: f32) {
        let value = if value.is_finite() { value } else { 0.0 };
        self.values.insert(name.to_string(), value);
    }

    /// Values in schema order; every declared key is present.
    pub fn to_row(&self, schema: &FeatureSchema) -> Vec<f32> {
        schema.names().iter().map(|name| self.get(name)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f32)> {
        self.values.iter()
    }
}

/// Stack vectors into the `batch × schema` matrix the ranking model consumes.
pub fn to_matrix(vectors: &[FeatureVector], schema: &FeatureSchema) -> Array2<f32> {
    let flat: Vec<f32> = vectors.iter().flat_map(|v| v.to_row(schema)).collect();
    Array2::from_shape_vec((vectors.len(), schema.len()), flat)
        .unwrap_or_else(|_| Array2::zeros((vectors.len(), schema.len())))
}

pub struct FeatureExtractor {
    catalog: Option<Arc<Catalog>>,
    schema: FeatureSchema,
}

impl FeatureExtractor {
    pub fn new(catalog: Option<Arc<Catalog>>) -> Self {
        Self {
            catalog,
            schema: FeatureSchema::v1(),
        }
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn extract(
        &self,
        subject_id: &str,
        candidate: &Candidate,
        context: &RecommendationContext,
    ) -> Result<FeatureVector, FeatureExtractionError> {
        let catalog = self
            .catalog
            .as_ref()
            .ok_or_else(|| FeatureExtractionError::SubjectUnresolved(subject_id.to_string()))?;
        let subject = catalog
            .subject(subject_id)
            .filter(|s| !s.members.is_empty())
            .ok_or_else(|| FeatureExtractionError::SubjectUnresolved(subject_id.to_string()))?;

        let mut features = FeatureVector::default();
        for name in self.schema.names() {
            features.set(name, 0.0);
        }

        let content = candidate.source_score(SourceName::Content);
        let latent = candidate.source_score(SourceName::Latent);
        let embedding = candidate.source_score(SourceName::Embedding);
        features.set("content_score", content);
        features.set("latent_score", latent);
        features.set("embedding_score", embedding);
        features.set("content_latent_product", content * latent);
        features.set("content_embedding_product", content * embedding);
        features.set("latent_embedding_product", latent * embedding);

        let price = candidate.price.max(0.0);
        features.set("price_normalized", (price / PRICE_SCALE) as f32);
        features.set("price_log", price.ln_1p() as f32);
        features.set("price_match_score", typical_spend_match(subject, price));

        let category = candidate.category.to_lowercase();
        for known in CATEGORIES {
            if category == known {
                features.set(&format!("category_is_{}", known), 1.0);
            }
        }

        let popularity = catalog
            .item(&candidate.id)
            .map(|item| item.popularity.max(0.0))
            .unwrap_or(0.0);
        features.set("item_popularity", popularity);
        features.set("item_popularity_log", popularity.ln_1p());

        Self::subject_features(subject, &mut features);

        if let Some(day) = context.day_of_week.filter(|d| *d < 7) {
            features.set("day_of_week", day as f32);
            features.set("is_weekend", if day >= 5 { 1.0 } else { 0.0 });
        }

        Ok(features)
    }

    fn subject_features(subject: &Subject, features: &mut FeatureVector) {
        let first = &subject.members[0];
        let second = subject.members.get(1).unwrap_or(first);

        features.set(
            "subject_pair_age_diff",
            (first.age as f32 - second.age as f32).abs() / AGE_SCALE,
        );
        features.set("subject_avg_age", (first.age + second.age) as f32 / 2.0 / AGE_SCALE);
        features.set(
            "subject_same_archetype",
            bool_feature(first.archetype.eq_ignore_ascii_case(&second.archetype)),
        );
        features.set("subject_budget_match", bool_feature(first.budget == second.budget));
        features.set("subject_avg_activity", (first.activity + second.activity) / 2.0);

        for (slot, member) in [("member1", first), ("member2", second)] {
            archetype_features(slot, member, features);
        }
    }
}

fn archetype_features(slot: &str, member: &Member, features: &mut FeatureVector) {
    let archetype = member.archetype.to_lowercase();
    for known in ARCHETYPES {
        if archetype == known {
            features.set(&format!("{}_archetype_{}", slot, known), 1.0);
        }
    }
}

/// Price relative to the members' average typical spend, in [0.1, 1].
fn typical_spend_match(subject: &Subject, price: f64) -> f32 {
    let spend = subject.members.iter().map(|m| m.budget.typical_spend()).sum::<f64>()
        / subject.members.len() as f64;
    if price <= spend {
        (price / spend) as f32
    } else {
        (spend / price).max(0.1) as f32
    }
}

fn bool_feature(flag: bool) -> f32 {
    if flag {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::catalog::{BudgetPreference, CatalogItem};

    fn member(age: u32, archetype: &str, budget: BudgetPreference, activity: f32) -> Member {
        Member {
            id: format!("u{}", age),
            age,
            archetype: archetype.to_string(),
            budget,
            interests: BTreeMap::new(),
            activity,
        }
    }

    fn extractor() -> FeatureExtractor {
        let catalog = Catalog::new(
            vec![CatalogItem {
                id: "item_1".into(),
                title: "Wine bar".into(),
                category: "Restaurant".into(),
                price: 2500.0,
                tags: vec!["wine".into()],
                popularity: 0.5,
            }],
            vec![Subject {
                id: "pair_1".into(),
                members: vec![
                    member(30, "Gourmets", BudgetPreference::Medium, 0.4),
                    member(40, "Travelers", BudgetPreference::Medium, 0.8),
                ],
            }],
        );
        FeatureExtractor::new(Some(Arc::new(catalog)))
    }

    fn candidate() -> Candidate {
        Candidate::new("item_1", "Wine bar", "Restaurant", 2500.0)
            .with_source_score(SourceName::Content, 0.5)
            .with_source_score(SourceName::Latent, 0.8)
    }

    #[test]
    fn test_every_schema_key_present() {
        let ex = extractor();
        let features = ex
            .extract("pair_1", &candidate(), &RecommendationContext::default())
            .unwrap();

        for name in ex.schema().names() {
            assert!(features.iter().any(|(k, _)| k == name), "missing {}", name);
        }
        assert_eq!(features.to_row(ex.schema()).len(), ex.schema().len());
    }

    #[test]
    fn test_values() {
        let ctx = RecommendationContext {
            day_of_week: Some(6),
            ..Default::default()
        };
        let f = extractor().extract("pair_1", &candidate(), &ctx).unwrap();

        assert_eq!(f.get("embedding_score"), 0.0);
        assert!((f.get("content_latent_product") - 0.4).abs() < 1e-6);
        assert_eq!(f.get("category_is_restaurant"), 1.0);
        assert!((f.get("subject_pair_age_diff") - 0.2).abs() < 1e-6);
        assert_eq!(f.get("member1_archetype_gourmets"), 1.0);
        assert_eq!(f.get("member2_archetype_travelers"), 1.0);
        assert_eq!(f.get("subject_same_archetype"), 0.0);
        assert_eq!(f.get("subject_budget_match"), 1.0);
        assert_eq!(f.get("price_match_score"), 1.0);
        assert_eq!(f.get("is_weekend"), 1.0);
        assert_eq!(f.get("item_popularity"), 0.5);
    }

    #[test]
    fn test_extraction_is_pure() {
        let ex = extractor();
        let ctx = RecommendationContext::default();
        let a = ex.extract("pair_1", &candidate(), &ctx).unwrap();
        let b = ex.extract("pair_1", &candidate(), &ctx).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_subject_is_error() {
        let err = extractor()
            .extract("pair_404", &candidate(), &RecommendationContext::default())
            .unwrap_err();
        assert_eq!(err, FeatureExtractionError::SubjectUnresolved("pair_404".into()));
    }

    #[test]
    fn test_schema_match_is_order_sensitive() {
        let schema = FeatureSchema::v1();
        let mut names = schema.names().to_vec();
        assert!(schema.matches(&names));
        names.swap(0, 1);
        assert!(!schema.matches(&names));
    }

    #[test]
    fn test_to_matrix_shape() {
        let ex = extractor();
        let v = ex
            .extract("pair_1", &candidate(), &RecommendationContext::default())
            .unwrap();
        let m = to_matrix(&[v.clone(), v], ex.schema());
        assert_eq!(m.shape(), &[2, ex.schema().len()]);
    }
}
