//! Item and subject catalog loaded from `catalog.json`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub title: String,
    pub category: String,
    pub price: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Normalized popularity in [0, 1].
    #[serde(default)]
    pub popularity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPreference {
    Low,
    Medium,
    High,
}

impl BudgetPreference {
    pub fn level(&self) -> u8 {
        match self {
            BudgetPreference::Low => 1,
            BudgetPreference::Medium => 2,
            BudgetPreference::High => 3,
        }
    }

    /// Typical spend used by the price-match feature.
    pub fn typical_spend(&self) -> f64 {
        match self {
            BudgetPreference::Low => 1000.0,
            BudgetPreference::Medium => 2500.0,
            BudgetPreference::High => 5000.0,
        }
    }
}

impl Default for BudgetPreference {
    fn default() -> Self {
        BudgetPreference::Medium
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub age: u32,
    pub archetype: String,
    #[serde(default)]
    pub budget: BudgetPreference,
    /// Interest tag -> intensity on a 0..10 scale.
    #[serde(default)]
    pub interests: BTreeMap<String, u8>,
    /// Probability of being active on a given day.
    #[serde(default = "default_activity")]
    pub activity: f32,
}

fn default_activity() -> f32 {
    0.5
}

/// The request subject: a pair of members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub members: Vec<Member>,
}

impl Subject {
    /// Lower-cased interests with intensity of at least `min_intensity` for any member.
    pub fn strong_interests(&self, min_intensity: u8) -> Vec<String> {
        let mut interests: Vec<String> = self
            .members
            .iter()
            .flat_map(|m| m.interests.iter())
            .filter(|(_, &intensity)| intensity >= min_intensity)
            .map(|(tag, _)| tag.to_lowercase())
            .collect();
        interests.sort();
        interests.dedup();
        interests
    }

    /// Average budget level across members, truncated (medium when empty).
    pub fn budget_level(&self) -> u8 {
        if self.members.is_empty() {
            return BudgetPreference::Medium.level();
        }
        let total: u32 = self.members.iter().map(|m| m.budget.level() as u32).sum();
        (total / self.members.len() as u32) as u8
    }
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    items: Vec<CatalogItem>,
    #[serde(default)]
    subjects: Vec<Subject>,
}

#[derive(Debug, Default)]
pub struct Catalog {
    items: Vec<CatalogItem>,
    index: HashMap<String, usize>,
    subjects: HashMap<String, Subject>,
}

impl Catalog {
    pub fn new(items: Vec<CatalogItem>, subjects: Vec<Subject>) -> Self {
        let index = items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.id.clone(), i))
            .collect();
        let subjects = subjects.into_iter().map(|s| (s.id.clone(), s)).collect();
        Self {
            items,
            index,
            subjects,
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading catalog {}", path.display()))?;
        let file: CatalogFile = serde_json::from_str(&raw)
            .with_context(|| format!("parsing catalog {}", path.display()))?;

        info!(
            items = file.items.len(),
            subjects = file.subjects.len(),
            "Loaded catalog from {}",
            path.display()
        );
        Ok(Self::new(file.items, file.subjects))
    }

    pub fn item(&self, id: &str) -> Option<&CatalogItem> {
        self.index.get(id).map(|&i| &self.items[i])
    }

    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    pub fn subject(&self, id: &str) -> Option<&Subject> {
        self.subjects.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn member(budget: BudgetPreference) -> Member {
        Member {
            id: "u".into(),
            age: 30,
            archetype: "Gourmets".into(),
            budget,
            interests: BTreeMap::from([("Food".to_string(), 8), ("chess".to_string(), 2)]),
            activity: 0.5,
        }
    }

    #[test]
    fn test_budget_level_truncates() {
        let subject = Subject {
            id: "pair_1".into(),
            members: vec![member(BudgetPreference::Low), member(BudgetPreference::Medium)],
        };
        assert_eq!(subject.budget_level(), 1);
    }

    #[test]
    fn test_strong_interests_lowercased_and_filtered() {
        let subject = Subject {
            id: "pair_1".into(),
            members: vec![member(BudgetPreference::High), member(BudgetPreference::High)],
        };
        assert_eq!(subject.strong_interests(5), vec!["food".to_string()]);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "items": [{{"id": "item_1", "title": "Dinner", "category": "restaurant", "price": 800, "tags": ["food"], "popularity": 0.4}}],
                "subjects": [{{"id": "pair_1", "members": [{{"id": "u1", "age": 28, "archetype": "Gourmets", "budget": "low", "interests": {{"food": 9}}}}]}}]
            }}"#
        )
        .unwrap();

        let catalog = Catalog::load(file.path()).unwrap();
        assert_eq!(catalog.items().len(), 1);
        assert_eq!(catalog.item("item_1").unwrap().price, 800.0);
        assert_eq!(catalog.subject("pair_1").unwrap().members[0].activity, 0.5);
        assert!(catalog.subject("pair_2").is_none());
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(Catalog::load("/nonexistent/catalog.json").is_err());
    }
}
