//! Human-readable explanations, produced after ranking is complete.

use crate::models::Candidate;
use serde::Serialize;

pub trait Explainer: Send + Sync {
    fn explain(&self, candidate: &Candidate, top_factors: &[(String, f32)]) -> String;
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Factor {
    pub name: String,
    pub weight: f32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Explanation {
    pub item_id: String,
    pub text: String,
    pub top_factors: Vec<Factor>,
}

/// Fixed phrasing built from factor names and the candidate's reasons.
#[derive(Debug, Default)]
pub struct TemplateExplainer;

impl TemplateExplainer {
    fn describe(factor: &str) -> String {
        match factor {
            "content_score" => "a strong match with your shared interests".to_string(),
            "latent_score" | "latent" => "what similar pairs enjoyed".to_string(),
            "embedding_score" | "embedding" => "its similarity to places you like".to_string(),
            "content" => "your shared interests".to_string(),
            "price_match_score" | "price_normalized" | "price_log" => "your budget".to_string(),
            "item_popularity" | "item_popularity_log" => "its popularity".to_string(),
            "day_of_week" | "is_weekend" => "the day you are planning for".to_string(),
            other => other.replace('_', " "),
        }
    }
}

impl Explainer for TemplateExplainer {
    fn explain(&self, candidate: &Candidate, top_factors: &[(String, f32)]) -> String {
        let mut text = format!("{} is recommended", candidate.title);

        let mut drivers: Vec<String> = Vec::new();
        for (name, _) in top_factors {
            let phrase = Self::describe(name);
            if !drivers.contains(&phrase) {
                drivers.push(phrase);
            }
        }
        if !drivers.is_empty() {
            text.push_str(" mainly because of ");
            text.push_str(&drivers.join(" and "));
        }
        text.push('.');

        if !candidate.reasons.is_empty() {
            text.push(' ');
            text.push_str(&candidate.reasons.join(". "));
            text.push('.');
        }
        text
    }
}

/// Source contributions as factors, strongest first.
pub fn source_factors(candidate: &Candidate, n: usize) -> Vec<(String, f32)> {
    let mut factors: Vec<(String, f32)> = candidate
        .source_scores
        .iter()
        .filter(|(_, score)| **score > 0.0)
        .map(|(source, score)| (source.to_string(), *score))
        .collect();
    factors.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    factors.truncate(n);
    factors
}
