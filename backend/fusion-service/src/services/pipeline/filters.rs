use crate::models::{Candidate, RecommendationContext};
use std::cmp::Ordering;
use std::collections::BTreeMap;

const PREFERRED_REASON: &str = "In a preferred category";

/// Union of source reports keyed by candidate id. The result is ordered by id,
/// so the merge does not depend on the order the sources answered in.
pub fn merge_candidates<I>(reports: I) -> Vec<Candidate>
where
    I: IntoIterator<Item = Vec<Candidate>>,
{
    let mut merged: BTreeMap<String, Candidate> = BTreeMap::new();
    for candidate in reports.into_iter().flatten() {
        match merged.get_mut(&candidate.id) {
            Some(existing) => existing.absorb(candidate),
            None => {
                merged.insert(candidate.id.clone(), candidate);
            }
        }
    }
    merged.into_values().collect()
}

fn contains_ci(list: &[String], value: &str) -> bool {
    list.iter().any(|v| v.eq_ignore_ascii_case(value))
}

/// Hard filters drop candidates; the preferred-category boost scales
/// `combined_score` by `boost`, already clamped to its allowed range.
pub fn apply_context(candidates: Vec<Candidate>, context: &RecommendationContext, boost: f32) -> Vec<Candidate> {
    candidates
        .into_iter()
        .filter(|c| context.max_price.map_or(true, |max| c.price <= max))
        .filter(|c| {
            context
                .categories
                .as_ref()
                .map_or(true, |include| include.is_empty() || contains_ci(include, &c.category))
        })
        .filter(|c| {
            context
                .exclude_categories
                .as_ref()
                .map_or(true, |exclude| !contains_ci(exclude, &c.category))
        })
        .map(|mut c| {
            let preferred = context
                .preferred_categories
                .as_ref()
                .map_or(false, |p| contains_ci(p, &c.category));
            if preferred {
                // a boost must never push a negative score further down
                c.combined_score = if c.combined_score >= 0.0 {
                    c.combined_score * boost
                } else {
                    c.combined_score / boost
                };
                c.push_reason(PREFERRED_REASON);
            }
            c
        })
        .collect()
}

fn sort_key(c: &Candidate) -> f32 {
    if c.combined_score.is_nan() {
        f32::NEG_INFINITY
    } else {
        c.combined_score
    }
}

/// Score descending, then more corroborating sources, then id ascending.
pub fn compare_ranked(a: &Candidate, b: &Candidate) -> Ordering {
    sort_key(b)
        .total_cmp(&sort_key(a))
        .then_with(|| b.source_scores.len().cmp(&a.source_scores.len()))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn sort_and_truncate(mut candidates: Vec<Candidate>, top_k: usize) -> Vec<Candidate> {
    candidates.sort_by(compare_ranked);
    candidates.truncate(top_k);
    candidates
}
