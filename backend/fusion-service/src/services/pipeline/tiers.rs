//! Declared degradation order of the fusion pipeline.

use crate::models::{ComponentName, MethodUsed, SourceName};
use std::fmt;

pub const TIER_TABLE_VERSION: &str = "tiers-v1";

/// One fallback level, highest quality first in [`Tier::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Learned ranker over all three sources.
    LearnedRankerFull,
    /// Weighted fusion over all three sources.
    WeightedFusionFull,
    /// Weighted fusion over two sources, weights renormalized.
    WeightedFusionPartial,
    /// Scores of the highest-priority usable source, unchanged.
    SingleSource,
}

impl Tier {
    pub const ALL: [Tier; 4] = [
        Tier::LearnedRankerFull,
        Tier::WeightedFusionFull,
        Tier::WeightedFusionPartial,
        Tier::SingleSource,
    ];

    pub fn method(&self) -> MethodUsed {
        match self {
            Tier::LearnedRankerFull => MethodUsed::LearnedRankerFull,
            Tier::WeightedFusionFull => MethodUsed::WeightedFusionFull,
            Tier::WeightedFusionPartial => MethodUsed::WeightedFusionPartial,
            Tier::SingleSource => MethodUsed::SingleSource,
        }
    }

    /// Ranking component that must be Ready. Passthrough needs none.
    pub fn strategy(&self) -> Option<ComponentName> {
        match self {
            Tier::LearnedRankerFull => Some(ComponentName::LearnedRanker),
            Tier::WeightedFusionFull | Tier::WeightedFusionPartial => Some(ComponentName::WeightedFusion),
            Tier::SingleSource => None,
        }
    }

    /// Sources this tier would use, given the usable ones in priority order;
    /// `None` when the tier is not viable.
    pub fn sources(&self, usable: &[SourceName]) -> Option<Vec<SourceName>> {
        let all = SourceName::ALL.len();
        match self {
            Tier::LearnedRankerFull | Tier::WeightedFusionFull => {
                (usable.len() == all).then(|| usable.to_vec())
            }
            Tier::WeightedFusionPartial => {
                (usable.len() >= 2 && usable.len() < all).then(|| usable.to_vec())
            }
            Tier::SingleSource => usable.first().map(|s| vec![*s]),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method().as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SourceName; 3] = SourceName::ALL;

    #[test]
    fn test_full_tiers_need_every_source() {
        assert_eq!(Tier::LearnedRankerFull.sources(&ALL), Some(ALL.to_vec()));
        assert_eq!(
            Tier::WeightedFusionFull.sources(&[SourceName::Content, SourceName::Latent]),
            None
        );
    }

    #[test]
    fn test_partial_tier() {
        let two = [SourceName::Latent, SourceName::Embedding];
        assert_eq!(Tier::WeightedFusionPartial.sources(&two), Some(two.to_vec()));
        assert_eq!(Tier::WeightedFusionPartial.sources(&ALL), None);
        assert_eq!(Tier::WeightedFusionPartial.sources(&[SourceName::Content]), None);
    }

    #[test]
    fn test_single_source_uses_priority() {
        assert_eq!(
            Tier::SingleSource.sources(&[SourceName::Latent, SourceName::Embedding]),
            Some(vec![SourceName::Latent])
        );
        assert_eq!(Tier::SingleSource.sources(&[]), None);
        assert_eq!(Tier::SingleSource.strategy(), None);
    }

    #[test]
    fn test_tier_names() {
        let names: Vec<String> = Tier::ALL.iter().map(|t| t.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "learned_ranker_full",
                "weighted_fusion_full",
                "weighted_fusion_partial",
                "single_source"
            ]
        );
    }
}
