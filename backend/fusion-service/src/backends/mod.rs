//! Externally trained subsystems consumed by the fusion pipeline.
//!
//! Each backend is a narrow trait plus a file-backed implementation that only
//! loads artifacts produced elsewhere.

pub mod ann_index;
pub mod catalog;
pub mod latent_factor;
pub mod ranker_model;

pub use ann_index::{distance_to_similarity, AnnError, AnnIndex, FlatIndex};
pub use catalog::{BudgetPreference, Catalog, CatalogItem, Member, Subject};
pub use latent_factor::{FactorTable, LatentFactorError, LatentFactorModel};
pub use ranker_model::{ModelError, OnnxRankingModel, RankerMetadata, RankingModel};
