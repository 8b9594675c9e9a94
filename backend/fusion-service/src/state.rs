//! Process-scoped state and its startup wiring.

use crate::backends::{
    AnnIndex, Catalog, FactorTable, FlatIndex, LatentFactorModel, OnnxRankingModel, RankingModel,
};
use crate::config::{Config, DataConfig};
use crate::models::{ComponentName, RankedResult};
use crate::services::explain::{Explainer, TemplateExplainer};
use crate::services::features::FeatureExtractor;
use crate::services::health::{ComponentHealthRegistry, ComponentStatus, Probe};
use crate::services::pipeline::FusionPipeline;
use crate::services::ranking::{FusionWeights, LearnedRanker, WeightedFusion};
use crate::services::sources::{
    CandidateSource, ContentSimilaritySource, EmbeddingSource, LatentFactorSource,
};
use crate::services::{ExperimentBucketer, RecommendationService, ResultCache};
use futures::FutureExt;
use std::sync::Arc;
use tracing::{info, warn};

/// Loaded artifacts. A missing or broken artifact leaves its slot empty so
/// the dependent component fails its startup probe instead of the process.
#[derive(Default)]
pub struct Backends {
    pub catalog: Option<Arc<Catalog>>,
    pub latent: Option<Arc<dyn LatentFactorModel>>,
    pub ann: Option<Arc<dyn AnnIndex>>,
    pub ranker: Option<Arc<dyn RankingModel>>,
}

fn loaded<T>(what: &str, result: anyhow::Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(backend = what, error = %format!("{:#}", e), "backend not loaded");
            None
        }
    }
}

impl Backends {
    pub fn load(data: &DataConfig) -> Self {
        let catalog = loaded("catalog", Catalog::load(&data.catalog_path)).map(Arc::new);
        let latent = loaded("latent_factors", FactorTable::load(&data.latent_factors_path))
            .map(|t| Arc::new(t) as Arc<dyn LatentFactorModel>);
        let ann = loaded("embeddings", FlatIndex::load(&data.embeddings_path))
            .map(|i| Arc::new(i) as Arc<dyn AnnIndex>);
        let ranker = loaded(
            "ranker_model",
            OnnxRankingModel::load(&data.ranker_model_path, &data.ranker_metadata_path),
        )
        .map(|m| Arc::new(m) as Arc<dyn RankingModel>);

        Self {
            catalog,
            latent,
            ann,
            ranker,
        }
    }
}

/// Everything the pipeline is assembled from.
pub struct Components {
    pub sources: Vec<Arc<dyn CandidateSource>>,
    pub learned: Arc<LearnedRanker>,
    pub weighted: Arc<WeightedFusion>,
    pub explainer: Arc<dyn Explainer>,
    pub bucketer: ExperimentBucketer,
}

impl Components {
    pub fn from_backends(weights: FusionWeights, backends: Backends, bucketer: ExperimentBucketer) -> Self {
        let Backends {
            catalog,
            latent,
            ann,
            ranker,
        } = backends;
        let sources: Vec<Arc<dyn CandidateSource>> = vec![
            Arc::new(ContentSimilaritySource::new(catalog.clone())),
            Arc::new(LatentFactorSource::new(catalog.clone(), latent)),
            Arc::new(EmbeddingSource::new(catalog.clone(), ann)),
        ];
        let extractor = Arc::new(FeatureExtractor::new(catalog));

        Self {
            sources,
            learned: Arc::new(LearnedRanker::new(ranker, extractor)),
            weighted: Arc::new(WeightedFusion::new(weights)),
            explainer: Arc::new(TemplateExplainer),
            bucketer,
        }
    }
}

pub struct AppState {
    pub service: Arc<RecommendationService>,
    pub registry: Arc<ComponentHealthRegistry>,
    pub config: Config,
}

impl AppState {
    /// Probe every component concurrently, then assemble the service. No
    /// component initialization happens after this returns.
    pub async fn initialize(config: Config, components: Components) -> Self {
        let registry = Arc::new(ComponentHealthRegistry::new());

        let mut probes: Vec<(ComponentName, Probe)> = components
            .sources
            .iter()
            .map(|source| {
                let source = source.clone();
                let name: ComponentName = source.name().into();
                (name, async move { source.warm_up().await }.boxed())
            })
            .collect();
        let learned = components.learned.clone();
        probes.push((ComponentName::LearnedRanker, async move { learned.check() }.boxed()));
        // weights were validated when the fusion strategy was built
        probes.push((ComponentName::WeightedFusion, async { Ok::<(), String>(()) }.boxed()));
        probes.push((ComponentName::Explainer, async { Ok::<(), String>(()) }.boxed()));

        registry.initialize_all(probes).await;

        let pipeline = Arc::new(FusionPipeline::new(
            components.sources,
            components.learned,
            components.weighted,
            registry.clone(),
            config.pipeline.clone(),
        ));
        let cache = Arc::new(ResultCache::<RankedResult>::new(&config.cache));
        let service = Arc::new(RecommendationService::new(
            pipeline,
            cache,
            Arc::new(components.bucketer),
            components.explainer,
        ));

        let ready = registry
            .status_snapshot()
            .values()
            .filter(|state| state.status == ComponentStatus::Ready)
            .count();
        info!(ready, total = ComponentName::ALL.len(), "components initialized");

        Self {
            service,
            registry,
            config,
        }
    }

    /// Load artifacts named in the configuration and initialize.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let bucketer = match &config.data.experiments_path {
            Some(path) => ExperimentBucketer::load(path)?,
            None => ExperimentBucketer::default(),
        };
        let weights = FusionWeights::try_from(config.weights)?;
        let backends = Backends::load(&config.data);
        let components = Components::from_backends(weights, backends, bucketer);
        Ok(Self::initialize(config, components).await)
    }
}
