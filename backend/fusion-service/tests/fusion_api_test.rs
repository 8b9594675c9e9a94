use actix_web::{http::StatusCode, test, web, App};
use async_trait::async_trait;
use ndarray::{Array1, Array2};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fusion_service::backends::latent_factor::FactorEntry;
use fusion_service::backends::{
    AnnIndex, BudgetPreference, Catalog, CatalogItem, FactorTable, FlatIndex, LatentFactorModel,
    Member, ModelError, RankingModel, Subject,
};
use fusion_service::config::Config;
use fusion_service::handlers;
use fusion_service::models::{Candidate, ComponentName, MethodUsed, SourceName};
use fusion_service::services::experiments::{Experiment, Treatment};
use fusion_service::services::features::FeatureSchema;
use fusion_service::services::sources::SourceError;
use fusion_service::services::{RecommendRequest, RunOptions};
use fusion_service::{AppState, Backends, CandidateSource, Components, ExperimentBucketer, FusionWeights};

/// Scores a row as content + latent, enough to tell the learned tier apart.
struct SumModel {
    names: Vec<String>,
}

impl RankingModel for SumModel {
    fn version(&self) -> &str {
        "sum-model-1"
    }

    fn feature_names(&self) -> &[String] {
        &self.names
    }

    fn predict(&self, features: Array2<f32>) -> Result<Array1<f32>, ModelError> {
        Ok(&features.column(0) + &features.column(1))
    }

    fn feature_importance(&self) -> BTreeMap<String, f32> {
        BTreeMap::from([
            ("content_score".to_string(), 0.6),
            ("latent_score".to_string(), 0.3),
            ("price_match_score".to_string(), 0.1),
        ])
    }
}

struct Counting {
    inner: Arc<dyn CandidateSource>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl CandidateSource for Counting {
    fn name(&self) -> SourceName {
        self.inner.name()
    }

    async fn warm_up(&self) -> Result<(), String> {
        self.inner.warm_up().await
    }

    async fn fetch(&self, subject_id: &str, limit: usize) -> Result<Vec<Candidate>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(subject_id, limit).await
    }
}

fn item(id: &str, title: &str, category: &str, price: f64, tags: &[&str], popularity: f32) -> CatalogItem {
    CatalogItem {
        id: id.to_string(),
        title: title.to_string(),
        category: category.to_string(),
        price,
        tags: tags.iter().map(|t| t.to_string()).collect(),
        popularity,
    }
}

fn member(id: &str, age: u32, archetype: &str, interests: &[(&str, u8)]) -> Member {
    Member {
        id: id.to_string(),
        age,
        archetype: archetype.to_string(),
        budget: BudgetPreference::Medium,
        interests: interests.iter().map(|(t, i)| (t.to_string(), *i)).collect(),
        activity: 0.6,
    }
}

fn factor(bias: f32, factors: [f32; 2]) -> FactorEntry {
    FactorEntry {
        bias,
        factors: factors.to_vec(),
    }
}

fn backends(with_ranker: bool) -> Backends {
    let catalog = Catalog::new(
        vec![
            item("cafe_1", "Quiet Cafe", "cafe", 500.0, &["coffee", "books"], 0.6),
            item("rest_1", "Omakase Bar", "restaurant", 2000.0, &["food", "sushi"], 0.9),
            item("gift_1", "Handmade Mug", "gift", 800.0, &["crafts"], 0.3),
            item("ent_1", "Jazz Night", "entertainment", 1500.0, &["music"], 0.7),
        ],
        vec![Subject {
            id: "pair_1".to_string(),
            members: vec![
                member("m1", 28, "artlovers", &[("coffee", 8), ("music", 7)]),
                member("m2", 30, "gourmets", &[("food", 9), ("books", 6)]),
            ],
        }],
    );

    let factors = FactorTable {
        global_mean: 5.0,
        subjects: HashMap::from([("pair_1".to_string(), factor(0.5, [1.0, 0.2]))]),
        items: HashMap::from([
            ("cafe_1".to_string(), factor(0.2, [1.5, 0.0])),
            ("rest_1".to_string(), factor(0.8, [0.5, 1.0])),
            ("gift_1".to_string(), factor(-0.5, [0.1, 0.1])),
            ("ent_1".to_string(), factor(0.1, [1.0, 0.5])),
        ]),
    };

    let index = FlatIndex::new(
        vec![
            ("cafe_1".to_string(), vec![0.1, 0.2]),
            ("rest_1".to_string(), vec![0.9, 0.8]),
            ("gift_1".to_string(), vec![0.4, 0.1]),
            ("ent_1".to_string(), vec![0.2, 0.3]),
        ],
        HashMap::from([("pair_1".to_string(), vec![0.15, 0.25])]),
    )
    .unwrap();

    let ranker = with_ranker.then(|| {
        Arc::new(SumModel {
            names: FeatureSchema::v1().names().to_vec(),
        }) as Arc<dyn RankingModel>
    });

    Backends {
        catalog: Some(Arc::new(catalog)),
        latent: Some(Arc::new(factors) as Arc<dyn LatentFactorModel>),
        ann: Some(Arc::new(index) as Arc<dyn AnnIndex>),
        ranker,
    }
}

struct Harness {
    state: web::Data<AppState>,
    calls: Arc<AtomicUsize>,
}

async fn harness(with_ranker: bool, experiments: Vec<Experiment>) -> Harness {
    let bucketer = ExperimentBucketer::new(experiments).unwrap();
    let mut components = Components::from_backends(FusionWeights::default(), backends(with_ranker), bucketer);

    let calls = Arc::new(AtomicUsize::new(0));
    components.sources = components
        .sources
        .into_iter()
        .map(|inner| {
            Arc::new(Counting {
                inner,
                calls: calls.clone(),
            }) as Arc<dyn CandidateSource>
        })
        .collect();

    let state = AppState::initialize(Config::default(), components).await;
    Harness {
        state: web::Data::new(state),
        calls,
    }
}

macro_rules! app {
    ($h:expr) => {
        test::init_service(App::new().app_data($h.state.clone()).configure(handlers::configure)).await
    };
}

macro_rules! recommend {
    ($body:expr) => {
        test::TestRequest::post().uri("/recommend").set_json($body).to_request()
    };
}

fn scores(body: &Value) -> Vec<f64> {
    body["recommendations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["combined_score"].as_f64().unwrap())
        .collect()
}

#[actix_web::test]
async fn learned_ranker_serves_then_weighted_fusion_takes_over() {
    let h = harness(true, vec![]).await;
    let app = app!(h);

    let resp = test::call_service(&app, recommend!(json!({"subject_id": "pair_1"}))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["method_used"], "learned_ranker_full");
    assert!(!body["recommendations"].as_array().unwrap().is_empty());

    h.state.registry.mark_failed(ComponentName::LearnedRanker, "model crashed");

    let resp = test::call_service(&app, recommend!(json!({"subject_id": "pair_1"}))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["method_used"], "weighted_fusion_full");

    let scores = scores(&body);
    assert!(!scores.is_empty());
    assert!(scores.windows(2).all(|w| w[0] >= w[1]), "not sorted: {:?}", scores);
}

#[actix_web::test]
async fn repeated_request_is_served_from_cache() {
    let h = harness(true, vec![]).await;
    let app = app!(h);
    let request = json!({"subject_id": "pair_1", "top_k": 3, "context": {"day_of_week": 5}});

    let first: Value = test::call_and_read_body_json(&app, recommend!(request.clone())).await;
    let calls_after_first = h.calls.load(Ordering::SeqCst);
    assert_eq!(calls_after_first, 3);

    let second: Value = test::call_and_read_body_json(&app, recommend!(request)).await;
    assert_eq!(h.calls.load(Ordering::SeqCst), calls_after_first);
    assert_eq!(first["recommendations"], second["recommendations"]);
    assert_eq!(first["method_used"], second["method_used"]);
    assert_eq!(h.state.service.stats().cache_hits, 1);
}

#[actix_web::test]
async fn context_changes_bypass_the_cache() {
    let h = harness(true, vec![]).await;
    let app = app!(h);

    let _: Value = test::call_and_read_body_json(&app, recommend!(json!({"subject_id": "pair_1"}))).await;
    let _: Value = test::call_and_read_body_json(
        &app,
        recommend!(json!({"subject_id": "pair_1", "context": {"max_price": 900}})),
    )
    .await;
    assert_eq!(h.calls.load(Ordering::SeqCst), 6);
}

#[actix_web::test]
async fn all_sources_failed_is_an_empty_200() {
    let h = harness(true, vec![]).await;
    for source in SourceName::ALL {
        h.state.registry.mark_failed(source.into(), "down");
    }
    let app = app!(h);

    let resp = test::call_service(&app, recommend!(json!({"subject_id": "pair_1"}))).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["method_used"], "unavailable");
    assert_eq!(body["recommendations"], json!([]));
}

#[actix_web::test]
async fn unknown_subject_is_404() {
    let h = harness(true, vec![]).await;
    let app = app!(h);

    let resp = test::call_service(&app, recommend!(json!({"subject_id": "pair_404"}))).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], 404);
}

#[actix_web::test]
async fn max_price_is_a_hard_filter() {
    let h = harness(true, vec![]).await;
    let app = app!(h);

    let body: Value = test::call_and_read_body_json(
        &app,
        recommend!(json!({"subject_id": "pair_1", "context": {"max_price": 1000}})),
    )
    .await;
    let ids: Vec<&str> = body["recommendations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"cafe_1"));
    assert!(!ids.contains(&"rest_1"));
    assert!(body["recommendations"]
        .as_array()
        .unwrap()
        .iter()
        .all(|c| c["price"].as_f64().unwrap() <= 1000.0));
}

#[actix_web::test]
async fn invalid_top_k_is_400() {
    let h = harness(true, vec![]).await;
    let app = app!(h);

    let resp = test::call_service(&app, recommend!(json!({"subject_id": "pair_1", "top_k": 0}))).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn weights_are_validated_before_taking_effect() {
    let h = harness(true, vec![]).await;
    let app = app!(h);

    for bad in [
        json!({"content": 0.5, "latent": 0.5, "embedding": 0.5}),
        json!({"content": 0.4, "latent": 0.3, "embedding": 0.3, "ranker": 0.1}),
        json!({"content": -0.2, "latent": 0.6, "embedding": 0.6}),
    ] {
        let req = test::TestRequest::put().uri("/weights").set_json(bad).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
    assert_eq!(
        h.state.service.pipeline().weighted().weights(),
        FusionWeights::default()
    );

    let req = test::TestRequest::put()
        .uri("/weights")
        .set_json(json!({"content": 0.2, "latent": 0.5, "embedding": 0.3}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        h.state.service.pipeline().weighted().weights(),
        FusionWeights::new(0.2, 0.5, 0.3).unwrap()
    );
}

#[actix_web::test]
async fn result_stored_after_weight_update_is_never_served() {
    let h = harness(false, vec![]).await;
    let app = app!(h);
    let service = &h.state.service;
    let request = RecommendRequest {
        subject_id: "pair_1".to_string(),
        top_k: 10,
        ..Default::default()
    };

    // a request that keyed and ranked under the old weights...
    let old_key = service.cache_key(&request, None);
    let old_result = service
        .pipeline()
        .run(&request.subject_id, request.top_k, &request.context, &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(old_result.method_used, MethodUsed::WeightedFusionFull);

    let req = test::TestRequest::put()
        .uri("/weights")
        .set_json(json!({"content": 0.0, "latent": 1.0, "embedding": 0.0}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    // ...and stores only after the update cleared the cache
    service.cache().put(old_key, &old_result, service.cache().default_ttl());

    let served = service.recommend(&request).await.unwrap();
    assert!(!served.cache_hit);
    assert_eq!(served.result.method_used, MethodUsed::WeightedFusionFull);
    assert_ne!(served.result.recommendations, old_result.recommendations);
}

#[actix_web::test]
async fn unknown_experiment_is_400() {
    let h = harness(true, vec![]).await;
    let app = app!(h);

    let resp = test::call_service(
        &app,
        recommend!(json!({"subject_id": "pair_1", "experiment_id": "exp_missing"})),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn treatment_can_disable_the_learned_ranker() {
    let experiment = Experiment {
        id: "exp_no_ranker".to_string(),
        traffic_split: 1.0,
        treatment: Treatment {
            weights: None,
            disable_learned_ranker: true,
        },
        description: String::new(),
    };
    let h = harness(true, vec![experiment]).await;
    let app = app!(h);

    let body: Value = test::call_and_read_body_json(
        &app,
        recommend!(json!({"subject_id": "pair_1", "experiment_id": "exp_no_ranker"})),
    )
    .await;
    assert_eq!(body["method_used"], "weighted_fusion_full");
    assert_eq!(body["experiment"]["variant"], "treatment");

    let body: Value = test::call_and_read_body_json(&app, recommend!(json!({"subject_id": "pair_1"}))).await;
    assert_eq!(body["method_used"], "learned_ranker_full");
}

#[actix_web::test]
async fn explanations_on_request() {
    let h = harness(true, vec![]).await;
    let app = app!(h);

    let body: Value = test::call_and_read_body_json(
        &app,
        recommend!(json!({"subject_id": "pair_1", "top_k": 2, "include_explanations": true})),
    )
    .await;
    let explanations = body["explanations"].as_array().unwrap();
    assert_eq!(explanations.len(), body["recommendations"].as_array().unwrap().len());
    assert!(explanations[0]["text"].as_str().unwrap().contains("is recommended"));

    let body: Value = test::call_and_read_body_json(&app, recommend!(json!({"subject_id": "pair_1"}))).await;
    assert!(body.get("explanations").is_none());
}

#[actix_web::test]
async fn feature_importance_requires_ready_ranker() {
    let h = harness(true, vec![]).await;
    let app = app!(h);
    let resp = test::call_service(&app, test::TestRequest::get().uri("/feature-importance").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["model_version"], "sum-model-1");
    assert_eq!(body["feature_schema"], "features-v1");

    let h = harness(false, vec![]).await;
    let app = app!(h);
    let resp = test::call_service(&app, test::TestRequest::get().uri("/feature-importance").to_request()).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn health_follows_the_base_tier() {
    let h = harness(false, vec![]).await;
    let app = app!(h);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let deep: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/health/deep").to_request()).await;
    assert_eq!(deep["components"]["learned_ranker"]["status"], "failed");
    assert_eq!(deep["components"]["content"]["status"], "ready");
    assert!(deep["cache_size"].is_number());

    h.state.registry.mark_failed(ComponentName::Content, "catalog gone");
    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["not_ready"], json!(["content"]));
}

#[actix_web::test]
async fn status_reports_versions_and_counters() {
    let h = harness(true, vec![]).await;
    let app = app!(h);
    let _: Value = test::call_and_read_body_json(&app, recommend!(json!({"subject_id": "pair_1"}))).await;

    let status: Value =
        test::call_and_read_body_json(&app, test::TestRequest::get().uri("/api/v1/status").to_request()).await;
    assert_eq!(status["tier_table"], "tiers-v1");
    assert_eq!(status["feature_schema"], "features-v1");
    assert_eq!(status["model_version"], "sum-model-1");
    assert_eq!(status["performance"]["total_requests"], 1);
    assert_eq!(status["weights"]["content"], json!(0.4));
}
