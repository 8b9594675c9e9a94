/// Health and status endpoints
use actix_web::{get, web, HttpResponse};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::models::ComponentName;
use crate::services::health::ComponentState;
use crate::services::pipeline::TIER_TABLE_VERSION;
use crate::services::ranking::FusionWeights;
use crate::services::PerformanceStats;
use crate::state::AppState;

/// Components that must be Ready for the service to answer at all.
pub const QUORUM: [ComponentName; 2] = [ComponentName::Content, ComponentName::WeightedFusion];

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub not_ready: Vec<ComponentName>,
}

#[derive(Debug, Serialize)]
pub struct DeepHealthResponse {
    pub status: &'static str,
    pub components: BTreeMap<ComponentName, ComponentState>,
    pub cache_size: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub health: DeepHealthResponse,
    pub version: &'static str,
    pub environment: String,
    pub tier_table: &'static str,
    pub feature_schema: String,
    pub model_version: Option<String>,
    pub weights: FusionWeights,
    pub performance: PerformanceStats,
}

fn quorum_status(state: &AppState) -> (bool, Vec<ComponentName>) {
    if state.registry.all_ready(&QUORUM) {
        return (true, Vec::new());
    }
    let not_ready = QUORUM
        .into_iter()
        .filter(|name| !state.registry.is_ready(*name))
        .collect();
    (false, not_ready)
}

fn status_label(healthy: bool) -> &'static str {
    if healthy {
        "healthy"
    } else {
        "unhealthy"
    }
}

fn deep(state: &AppState) -> DeepHealthResponse {
    DeepHealthResponse {
        status: status_label(quorum_status(state).0),
        components: state.registry.status_snapshot(),
        cache_size: state.service.cache().len(),
    }
}

/// GET /health
/// 200 when the base tier can serve, 503 otherwise.
#[get("/health")]
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let (healthy, not_ready) = quorum_status(&state);
    let body = HealthResponse {
        status: status_label(healthy),
        not_ready,
    };
    if healthy {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

/// GET /health/deep
#[get("/health/deep")]
pub async fn deep_health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(deep(&state))
}

/// GET /api/v1/status
#[get("/api/v1/status")]
pub async fn service_status(state: web::Data<AppState>) -> HttpResponse {
    let pipeline = state.service.pipeline();
    HttpResponse::Ok().json(StatusResponse {
        health: deep(&state),
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app.env.clone(),
        tier_table: TIER_TABLE_VERSION,
        feature_schema: pipeline.learned().extractor().schema().version().to_string(),
        model_version: pipeline.learned().model_version(),
        weights: pipeline.weighted().weights(),
        performance: state.service.stats(),
    })
}
