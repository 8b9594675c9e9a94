/// Runtime tuning endpoints
use actix_web::{get, put, web, HttpResponse};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use crate::config::FusionWeightsConfig;
use crate::error::{AppError, Result};
use crate::models::ComponentName;
use crate::services::ranking::FusionWeights;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct WeightsResponse {
    pub weights: FusionWeights,
    pub cache_entries_dropped: usize,
}

#[derive(Debug, Serialize)]
pub struct FeatureImportanceResponse {
    pub model_version: Option<String>,
    pub feature_schema: String,
    pub importance: BTreeMap<String, f32>,
}

/// PUT /weights
/// Replace the fusion weights. Rejected with 400 unless every weight is in
/// [0, 1] and they sum to 1.0 ± 0.01; nothing changes on rejection.
#[put("/weights")]
pub async fn put_weights(body: web::Json<serde_json::Value>, state: web::Data<AppState>) -> Result<HttpResponse> {
    let raw: FusionWeightsConfig = serde_json::from_value(body.into_inner())?;
    let weights = FusionWeights::try_from(raw)?;

    let pipeline = state.service.pipeline();
    pipeline.weighted().set_weights(weights);

    // cached results were fused with the previous weights
    let dropped = state.service.cache().len();
    state.service.cache().clear();
    info!(dropped, "result cache cleared after weight update");

    Ok(HttpResponse::Ok().json(WeightsResponse {
        weights,
        cache_entries_dropped: dropped,
    }))
}

/// GET /feature-importance
/// 404 while the learned ranker is not Ready.
#[get("/feature-importance")]
pub async fn get_feature_importance(state: web::Data<AppState>) -> Result<HttpResponse> {
    if !state.registry.is_ready(ComponentName::LearnedRanker) {
        return Err(AppError::NotFound("learned ranker is not ready".to_string()));
    }
    let learned = state.service.pipeline().learned();
    let importance = learned
        .feature_importance()
        .ok_or_else(|| AppError::NotFound("learned ranker has no model".to_string()))?;

    Ok(HttpResponse::Ok().json(FeatureImportanceResponse {
        model_version: learned.model_version(),
        feature_schema: learned.extractor().schema().version().to_string(),
        importance,
    }))
}
