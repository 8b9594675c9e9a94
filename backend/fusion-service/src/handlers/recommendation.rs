/// Recommendation API Handlers
///
/// HTTP endpoint for fused, ranked recommendations
use actix_web::{post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Candidate, MethodUsed, RecommendationContext, SourceName};
use crate::services::{ExperimentAssignment, Explanation, RecommendRequest};
use crate::state::AppState;

const MAX_TOP_K: usize = 100;

/// Request body for POST /recommend
#[derive(Debug, Deserialize)]
pub struct RecommendBody {
    pub subject_id: String,

    /// Number of recommendations to return (default: 10, max: 100)
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default)]
    pub context: Option<RecommendationContext>,

    #[serde(default)]
    pub experiment_id: Option<String>,

    #[serde(default)]
    pub include_explanations: bool,

    /// Per-request deadline; never longer than the configured one
    #[serde(default)]
    pub max_latency_ms: Option<u64>,
}

fn default_top_k() -> usize {
    10
}

#[derive(Debug, Serialize)]
pub struct RecommendResponse {
    pub request_id: Uuid,
    pub recommendations: Vec<Candidate>,
    pub method_used: MethodUsed,
    pub sources_used: Vec<SourceName>,
    pub processing_time_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment: Option<ExperimentAssignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanations: Option<Vec<Explanation>>,
}

impl RecommendBody {
    fn validate(self) -> Result<RecommendRequest> {
        if self.subject_id.trim().is_empty() {
            return Err(AppError::ValidationError("subject_id must not be empty".to_string()));
        }
        if self.top_k == 0 || self.top_k > MAX_TOP_K {
            return Err(AppError::ValidationError(format!(
                "top_k must be between 1 and {}",
                MAX_TOP_K
            )));
        }
        if self.max_latency_ms == Some(0) {
            return Err(AppError::ValidationError("max_latency_ms must be positive".to_string()));
        }

        Ok(RecommendRequest {
            subject_id: self.subject_id,
            top_k: self.top_k,
            context: self.context.unwrap_or_default(),
            experiment_id: self.experiment_id,
            include_explanations: self.include_explanations,
            max_latency: self.max_latency_ms.map(Duration::from_millis),
        })
    }
}

/// POST /recommend
/// Ranked recommendations for a subject. An empty list with
/// `method_used = "unavailable"` is a normal 200 response.
#[post("/recommend")]
pub async fn recommend(body: web::Json<RecommendBody>, state: web::Data<AppState>) -> Result<HttpResponse> {
    let request = body.into_inner().validate()?;
    let request_id = Uuid::new_v4();

    debug!(
        %request_id,
        subject_id = %request.subject_id,
        top_k = request.top_k,
        experiment_id = ?request.experiment_id,
        "recommend request"
    );

    match state.service.recommend(&request).await {
        Ok(served) => Ok(HttpResponse::Ok().json(RecommendResponse {
            request_id,
            recommendations: served.result.recommendations,
            method_used: served.result.method_used,
            sources_used: served.result.sources_used,
            processing_time_ms: served.elapsed.as_secs_f64() * 1000.0,
            experiment: served.experiment,
            explanations: served.explanations,
        })),
        Err(err) => {
            error!(%request_id, subject_id = %request.subject_id, error = %err, "recommend failed");
            Err(err.into())
        }
    }
}
