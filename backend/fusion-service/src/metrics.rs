use std::time::Duration;

use actix_web::HttpResponse;
use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter_vec, Encoder, Histogram,
    HistogramVec, IntCounterVec, TextEncoder,
};

lazy_static! {
    static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total HTTP requests",
        &["method", "path", "status"]
    )
    .expect("failed to register http_requests_total");

    static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latency",
        &["method", "path", "status"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("failed to register http_request_duration_seconds");

    static ref FUSION_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fusion_requests_total",
        "Recommendation requests by the tier that served them",
        &["method_used"]
    )
    .expect("failed to register fusion_requests_total");

    static ref FUSION_TIER_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fusion_tier_failures_total",
        "Tier attempts abandoned, by tier and offending component",
        &["tier", "component"]
    )
    .expect("failed to register fusion_tier_failures_total");

    static ref FUSION_CACHE_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fusion_cache_events_total",
        "Result cache events (hit/miss/store/evict/corrupt)",
        &["event"]
    )
    .expect("failed to register fusion_cache_events_total");

    static ref FUSION_REQUEST_DURATION_SECONDS: Histogram = register_histogram!(
        "fusion_request_duration_seconds",
        "End-to-end recommendation latency",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("failed to register fusion_request_duration_seconds");
}

pub fn observe_http_request(method: &str, path: &str, status: u16, elapsed: Duration) {
    let status_label = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status_label])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path, &status_label])
        .observe(elapsed.as_secs_f64());
}

pub fn record_request(method_used: &str, elapsed: Duration) {
    FUSION_REQUESTS_TOTAL.with_label_values(&[method_used]).inc();
    FUSION_REQUEST_DURATION_SECONDS.observe(elapsed.as_secs_f64());
}

pub fn record_tier_failure(tier: &str, component: &str) {
    FUSION_TIER_FAILURES_TOTAL
        .with_label_values(&[tier, component])
        .inc();
}

pub fn record_cache_event(event: &str, count: u64) {
    FUSION_CACHE_EVENTS_TOTAL
        .with_label_values(&[event])
        .inc_by(count);
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
