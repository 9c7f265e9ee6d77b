//! Metrics definitions for the auth service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `auth_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: 7 values max (GET, POST, PATCH, DELETE, PUT, HEAD, OPTIONS)
//! - `endpoint`: known paths, everything else is `/other`
//! - `stage`: the seven pipeline stages
//! - `outcome`: authenticated, no_match, rejected, error
//! - `status`: success, error, timeout
//! - `operation`: bounded by code (cache_get, cache_put, ensure_profile, ...)

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("auth_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Pipeline spans a cache hit (sub-ms) to a full IdP round trip
        .set_buckets_for_metric(
            Matcher::Prefix("auth_pipeline".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set pipeline buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("auth_idp_request".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.200, 0.500, 1.000, 2.000, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set IdP request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("auth_db_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set DB query buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `auth_http_requests_total`, `auth_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("auth_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.to_string(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("auth_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.to_string(),
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to bound label cardinality.
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/" => "/",
        "/health" => "/health",
        "/ready" => "/ready",
        "/metrics" => "/metrics",
        "/api/v1/me" => "/api/v1/me",
        "/api/v1/me/scopes" => "/api/v1/me/scopes",
        _ => "/other",
    }
}

// ============================================================================
// Pipeline Metrics
// ============================================================================

/// Record one stage attempt.
///
/// Metric: `auth_pipeline_stage_total`
/// Labels: `stage`, `outcome`
pub fn record_stage(stage: &'static str, outcome: &'static str) {
    counter!("auth_pipeline_stage_total",
        "stage" => stage,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a full authentication.
///
/// Metric: `auth_pipeline_duration_seconds`, `auth_pipeline_total`
/// Labels: `status` (authenticated, missing_credential, invalid_credential, error),
/// `source` (stage that matched, or `none`)
pub fn record_authentication(status: &'static str, source: &'static str, duration: Duration) {
    histogram!("auth_pipeline_duration_seconds",
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("auth_pipeline_total",
        "status" => status,
        "source" => source
    )
    .increment(1);
}

/// Record a scope check failure.
///
/// Metric: `auth_scope_denied_total`
pub fn record_scope_denied() {
    counter!("auth_scope_denied_total").increment(1);
}

// ============================================================================
// IdP Metrics
// ============================================================================

/// Record an IdP call.
///
/// Metric: `auth_idp_request_duration_seconds`, `auth_idp_requests_total`
/// Labels: `endpoint` (introspect, userinfo), `status`
pub fn record_idp_request(endpoint: &'static str, status: &'static str, duration: Duration) {
    histogram!("auth_idp_request_duration_seconds",
        "endpoint" => endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("auth_idp_requests_total",
        "endpoint" => endpoint,
        "status" => status
    )
    .increment(1);
}

/// Metric: `auth_idp_circuit_trips_total`
pub fn record_circuit_trip() {
    counter!("auth_idp_circuit_trips_total").increment(1);
}

/// Metric: `auth_introspection_coalesced_total`
pub fn record_introspection_coalesced() {
    counter!("auth_introspection_coalesced_total").increment(1);
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Record database query execution
///
/// Metric: `auth_db_query_duration_seconds`, `auth_db_queries_total`
/// Labels: `operation`, `status`
pub fn record_db_query(operation: &'static str, status: &'static str, duration: Duration) {
    histogram!("auth_db_query_duration_seconds",
        "operation" => operation
    )
    .record(duration.as_secs_f64());

    counter!("auth_db_queries_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

/// Record an introspection cache lookup.
///
/// Metric: `auth_introspection_cache_total`
/// Labels: `result` (hit, negative_hit, expired_hit, miss, error)
pub fn record_cache_lookup(result: &'static str) {
    counter!("auth_introspection_cache_total",
        "result" => result
    )
    .increment(1);
}
