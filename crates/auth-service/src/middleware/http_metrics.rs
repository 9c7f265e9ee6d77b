//! HTTP metrics middleware.
//!
//! Applied as the outermost layer so that responses produced before a
//! handler runs (400 from the auth gate, 404, 405, timeouts) are counted too.

use crate::observability::metrics::record_http_request;
use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    record_http_request(&method, &path, response.status().as_u16(), start.elapsed());
    response
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use tower::ServiceExt;

    async fn handler_200() -> &'static str {
        "OK"
    }

    fn test_app() -> Router {
        Router::new()
            .route("/health", get(handler_200))
            .layer(middleware::from_fn(http_metrics_middleware))
    }

    #[tokio::test]
    async fn test_passes_response_through() {
        let request = HttpRequest::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = test_app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_records_not_found_under_other() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let request = HttpRequest::builder()
                    .uri("/api/v1/projects/42")
                    .body(Body::empty())
                    .unwrap();
                let response = test_app().oneshot(request).await.unwrap();
                assert_eq!(response.status(), StatusCode::NOT_FOUND);
            });
        });

        let recorded = snapshotter.snapshot().into_vec().into_iter().any(|(key, _, _, value)| {
            let key = key.key();
            key.name() == "auth_http_requests_total"
                && key.labels().any(|l| l.key() == "endpoint" && l.value() == "/other")
                && key.labels().any(|l| l.key() == "status_code" && l.value() == "404")
                && matches!(value, DebugValue::Counter(1))
        });
        assert!(recorded);
    }
}
