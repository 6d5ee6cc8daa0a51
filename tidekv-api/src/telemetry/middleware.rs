//! Axum Middleware for HTTP Request Tracing and Metrics
//!
//! Every request gets a `http_request` span, a Prometheus sample and a
//! completion log line.

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info_span, Instrument};

use super::metrics::METRICS;

/// Route label for metrics and spans.
///
/// Uses the matched route template (`/kv/*key`) so keys never become label
/// values. Unmatched requests share one label.
fn route_label(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string())
}

/// Observability middleware for Axum.
pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let route = route_label(&request);

    let span = info_span!(
        "http_request",
        http.method = %method,
        http.target = %path,
        http.route = %route,
    );

    let response = next.run(request).instrument(span).await;

    let duration = start.elapsed();
    let status = response.status();

    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_http_request(method.as_str(), &route, status.as_u16(), duration.as_secs_f64());
    }

    if status.is_server_error() {
        tracing::warn!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = duration.as_millis() as u64,
            "Request failed"
        );
    } else {
        tracing::info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = duration.as_millis() as u64,
            "Request completed"
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest};

    #[test]
    fn test_route_label_without_match() -> Result<(), axum::http::Error> {
        let request = HttpRequest::builder().uri("/kv/user:1").body(Body::empty())?;
        assert_eq!(route_label(&request), "unmatched");
        Ok(())
    }
}
