//! HTTP server for the Prometheus scrape endpoint.

use std::net::SocketAddr;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::registry::SharedRegistry;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    registry: SharedRegistry,
}

/// Create the HTTP router.
///
/// Metrics are served on `/metrics` and on `/`, so scrape configs that point
/// at the root path keep working.
fn create_router(registry: SharedRegistry) -> Router {
    let state = AppState { registry };

    Router::new()
        .route("/", get(metrics_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/status", get(status_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.registry.render();

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
///
/// Ready once the first refresh cycle has completed, even if it published
/// nothing (an empty account is still a valid scrape target).
async fn ready_handler(State(state): State<AppState>) -> Response {
    if state.registry.stats().cycles_completed > 0 {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no refresh cycle completed yet\n",
        )
            .into_response()
    }
}

/// Handler for the /status endpoint: JSON refresh statistics.
async fn status_handler(State(state): State<AppState>) -> Response {
    let stats = state.registry.stats();

    Json(serde_json::json!({
        "series": state.registry.series_count(),
        "refresh": stats,
    }))
    .into_response()
}

/// HTTP server configuration.
pub struct HttpServer {
    registry: SharedRegistry,
    listen_addr: SocketAddr,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(registry: SharedRegistry, listen_addr: SocketAddr) -> Self {
        Self {
            registry,
            listen_addr,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    ///
    /// Binding the listener is the one fatal failure here; the caller is
    /// expected to abort the process on error.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = create_router(self.registry);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(addr = %self.listen_addr, "HTTP server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{MetricRegistry, SUBNET_AVAILABLE_IPS};
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn make_registry() -> SharedRegistry {
        Arc::new(MetricRegistry::for_exporter())
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let registry = make_registry();
        registry.set_gauge(
            SUBNET_AVAILABLE_IPS,
            vec!["vpc-9".to_string(), "subnet-1".to_string(), "app".to_string()],
            250.0,
        );
        let router = create_router(registry);

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));

        let body = body_string(response).await;
        assert!(body.contains(
            "aws_vpc_subnet_available_ip_address_count{vpc=\"vpc-9\",subnet=\"subnet-1\",name=\"app\"} 250"
        ));
    }

    #[tokio::test]
    async fn test_root_serves_metrics() {
        let registry = make_registry();
        let router = create_router(registry);

        let response = router
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("# TYPE aws_vpc_subnet_available_ip_address_count gauge"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = create_router(make_registry());

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_endpoint_before_and_after_first_cycle() {
        let registry = make_registry();
        let router = create_router(registry.clone());

        let response = router
            .clone()
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        registry.note_cycle(0, 0, 0);

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let registry = make_registry();
        registry.note_cycle(4, 1, 0);
        let router = create_router(registry);

        let response = router
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        let status: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(status["refresh"]["cycles_completed"], 1);
        assert_eq!(status["refresh"]["observations_published"], 4);
        assert_eq!(status["series"], 0);
    }

    #[tokio::test]
    async fn test_unknown_path_404() {
        let router = create_router(make_registry());

        let response = router
            .oneshot(Request::get("/unknown").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
