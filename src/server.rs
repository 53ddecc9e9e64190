use crate::config::ShimConfig;
use crate::proxy::Proxy;

use axum::extract::State;
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: ShimConfig,
    pub proxy: Proxy,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(&state.config.route, post(handle_chat))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state.proxy.handle(method, &headers, body).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(error = %e, status = e.status_code().as_u16(), "Request failed");
            e.into_response()
        }
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::backend::{Backend, BackendRequest, BackendResponse};
    use crate::error::{Result, ShimError};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct DownBackend;

    #[async_trait]
    impl Backend for DownBackend {
        async fn send(&self, _req: BackendRequest) -> Result<BackendResponse> {
            Err(ShimError::unreachable("connection refused"))
        }
    }

    fn router(route: &str) -> Router {
        let config = ShimConfig {
            route: route.to_string(),
            ..ShimConfig::default()
        };
        let proxy = Proxy::from_config(
            &config,
            Arc::new(DownBackend),
            Arc::new(MemoryAuditSink::new()),
        );
        build_router(Arc::new(AppState { config, proxy }))
    }

    fn post_json(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let resp = router("/chat/completions")
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_malformed_request_is_400() {
        let resp = router("/chat/completions")
            .oneshot(post_json("/chat/completions", "{\"model\":\"llama3\"}"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json_body(resp).await;
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_502() {
        let resp = router("/v1/chat/completions")
            .oneshot(post_json("/v1/chat/completions", "{\"messages\":[]}"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(resp).await;
        assert_eq!(body["error"]["type"], "backend_unreachable");
    }

    #[tokio::test]
    async fn test_route_is_configurable() {
        let resp = router("/v1/chat/completions")
            .oneshot(post_json("/chat/completions", "{\"messages\":[]}"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
