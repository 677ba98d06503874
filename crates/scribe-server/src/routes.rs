//! HTTP routes for the Scribe server.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    response::Json,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use crate::error::ServerResult;
use crate::protocol::{Ack, EvalRequest, NotebookEvent, StatusResponse, StopRequest};
use crate::supervisor::Supervisor;

/// Application state shared across handlers.
pub struct AppState {
    pub supervisor: Supervisor,
}

/// Create the router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/eval", post(eval_handler))
        .route("/api/stop", post(stop_handler))
        .route("/api/messages/{notebook_id}", get(messages_handler))
        .route("/api/status", get(status_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check handler.
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Start evaluating a notebook.
async fn eval_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EvalRequest>,
) -> ServerResult<Json<Ack>> {
    tracing::debug!(
        "Eval request {:?} for {}",
        request.command,
        request.notebook_id
    );
    state.supervisor.start(request).await?;
    Ok(Json(Ack::ok()))
}

/// Stop an evaluation; always succeeds.
async fn stop_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StopRequest>,
) -> Json<Ack> {
    state.supervisor.stop(&request.notebook_id).await;
    Json(Ack::ok())
}

/// Drain the events queued for a notebook.
async fn messages_handler(
    State(state): State<Arc<AppState>>,
    Path(notebook_id): Path<String>,
) -> Json<Vec<NotebookEvent>> {
    Json(state.supervisor.pull_messages(&notebook_id).await)
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(state.supervisor.status().await)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::supervisor::SupervisorConfig;

    fn router() -> Router {
        create_router(Arc::new(AppState {
            supervisor: Supervisor::new(SupervisorConfig {
                worker_path: Some(PathBuf::from("/nonexistent/scribe-worker")),
                ..SupervisorConfig::default()
            }),
        }))
    }

    async fn send(request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, body)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_status_starts_empty() {
        let (status, body) = send(Request::get("/api/status").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "count": 0, "notebooks": [] }));
    }

    #[tokio::test]
    async fn test_messages_for_unknown_notebook() {
        let (status, body) =
            send(Request::get("/api/messages/nobody").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_stop_unknown_notebook_acknowledges() {
        let (status, body) =
            send(post_json("/api/stop", serde_json::json!({ "notebookId": "nb" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "ok": true }));
    }

    #[tokio::test]
    async fn test_eval_without_worker_reports_error() {
        let (status, body) = send(post_json(
            "/api/eval",
            serde_json::json!({ "command": "test-long", "notebookId": "nb" }),
        ))
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("Failed to start worker"));
    }

    #[tokio::test]
    async fn test_eval_rejects_unknown_command() {
        let (status, _) = send(post_json(
            "/api/eval",
            serde_json::json!({ "command": "format-disk", "notebookId": "nb" }),
        ))
        .await;
        assert!(status.is_client_error());
    }
}
