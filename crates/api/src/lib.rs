//! `api` crate — HTTP control surface over a [`WorkflowEngine`].
//!
//! Routes (all JSON):
//!   POST   /api/v1/graphs                 register a graph definition
//!   GET    /api/v1/graphs
//!   GET    /api/v1/graphs/:name
//!   POST   /api/v1/graphs/:name/runs      start a run → 202 { run_id }
//!   GET    /api/v1/runs/:id
//!   POST   /api/v1/runs/:id/cancel
//!   GET    /api/v1/runs/:id/history

pub mod error;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use engine::WorkflowEngine;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
}

impl AppState {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }
}

/// Build the complete API router with its middleware.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/graphs", get(handlers::graphs::list).post(handlers::graphs::create))
        .route("/graphs/:name", get(handlers::graphs::get))
        .route("/graphs/:name/runs", post(handlers::runs::start))
        .route("/runs/:id", get(handlers::runs::status))
        .route("/runs/:id/cancel", post(handlers::runs::cancel))
        .route("/runs/:id/history", get(handlers::runs::history));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(state)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use capabilities::builtin::register_builtins;
    use capabilities::CapabilityRegistry;
    use engine::RunStatus;

    fn app() -> (Router, Arc<WorkflowEngine>) {
        let mut registry = CapabilityRegistry::new();
        register_builtins(&mut registry);
        let engine = Arc::new(WorkflowEngine::new(registry));
        (router(AppState::new(engine.clone())), engine)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    fn echo_graph() -> Value {
        json!({
            "name": "greet",
            "start": "Hello",
            "steps": [
                { "name": "Hello", "type": "task", "capability": "echo", "result_path": "$.echoed", "next": "Done" },
                { "name": "Done", "type": "pass", "value": { "done": true } }
            ]
        })
    }

    #[tokio::test]
    async fn register_start_and_inspect_a_run() {
        let (app, engine) = app();

        let (status, body) = send(&app, Method::POST, "/api/v1/graphs", Some(echo_graph())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["name"], "greet");
        assert_eq!(body["terminal_steps"], json!(["Done"]));

        let (status, body) = send(&app, Method::GET, "/api/v1/graphs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/graphs/greet/runs",
            Some(json!({ "input": { "who": "front desk" } })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let run_id: uuid::Uuid = serde_json::from_value(body["run_id"].clone()).unwrap();

        assert_eq!(engine.wait(run_id).await.unwrap().status, RunStatus::Succeeded);

        let (status, body) = send(&app, Method::GET, &format!("/api/v1/runs/{run_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "succeeded");
        assert_eq!(body["data"]["echoed"], json!({ "who": "front desk" }));
        assert_eq!(body["data"]["done"], true);

        let (status, body) = send(&app, Method::GET, &format!("/api/v1/runs/{run_id}/history"), None).await;
        assert_eq!(status, StatusCode::OK);
        let kinds: Vec<&str> = body.as_array().unwrap().iter().map(|e| e["kind"].as_str().unwrap()).collect();
        assert_eq!(kinds, ["run_started", "step_succeeded", "step_succeeded", "run_succeeded"]);
    }

    #[tokio::test]
    async fn invalid_graph_is_a_bad_request() {
        let (app, _) = app();
        let mut graph = echo_graph();
        graph["steps"][0]["next"] = json!("Nowhere");

        let (status, body) = send(&app, Method::POST, "/api/v1/graphs", Some(graph)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "INVALID_GRAPH");
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let (app, _) = app();
        let stranger = uuid::Uuid::new_v4();

        let (status, _) = send(&app, Method::GET, &format!("/api/v1/runs/{stranger}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Method::POST, &format!("/api/v1/runs/{stranger}/cancel"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body) = send(&app, Method::POST, "/api/v1/graphs/missing/runs", Some(json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "GRAPH_NOT_FOUND");
        let (status, _) = send(&app, Method::GET, "/api/v1/graphs/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_a_waiting_run() {
        let (app, engine) = app();
        let graph = json!({
            "name": "hold",
            "start": "Hold",
            "steps": [{ "name": "Hold", "type": "wait", "seconds": 300 }]
        });
        send(&app, Method::POST, "/api/v1/graphs", Some(graph)).await;

        let (_, body) = send(&app, Method::POST, "/api/v1/graphs/hold/runs", Some(json!({ "deadline_secs": 900 }))).await;
        let run_id: uuid::Uuid = serde_json::from_value(body["run_id"].clone()).unwrap();

        let (status, _) = send(&app, Method::POST, &format!("/api/v1/runs/{run_id}/cancel"), None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(engine.wait(run_id).await.unwrap().status, RunStatus::Cancelled);
    }
}
