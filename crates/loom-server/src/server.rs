use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use loom_engine::ResponseCode;

use crate::handlers::HandlerState;
use crate::rpc::{RpcRequest, RpcResponse};

/// Server configuration.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9191,
            request_timeout_secs: 600,
        }
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &loom_settings::ServerSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            request_timeout_secs: settings.request_timeout_secs,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler_state: Arc<HandlerState>,
    pub request_timeout: Duration,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/rpc", post(rpc_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve in the background. Cancelling `shutdown` stops accepting
/// connections and aborts in-flight turns.
pub async fn start(
    config: ServerConfig,
    handler_state: Arc<HandlerState>,
    shutdown: CancellationToken,
) -> Result<ServerHandle, std::io::Error> {
    let app_state = AppState {
        handler_state: Arc::clone(&handler_state),
        request_timeout: Duration::from_secs(config.request_timeout_secs),
    };

    let router = build_router(app_state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), host = %config.host, "Loom server started");

    let server_handle = tokio::spawn(async move {
        let graceful = shutdown.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { graceful.cancelled().await })
            .await
            .ok();
        let aborted = handler_state.sessions.abort_all();
        tracing::info!(aborted, "Loom server stopped");
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        server: server_handle,
    })
}

/// Handle returned by `start()`; keeps the server task alive.
pub struct ServerHandle {
    pub port: u16,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Wait for the server to finish after shutdown was requested.
    pub async fn join(self) {
        let _ = self.server.await;
    }
}

/// POST /rpc: one JSON-RPC request per body.
async fn rpc_handler(State(state): State<AppState>, body: String) -> impl IntoResponse {
    let request: RpcRequest = match serde_json::from_str(&body) {
        Ok(req) => req,
        Err(_) => return Json(RpcResponse::parse_error()),
    };

    let params = request.params.unwrap_or(serde_json::json!({}));
    let id = request.id;
    let dispatched = crate::handlers::dispatch(&state.handler_state, &request.method, &params, id.clone());
    match tokio::time::timeout(state.request_timeout, dispatched).await {
        Ok(response) => Json(response),
        Err(_) => {
            tracing::warn!(method = %request.method, "request timed out");
            Json(RpcResponse::error(
                id,
                ResponseCode::TurnTimeout,
                format!("Request exceeded {}s", state.request_timeout.as_secs()),
            ))
        }
    }
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let resp = crate::handlers::dispatch(
        &state.handler_state,
        "health",
        &serde_json::json!({}),
        None,
    )
    .await;

    let status = resp
        .result
        .as_ref()
        .and_then(|r| r.get("status"))
        .and_then(|s| s.as_str())
        .unwrap_or("unknown");

    let http_status = if status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (http_status, Json(resp.result.unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_llm::ScriptedResponse;
    use serde_json::json;

    async fn spawn(replies: Vec<ScriptedResponse>) -> (ServerHandle, CancellationToken) {
        let state = crate::handlers::tests::setup(replies);
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        let shutdown = CancellationToken::new();
        let handle = start(config, state, shutdown.clone()).await.unwrap();
        (handle, shutdown)
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let (handle, shutdown) = spawn(vec![]).await;
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");

        shutdown.cancel();
        handle.join().await;
    }

    #[tokio::test]
    async fn rpc_over_http() {
        let (handle, shutdown) = spawn(vec![ScriptedResponse::json(
            json!({"user_message": "On it", "ask_human": true}),
        )])
        .await;
        let url = format!("http://127.0.0.1:{}/rpc", handle.port);
        let client = reqwest::Client::new();

        let created: serde_json::Value = client
            .post(&url)
            .json(&json!({"method": "graph.create", "params": {"objective": "demo", "name": "d"}, "id": 1}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(created["id"], 1);
        assert_eq!(created["result"]["graph_id"], "d");

        let replied: serde_json::Value = client
            .post(&url)
            .json(&json!({"method": "graph.message", "params": {"graph_id": "d", "text": "go"}, "id": 2}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(replied["success"], true);
        assert_eq!(replied["result"]["replies"][0]["text"], "On it");

        let garbage: serde_json::Value = client
            .post(&url)
            .body("{not json")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(garbage["success"], false);
        assert_eq!(garbage["error"]["code"], "invalid_params");

        shutdown.cancel();
        handle.join().await;
    }
}
