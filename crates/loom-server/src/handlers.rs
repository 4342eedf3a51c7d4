//! RPC method handlers.

use std::path::PathBuf;
use std::sync::Arc;

use loom_core::ids::GraphId;
use loom_engine::persistence::{load_graph, save_graph};
use loom_engine::{EngineError, Orchestrator};
use loom_store::{Database, GraphRepo, GraphStatus, StoreError};
use loom_telemetry::{LogQuery, TelemetryGuard};

use crate::rpc::{self, RpcResponse};
use crate::sessions::SessionManager;

/// Shared state available to all RPC handlers.
pub struct HandlerState {
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: SessionManager,
    pub db: Database,
    pub graphs: GraphRepo,
    pub telemetry: Option<Arc<TelemetryGuard>>,
    /// Source for `agents.reload`.
    pub agents_file: Option<PathBuf>,
}

impl HandlerState {
    pub fn new(orchestrator: Arc<Orchestrator>, db: Database) -> Self {
        Self {
            orchestrator,
            sessions: SessionManager::new(),
            graphs: GraphRepo::new(db.clone()),
            db,
            telemetry: None,
            agents_file: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryGuard>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_agents_file(mut self, path: PathBuf) -> Self {
        self.agents_file = Some(path);
        self
    }
}

/// Dispatch an RPC method to the appropriate handler.
pub async fn dispatch(
    state: &Arc<HandlerState>,
    method: &str,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    match method {
        // Graph lifecycle
        "graph.create" => graph_create(state, params, id),
        "graph.message" => graph_message(state, params, id).await,
        "graph.state" => graph_state(state, params, id),
        "graph.save" => graph_save(state, params, id).await,
        "graph.load" => graph_load(state, params, id),
        "graph.abandon" => graph_abandon(state, params, id),
        "graph.list" => graph_list(state, params, id),
        "graph.archive" => graph_archive(state, params, id).await,

        "agents.list" => agents_list(state, id),
        "agents.reload" => agents_reload(state, id),
        "logs.query" => logs_query(state, params, id),

        "system.ping" => RpcResponse::success(id, serde_json::json!({"pong": true})),
        "health" => health(state, id),

        _ => RpcResponse::method_not_found(id, method),
    }
}

fn graph_id_param(params: &serde_json::Value) -> Result<GraphId, String> {
    rpc::require_str(params, "graph_id").map(GraphId::from_raw)
}

fn graph_create(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let objective = match rpc::require_str(params, "objective") {
        Ok(o) => o,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let name = rpc::optional_str(params, "name").filter(|n| !n.trim().is_empty());

    if let Some(name) = name {
        let taken = state.sessions.contains(&GraphId::from_raw(name))
            || state.graphs.exists(name).unwrap_or(false);
        if taken {
            return RpcResponse::invalid_params(id, format!("Graph already exists: {name}"));
        }
    }

    let session = match state.orchestrator.create_session(objective, name) {
        Ok(s) => s,
        Err(e) => return RpcResponse::from_engine_error(id, &e),
    };
    let graph_id = session.id.clone();
    match state.sessions.insert(session) {
        Ok(_) => RpcResponse::success(id, serde_json::json!({"graph_id": graph_id})),
        Err(_) => RpcResponse::invalid_params(id, format!("Graph already exists: {graph_id}")),
    }
}

async fn graph_message(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let graph_id = match graph_id_param(params) {
        Ok(g) => g,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let text = match rpc::require_str(params, "text") {
        Ok(t) => t,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let Some(slot) = state.sessions.get(&graph_id) else {
        return RpcResponse::not_found(id, format!("Graph not loaded: {graph_id}"));
    };

    let mut session = slot.session().lock().await;
    if !slot.begin_turn(&mut session) {
        return RpcResponse::not_found(id, format!("Graph was abandoned: {graph_id}"));
    }
    let result = state.orchestrator.post_message(&mut session, text).await;
    slot.end_turn(&session);

    match result {
        Ok(report) => match serde_json::to_value(&report) {
            Ok(value) => RpcResponse::success(id, value),
            Err(e) => RpcResponse::internal_error(id, e.to_string()),
        },
        Err(failure) => {
            tracing::warn!(graph_id = %graph_id, error = %failure.error, "turn failed");
            let data = serde_json::json!({
                "report": failure.report,
                "state": session.snapshot(),
            });
            RpcResponse::from_engine_error(id, &failure.error).with_data(data)
        }
    }
}

fn graph_state(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let graph_id = match graph_id_param(params) {
        Ok(g) => g,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    match state.sessions.get(&graph_id) {
        Some(slot) => match serde_json::to_value(slot.snapshot()) {
            Ok(value) => RpcResponse::success(id, value),
            Err(e) => RpcResponse::internal_error(id, e.to_string()),
        },
        None => RpcResponse::not_found(id, format!("Graph not loaded: {graph_id}")),
    }
}

async fn graph_save(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let graph_id = match graph_id_param(params) {
        Ok(g) => g,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let Some(slot) = state.sessions.get(&graph_id) else {
        return RpcResponse::not_found(id, format!("Graph not loaded: {graph_id}"));
    };
    let session = slot.session().lock().await;
    match save_graph(&state.graphs, &session.graph) {
        Ok(()) => RpcResponse::success(id, serde_json::json!({"graph_id": graph_id, "saved": true})),
        Err(e) => RpcResponse::from_engine_error(id, &e),
    }
}

fn graph_load(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let graph_id = match graph_id_param(params) {
        Ok(g) => g,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    // Already in memory: report it as is.
    if let Some(slot) = state.sessions.get(&graph_id) {
        return snapshot_response(id, &slot.snapshot());
    }

    let orchestrator = &state.orchestrator;
    let graph = match load_graph(
        &state.graphs,
        graph_id.as_str(),
        orchestrator.predicates().clone(),
    ) {
        Ok(g) => g,
        Err(e) => return RpcResponse::from_engine_error(id, &e),
    };
    let session = orchestrator.resume(graph);
    let snapshot = session.snapshot();
    match state.sessions.insert(session) {
        Ok(_) => {
            tracing::info!(graph_id = %graph_id, "graph loaded");
            snapshot_response(id, &snapshot)
        }
        Err(_) => RpcResponse::invalid_params(id, format!("Graph already loaded: {graph_id}")),
    }
}

fn snapshot_response(id: Option<serde_json::Value>, snapshot: &loom_engine::GraphState) -> RpcResponse {
    match serde_json::to_value(snapshot) {
        Ok(value) => RpcResponse::success(id, value),
        Err(e) => RpcResponse::internal_error(id, e.to_string()),
    }
}

fn graph_abandon(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let graph_id = match graph_id_param(params) {
        Ok(g) => g,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    if state.sessions.abandon(&graph_id) {
        tracing::info!(graph_id = %graph_id, "graph abandoned");
        RpcResponse::success(id, serde_json::json!({"graph_id": graph_id, "abandoned": true}))
    } else {
        RpcResponse::not_found(id, format!("Graph not loaded: {graph_id}"))
    }
}

fn graph_list(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let status = match rpc::optional_str(params, "status").map(str::parse::<GraphStatus>) {
        None => None,
        Some(Ok(s)) => Some(s),
        Some(Err(e)) => return RpcResponse::invalid_params(id, e),
    };
    let summaries = match state.graphs.list(status) {
        Ok(s) => s,
        Err(e) => return RpcResponse::from_engine_error(id, &EngineError::from(e)),
    };
    let loaded: Vec<GraphId> = state.sessions.ids();
    let graphs: Vec<serde_json::Value> = summaries
        .iter()
        .map(|s| {
            let mut value = serde_json::to_value(s).unwrap_or_default();
            value["loaded"] = serde_json::json!(loaded.iter().any(|g| g.as_str() == s.name));
            value
        })
        .collect();
    RpcResponse::success(id, serde_json::json!({"graphs": graphs, "loaded": loaded}))
}

async fn graph_archive(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let graph_id = match graph_id_param(params) {
        Ok(g) => g,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    if let Some(slot) = state.sessions.remove(&graph_id) {
        slot.release();
        let session = slot.session().lock().await;
        if let Err(e) = save_graph(&state.graphs, &session.graph) {
            return RpcResponse::from_engine_error(id, &e);
        }
    }
    match state.graphs.archive(graph_id.as_str()) {
        Ok(()) => RpcResponse::success(id, serde_json::json!({"graph_id": graph_id, "archived": true})),
        Err(StoreError::NotFound(msg)) => RpcResponse::not_found(id, msg),
        Err(e) => RpcResponse::internal_error(id, e.to_string()),
    }
}

fn agents_list(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    let agents = state.orchestrator.catalog().list();
    RpcResponse::success(id, serde_json::json!({"agents": agents}))
}

fn agents_reload(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    let Some(path) = state.agents_file.as_deref() else {
        return RpcResponse::invalid_params(id, "No agents file configured");
    };
    match state.orchestrator.reload_agents(path) {
        Ok(count) => RpcResponse::success(id, serde_json::json!({"agents": count})),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "agent reload rejected");
            RpcResponse::from_engine_error(id, &e)
        }
    }
}

fn logs_query(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let Some(log_sink) = state.telemetry.as_ref().and_then(|t| t.logs()) else {
        return RpcResponse::success(
            id,
            serde_json::json!({"logs": [], "note": "Log persistence not enabled"}),
        );
    };

    let query = LogQuery {
        level: rpc::optional_str(params, "level").map(String::from),
        target: rpc::optional_str(params, "target").map(String::from),
        graph_id: rpc::optional_str(params, "graph_id").map(String::from),
        since: rpc::optional_str(params, "since").map(String::from),
        limit: params
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|l| l.min(1000) as u32),
    };
    match log_sink.query(&query) {
        Ok(records) => RpcResponse::success(id, serde_json::json!({"logs": records})),
        Err(e) => RpcResponse::internal_error(id, format!("Failed to query logs: {e}")),
    }
}

fn health(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    let db_ok = state
        .db
        .with_conn(|conn| {
            conn.execute_batch("SELECT 1")?;
            Ok(true)
        })
        .unwrap_or(false);

    RpcResponse::success(
        id,
        serde_json::json!({
            "status": if db_ok { "healthy" } else { "degraded" },
            "components": {
                "database": if db_ok { "ok" } else { "error" },
            },
            "graphs_loaded": state.sessions.len(),
            "agents": state.orchestrator.catalog().len(),
        }),
    )
}
