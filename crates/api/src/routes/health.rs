use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use common::RunState;

use crate::AppState;

pub fn health_router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

/// Health check endpoint, no auth required.
async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let running = state
        .handle
        .scheduler()
        .list(Some(RunState::Running))
        .await
        .map(|runs| json!(runs.len()))
        .unwrap_or(Value::Null);
    Json(json!({
        "status": "ok",
        "mode": state.trading_mode.to_string(),
        "running_runs": running,
    }))
}
