use std::str::FromStr;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use common::{
    CancelSummary, Error, GridParams, RunState, RunStatus, StrategyParams, StrategyRun, TwapParams,
};

use super::ApiError;
use crate::AppState;

pub fn runs_router() -> Router<AppState> {
    Router::new()
        .route("/api/runs", get(list_runs).post(start_run))
        .route("/api/runs/twap", post(start_twap))
        .route("/api/runs/grid", post(start_grid))
        .route("/api/runs/:run_id", get(get_run))
        .route("/api/runs/:run_id/cancel", post(cancel_run))
}

async fn start(state: &AppState, params: StrategyParams) -> Result<(StatusCode, Json<Value>), ApiError> {
    let run_id = state.handle.scheduler().start(params).await?;
    Ok((StatusCode::CREATED, Json(json!({ "run_id": run_id }))))
}

async fn start_twap(
    State(state): State<AppState>,
    payload: Result<Json<TwapParams>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(params) = payload?;
    start(&state, StrategyParams::Twap(params)).await
}

async fn start_grid(
    State(state): State<AppState>,
    payload: Result<Json<GridParams>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(params) = payload?;
    start(&state, StrategyParams::Grid(params)).await
}

/// Kind-tagged body, as written in strategy files.
async fn start_run(
    State(state): State<AppState>,
    payload: Result<Json<StrategyParams>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(params) = payload?;
    start(&state, params).await
}

#[derive(Deserialize)]
struct ListQuery {
    state: Option<String>,
}

async fn list_runs(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<StrategyRun>>, ApiError> {
    let Query(q) = query?;
    let filter = q
        .state
        .as_deref()
        .map(RunState::from_str)
        .transpose()
        .map_err(Error::invalid)?;
    Ok(Json(state.handle.scheduler().list(filter).await?))
}

async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunStatus>, ApiError> {
    Ok(Json(state.handle.scheduler().status(&run_id).await?))
}

async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<CancelSummary>, ApiError> {
    Ok(Json(state.handle.scheduler().cancel(&run_id).await?))
}
