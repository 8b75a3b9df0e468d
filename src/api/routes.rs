//! API route definitions.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};

use super::state::AppState;
use crate::exec::{ExecError, JobEvent};
use crate::params::BenchParams;
use crate::precheck;

type ApiError = (StatusCode, Json<Value>);

fn error_body(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/bench/defaults", get(bench_defaults))
        .route("/bench/run", post(bench_run))
        .route("/bench/run-stream", post(bench_run_stream))
        .route("/bench/stop", post(bench_stop))
        .route("/bench/precheck", get(bench_precheck))
        .route("/hosts", get(list_hostlists))
        .route(
            "/hosts/{name}",
            get(get_hostlist).put(put_hostlist).delete(delete_hostlist),
        )
}

pub(super) async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn bench_defaults() -> Json<BenchParams> {
    Json(BenchParams::default())
}

/// Resolve the hostfile a run request refers to, or reject the request.
fn resolve_hostfile(
    state: &AppState,
    params: &BenchParams,
) -> Result<std::path::PathBuf, ApiError> {
    let name = params
        .hostlist
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| error_body(StatusCode::BAD_REQUEST, "hostlist is required"))?;
    let path = state
        .hostlists
        .path(name)
        .map_err(|e| error_body(StatusCode::BAD_REQUEST, e.to_string()))?;
    if !path.exists() {
        return Err(error_body(
            StatusCode::BAD_REQUEST,
            format!("unknown host list: {name}"),
        ));
    }
    Ok(path)
}

fn exec_error(err: ExecError) -> ApiError {
    match err {
        ExecError::Busy => error_body(StatusCode::CONFLICT, err.to_string()),
        ExecError::Spawn(_) => error_body(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn bench_run(
    State(state): State<AppState>,
    Json(params): Json<BenchParams>,
) -> Result<impl IntoResponse, ApiError> {
    let hostfile = resolve_hostfile(&state, &params)?;
    let response = state
        .runner
        .run_blocking(&params, &hostfile)
        .await
        .map_err(exec_error)?;
    Ok(Json(response))
}

async fn bench_run_stream(
    State(state): State<AppState>,
    Json(params): Json<BenchParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let hostfile = resolve_hostfile(&state, &params)?;
    let rx = state
        .runner
        .spawn_stream(&params, &hostfile)
        .map_err(exec_error)?;

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (encode_event(event), rx))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Map a job event onto the wire protocol. Commands and error details go
/// out as JSON so multi-line text survives as a single frame.
fn encode_event(event: JobEvent) -> Result<Event, axum::Error> {
    match event {
        JobEvent::Command(cmd) => Event::default().event("command").json_data(cmd),
        JobEvent::Output(line) => Ok(Event::default().event("output").data(line)),
        JobEvent::Done => Ok(Event::default().event("done").data("benchmark completed")),
        JobEvent::Failed(message) => Event::default()
            .event("error")
            .json_data(json!({ "message": message })),
    }
}

async fn bench_stop(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.runner.stop().await)
}

#[derive(Debug, Deserialize)]
struct PrecheckQuery {
    hostlist: Option<String>,
}

async fn bench_precheck(
    State(state): State<AppState>,
    Query(query): Query<PrecheckQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let name = query
        .hostlist
        .as_deref()
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| error_body(StatusCode::BAD_REQUEST, "hostlist parameter is required"))?;
    let hosts = state
        .hostlists
        .read(name)
        .map_err(|e| error_body(StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(Json(precheck::precheck_hosts(&hosts).await))
}

async fn list_hostlists(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let entries = state
        .hostlists
        .list()
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(json!({ "count": entries.len(), "files": entries })))
}

async fn get_hostlist(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let hosts = state
        .hostlists
        .read(&name)
        .map_err(|e| error_body(StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(Json(json!({ "count": hosts.len(), "hosts": hosts })))
}

#[derive(Debug, Deserialize)]
struct HostsBody {
    hosts: Vec<String>,
}

async fn put_hostlist(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<HostsBody>,
) -> Result<impl IntoResponse, ApiError> {
    if body.hosts.iter().all(|h| h.trim().is_empty()) {
        return Err(error_body(
            StatusCode::BAD_REQUEST,
            "at least one host address is required",
        ));
    }
    state
        .hostlists
        .path(&name)
        .map_err(|e| error_body(StatusCode::BAD_REQUEST, e.to_string()))?;
    state
        .hostlists
        .write(&name, &body.hosts)
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let hosts = state
        .hostlists
        .read(&name)
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(json!({ "count": hosts.len(), "hosts": hosts })))
}

async fn delete_hostlist(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .hostlists
        .delete(&name)
        .map_err(|e| error_body(StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(Json(json!({ "status": "ok" })))
}
