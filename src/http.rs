//! §6.4 HTTP adapter — thin axum router. Each handler calls exactly one
//! [`Runner`] method and maps its `Result` to a status code; no business
//! logic lives here.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::logsink::Stream;
use crate::runner::{RunRequest, Runner};
use crate::schema::{ApiError, ErrorCode, RunMode};

pub fn build_router(runner: Arc<Runner>) -> Router {
    Router::new()
        .route("/run", post(submit_run))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/logs", get(get_job_logs))
        .route("/jobs/:id/cancel", post(cancel_job))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(runner)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.code {
            "SCRIPT_NOT_FOUND" | "JOB_NOT_FOUND" => StatusCode::NOT_FOUND,
            "INVALID_ARGS" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct SubmitRunBody {
    script_id: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    mode: Option<String>,
}

async fn submit_run(
    State(runner): State<Arc<Runner>>,
    Json(body): Json<SubmitRunBody>,
) -> Result<Response, ApiError> {
    let mode = match body.mode.as_deref() {
        Some("sync") => Some(RunMode::Sync),
        Some("async") => Some(RunMode::Async),
        Some(other) => {
            return Err(ApiError::new(
                ErrorCode::InvalidArgs,
                format!("unknown mode: {other}"),
            ));
        }
        None => None,
    };

    let job = runner
        .submit_run(RunRequest {
            script_id: body.script_id,
            args: body.args,
            mode,
        })
        .await?;

    let status = if job.status.is_terminal() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(job)).into_response())
}

async fn get_job(
    State(runner): State<Arc<Runner>>,
    Path(job_id): Path<String>,
) -> Result<Json<crate::schema::Job>, ApiError> {
    runner.get_job(&job_id).map(Json)
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    #[serde(default)]
    stream: Option<String>,
    #[serde(default)]
    offset: u64,
    #[serde(default = "default_limit")]
    limit: u64,
}

fn default_limit() -> u64 {
    crate::logsink::MAX_READ_LIMIT
}

async fn get_job_logs(
    State(runner): State<Arc<Runner>>,
    Path(job_id): Path<String>,
    Query(q): Query<LogsQuery>,
) -> Result<Json<crate::schema::LogPage>, ApiError> {
    let stream = Stream::parse(q.stream.as_deref().unwrap_or("stdout")).ok_or_else(|| {
        ApiError::new(
            ErrorCode::InvalidArgs,
            "stream must be \"stdout\" or \"stderr\"",
        )
    })?;
    runner
        .get_job_logs(&job_id, stream, q.offset, q.limit)
        .map(Json)
}

async fn cancel_job(
    State(runner): State<Arc<Runner>>,
    Path(job_id): Path<String>,
) -> Result<Json<crate::schema::Job>, ApiError> {
    runner.cancel_job(&job_id).await.map(Json)
}

async fn healthz() -> &'static str {
    "ok"
}
