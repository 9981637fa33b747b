//! HTTP handlers for the survey statistics API
//!
//! One submission endpoint per task kind, result retrieval by job id,
//! job listings, graceful shutdown, and the usual health/metrics pair.
//! Submission responses always carry HTTP 200; acceptance or rejection
//! is encoded in the JSON envelope so clients switch on the `status`
//! field, not on HTTP status codes.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Json, Response},
};
use prometheus::TextEncoder;
use serde::Serialize;
use serde_json::json;
use serde_json::value::RawValue;
use std::sync::Arc;
use tracing::{error, info, warn};

use surveystats_core::{StatsError, TaskKind, TaskSubmission, SHUTDOWN_MESSAGE};

use crate::coordinator::JobLookup;
use crate::AppState;

/// Envelope for a finished job. `data` embeds the persisted artifact
/// verbatim so its key order survives the trip to the client.
#[derive(Serialize)]
struct DoneEnvelope {
    status: &'static str,
    data: Box<RawValue>,
}

pub async fn states_mean_handler(
    State(state): State<AppState>,
    Json(submission): Json<TaskSubmission>,
) -> Response {
    submit_job(&state, TaskKind::StatesMean, submission)
}

pub async fn state_mean_handler(
    State(state): State<AppState>,
    Json(submission): Json<TaskSubmission>,
) -> Response {
    submit_job(&state, TaskKind::StateMean, submission)
}

pub async fn best5_handler(
    State(state): State<AppState>,
    Json(submission): Json<TaskSubmission>,
) -> Response {
    submit_job(&state, TaskKind::Best5, submission)
}

pub async fn worst5_handler(
    State(state): State<AppState>,
    Json(submission): Json<TaskSubmission>,
) -> Response {
    submit_job(&state, TaskKind::Worst5, submission)
}

pub async fn global_mean_handler(
    State(state): State<AppState>,
    Json(submission): Json<TaskSubmission>,
) -> Response {
    submit_job(&state, TaskKind::GlobalMean, submission)
}

pub async fn diff_from_mean_handler(
    State(state): State<AppState>,
    Json(submission): Json<TaskSubmission>,
) -> Response {
    submit_job(&state, TaskKind::DiffFromMean, submission)
}

pub async fn state_diff_from_mean_handler(
    State(state): State<AppState>,
    Json(submission): Json<TaskSubmission>,
) -> Response {
    submit_job(&state, TaskKind::StateDiffFromMean, submission)
}

pub async fn mean_by_category_handler(
    State(state): State<AppState>,
    Json(submission): Json<TaskSubmission>,
) -> Response {
    submit_job(&state, TaskKind::MeanByCategory, submission)
}

pub async fn state_mean_by_category_handler(
    State(state): State<AppState>,
    Json(submission): Json<TaskSubmission>,
) -> Response {
    submit_job(&state, TaskKind::StateMeanByCategory, submission)
}

/// Shared submission path for all nine task endpoints
fn submit_job(state: &AppState, kind: TaskKind, submission: TaskSubmission) -> Response {
    state.coordinator.metrics().submit_requests.inc();

    match state.coordinator.submit(kind, submission) {
        Ok(job_id) => {
            info!("Accepted {} job {}", kind, job_id);
            Json(json!({
                "message": "Received data successfully",
                "status": "success",
                "job_id": job_id
            }))
            .into_response()
        }
        Err(StatsError::ShuttingDown) => {
            info!("Rejected {} submission, server is shutting down", kind);
            Json(json!({
                "job_id": -1,
                "reason": SHUTDOWN_MESSAGE
            }))
            .into_response()
        }
        Err(err) => {
            warn!("Rejected {} submission: {}", kind, err);
            Json(json!({
                "status": "error",
                "job_id": -1,
                "reason": err.public_reason()
            }))
            .into_response()
        }
    }
}

/// Result retrieval by job id
pub async fn get_results_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Response {
    state.coordinator.metrics().result_requests.inc();

    let parsed: i64 = match job_id.parse() {
        Ok(id) => id,
        Err(_) => {
            info!("Rejected result query for unparseable job id {:?}", job_id);
            return invalid_job_id();
        }
    };

    match state.coordinator.find_job(parsed) {
        JobLookup::InvalidId => {
            info!("Rejected result query for unknown job id {}", parsed);
            invalid_job_id()
        }
        JobLookup::Running => Json(json!({"status": "running"})).into_response(),
        JobLookup::Done { payload } => match RawValue::from_string(payload) {
            Ok(data) => Json(DoneEnvelope {
                status: "done",
                data,
            })
            .into_response(),
            Err(err) => {
                error!("Stored result for job {} is not valid JSON: {}", parsed, err);
                Json(json!({
                    "status": "error",
                    "reason": "Result artifact unavailable"
                }))
                .into_response()
            }
        },
        JobLookup::Failed { reason } => {
            Json(json!({"status": "error", "reason": reason})).into_response()
        }
    }
}

fn invalid_job_id() -> Response {
    Json(json!({"status": "error", "reason": "Invalid job_id"})).into_response()
}

/// Status of every job this run has accepted, ascending by id
pub async fn jobs_handler(State(state): State<AppState>) -> Response {
    state.coordinator.metrics().control_requests.inc();

    let entries: Vec<serde_json::Value> = state
        .coordinator
        .job_statuses()
        .into_iter()
        .map(|(job_id, status)| {
            let mut entry = serde_json::Map::new();
            entry.insert(format!("job_id_{job_id}"), json!(status.as_str()));
            serde_json::Value::Object(entry)
        })
        .collect();

    Json(json!({"status": "done", "data": entries})).into_response()
}

/// Count of jobs still running, as a bare integer
pub async fn num_jobs_handler(State(state): State<AppState>) -> Response {
    state.coordinator.metrics().control_requests.inc();
    Json(state.coordinator.running_count()).into_response()
}

/// Drain the pool and reply once every job has settled
pub async fn graceful_shutdown_handler(State(state): State<AppState>) -> Response {
    state.coordinator.metrics().control_requests.inc();
    info!("Graceful shutdown requested over HTTP");

    Arc::clone(&state.coordinator).shutdown().await;

    Json(json!({"status": "success"})).into_response()
}

/// Service liveness summary
pub async fn health_handler(State(state): State<AppState>) -> Response {
    let dataset = state.coordinator.dataset();
    let response = json!({
        "status": if state.coordinator.is_accepting() { "healthy" } else { "shutting_down" },
        "service": "surveystats-server",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "dataset": {
            "questions": dataset.question_count(),
            "states": dataset.state_count(),
            "records": dataset.record_count(),
        },
        "jobs": state.coordinator.stats_snapshot(),
        "workers": state.coordinator.worker_count(),
    });

    Json(response).into_response()
}

/// Metrics endpoint (Prometheus format)
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    match encoder.encode_to_string(&metric_families) {
        Ok(metrics_string) => {
            let mut headers = HeaderMap::new();
            headers.insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            (StatusCode::OK, headers, metrics_string)
        }
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                HeaderMap::new(),
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Landing page listing the defined routes
pub async fn index_handler() -> Html<String> {
    let mut page = String::from(
        "<h1>Survey statistics API</h1>\n\
         <p>Interact with the server using one of the defined routes:</p>\n",
    );
    for kind in TaskKind::ALL {
        page.push_str(&format!("<p>POST /api/{}</p>\n", kind));
    }
    for route in [
        "GET /api/get_results/{job_id}",
        "GET /api/jobs",
        "GET /api/num_jobs",
        "GET /api/graceful_shutdown",
        "GET /health",
        "GET /metrics",
    ] {
        page.push_str(&format!("<p>{}</p>\n", route));
    }
    Html(page)
}
