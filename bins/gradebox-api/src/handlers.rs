// HTTP route handlers for the Gradebox API
//
// Every operation runs on its own spawned task: if the client disconnects,
// the handler future is dropped but the run still finishes, releasing its
// pool slot and removing its container.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use gradebox_common::types::{
    ExecutionRequest, ExecutionResult, ExerciseSetupReport, ExerciseValidationResult, HintView,
    SolutionComparison, ValidationRequest,
};
use gradebox_engine::error::ServiceError;
use gradebox_engine::executor::Executor;
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::ApiError;
use crate::metrics;
use crate::AppState;

/// Run `op` detached from the request future and wait for its answer
async fn detached<T, F, Fut>(state: &AppState, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(Executor) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, ServiceError>> + Send + 'static,
{
    let executor = state.executor.clone();
    let pool = executor.pool().clone();
    let task = tokio::spawn(async move {
        let outcome = op(executor).await;
        metrics::set_slots_in_use(pool.in_use());
        outcome
    });

    match task.await {
        Ok(outcome) => outcome.map_err(ApiError::from),
        Err(e) => {
            error!(error = %e, "Request task failed");
            Err(ApiError::Internal(format!("request task failed: {}", e)))
        }
    }
}

/// POST /execute - Run a snippet once
pub async fn execute(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ExecutionRequest>, JsonRejection>,
) -> Result<Json<ExecutionResult>, ApiError> {
    let Json(request) = payload?;
    let result = detached(&state, move |executor| async move {
        executor.execute(&request).await
    })
    .await?;

    metrics::record_execution(&result);
    Ok(Json(result))
}

/// POST /validate - Grade a submission against an exercise
pub async fn validate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ValidationRequest>, JsonRejection>,
) -> Result<Json<ExerciseValidationResult>, ApiError> {
    let Json(request) = payload?;
    let result = detached(&state, move |executor| async move {
        executor.validate(&request).await
    })
    .await?;

    metrics::record_validation(&result);
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct CompareRequest {
    pub code: String,
}

/// POST /exercises/:id/compare - Grade a submission next to the reference solution
pub async fn compare(
    State(state): State<Arc<AppState>>,
    Path(exercise_id): Path<String>,
    payload: Result<Json<CompareRequest>, JsonRejection>,
) -> Result<Json<SolutionComparison>, ApiError> {
    let Json(request) = payload?;
    let comparison = detached(&state, move |executor| async move {
        executor.compare_with_solution(&exercise_id, &request.code).await
    })
    .await?;

    info!(
        exercise_id = %comparison.exercise_id,
        matches_reference = comparison.matches_reference,
        "Solution compared"
    );
    Ok(Json(comparison))
}

/// GET /exercises/:id/check - Exercise setup report
pub async fn check(
    State(state): State<Arc<AppState>>,
    Path(exercise_id): Path<String>,
) -> Result<Json<ExerciseSetupReport>, ApiError> {
    let report = detached(&state, move |executor| async move {
        executor.check_exercise(&exercise_id).await
    })
    .await?;

    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct HintQuery {
    #[serde(default)]
    pub attempts: u32,
    pub max_hints: Option<usize>,
}

/// GET /exercises/:id/hints - Hints unlocked by the attempt count
pub async fn hints(
    State(state): State<Arc<AppState>>,
    Path(exercise_id): Path<String>,
    query: Result<Query<HintQuery>, QueryRejection>,
) -> Result<Json<Vec<HintView>>, ApiError> {
    let Query(query) = query?;
    let views = state
        .executor
        .hints(&exercise_id, query.attempts, query.max_hints)
        .await?;
    Ok(Json(views))
}

/// GET /health - Liveness and pool usage
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pool = state.executor.pool();
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "slots_in_use": pool.in_use(),
            "capacity": pool.capacity(),
        })),
    )
}

/// GET /metrics - Prometheus text exposition
pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    metrics::set_slots_in_use(state.executor.pool().in_use());
    match metrics::render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
