use super::dispatcher::Dispatcher;
use super::protocol::*;
use crate::error::DispatchError;
use crate::executor::types::TaskRecord;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Builds the public router around a shared dispatcher.
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route(ENDPOINT_ROOT, get(handle_root))
        .route(ENDPOINT_SCRAPE, post(handle_scrape))
        .route(ENDPOINT_RESULTS, get(handle_get_result))
        .layer(Extension(dispatcher))
}

pub async fn handle_root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: API_RUNNING_MESSAGE.to_string(),
    })
}

pub async fn handle_scrape(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Json(req): Json<ScrapeRequest>,
) -> Result<(StatusCode, Json<ScrapeResponse>), ApiError> {
    let task_id = dispatcher
        .enqueue_task(&req.tax_id)
        .await
        .map_err(error_response)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ScrapeResponse {
            task_id,
            status: "pending".to_string(),
            message: TASK_CREATED_MESSAGE.to_string(),
        }),
    ))
}

pub async fn handle_get_result(
    Extension(dispatcher): Extension<Arc<Dispatcher>>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskRecord>, ApiError> {
    let record = dispatcher.get_task(&task_id).await.map_err(error_response)?;

    tracing::debug!("Task status query: {} -> {:?}", task_id, record.status);
    Ok(Json(record))
}

fn error_response(err: DispatchError) -> ApiError {
    let status = match &err {
        DispatchError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
        DispatchError::Store(_) | DispatchError::Queue(_) => {
            tracing::error!("Request failed: {}", err);
            StatusCode::SERVICE_UNAVAILABLE
        }
    };

    (
        status,
        Json(ErrorResponse {
            detail: err.to_string(),
        }),
    )
}
