//! HTTP admission and lookup endpoints, served next to the poller

pub mod client;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::{Future, IntoFuture};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use crate::core::store::{StoreError, TaskStore};
use crate::core::task::{Task, TaskId};
use crate::worker::Poller;

pub use client::TaskClient;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("bad request: {0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(StoreError::NotFound) => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::Conflict { .. })
            | ApiError::Store(StoreError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn TaskStore>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    pub idempotency_key: String,
}

pub fn create_routes(store: Arc<dyn TaskStore>) -> Router {
    Router::new()
        .route("/quotes/{code}", get(get_latest))
        .route("/quotes/{code}/task", post(create_task))
        .route("/quotes/{code}/task/{id}", get(get_task))
        .with_state(ApiState { store })
}

/// Admits a task. Repeating the request with the same key returns the task
/// admitted first.
async fn create_task(
    State(state): State<ApiState>,
    Path(code): Path<String>,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<Json<Task>> {
    if request.idempotency_key.trim().is_empty() {
        return Err(ApiError::BadRequest("idempotency_key must not be empty".into()));
    }
    info!(code, idempotency_key = %request.idempotency_key, "Task requested");
    let task = state
        .store
        .insert_task(&code, &request.idempotency_key)
        .await?;
    Ok(Json(task))
}

async fn get_task(
    State(state): State<ApiState>,
    Path((code, id)): Path<(String, TaskId)>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.store.get_task(&code, id).await?))
}

async fn get_latest(
    State(state): State<ApiState>,
    Path(code): Path<String>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.store.get_last_successful_task(&code).await?))
}

async fn stopped(mut signal: watch::Receiver<bool>) {
    // A dropped sender also counts as a stop
    let _ = signal.wait_for(|stop| *stop).await;
}

/// Serves the endpoints on `listener` and runs `poller` in the same process
/// until `shutdown` resolves. Both share `store`, so tasks admitted here are
/// seen by the next poll cycle.
pub async fn serve<S>(
    listener: TcpListener,
    store: Arc<dyn TaskStore>,
    poller: Poller,
    shutdown: S,
) -> std::io::Result<()>
where
    S: Future<Output = ()>,
{
    let (stop_tx, stop_rx) = watch::channel(false);
    info!(addr = %listener.local_addr()?, "Accepting task requests");

    let server = axum::serve(listener, create_routes(store))
        .with_graceful_shutdown(stopped(stop_rx.clone()))
        .into_future();
    let signal = async move {
        shutdown.await;
        info!("Shutdown requested");
        let _ = stop_tx.send(true);
    };

    let (served, (), ()) = tokio::join!(server, poller.run(stopped(stop_rx)), signal);
    served
}
