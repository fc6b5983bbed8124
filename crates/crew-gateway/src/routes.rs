//! REST task mutation routes.
//!
//! Handlers call [`TaskLifecycle`] and never touch stores directly, so every
//! accepted mutation picks up audit history and dispatch for free.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crew_core::{GeoPoint, OrderId, TaskId};
use crew_flow::lifecycle::TaskLifecycle;
use crew_flow::store::ClaimOutcome;
use crew_flow::task::{NewTask, PaymentAmount, Task, TaskPriority, TaskStatus, TaskType};

use crate::auth::{bearer_token, ConnectionIdentity};
use crate::error::{GatewayError, GatewayResult};
use crate::server::AppState;

/// Builds the `/api` router.
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks", post(create_task))
        .route("/tasks/nearby", get(nearby_tasks))
        .route("/tasks/{id}", delete(delete_task))
        .route("/tasks/{id}/claim", post(claim_task))
        .route("/tasks/{id}/status", put(update_status))
        .route("/tasks/{id}/payment", put(update_payment))
        .route("/tasks/{id}/complete", post(complete_task))
}

fn identify(state: &AppState, headers: &HeaderMap) -> GatewayResult<ConnectionIdentity> {
    let header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| GatewayError::authentication_failed("missing Authorization header"))?;
    let token = bearer_token(header)
        .ok_or_else(|| GatewayError::authentication_failed("expected a bearer token"))?;
    state.verifier.verify(token)
}

/// Request body for task creation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    /// Owning order; generated when the caller has none yet.
    #[serde(default)]
    pub order_id: Option<OrderId>,
    /// Kind of field work.
    pub task_type: TaskType,
    /// Priority; defaults to medium.
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    /// Scheduled time.
    pub scheduled_at: DateTime<Utc>,
    /// Work site coordinates.
    #[serde(default)]
    pub location: Option<LocationBody>,
    /// Work site address.
    #[serde(default)]
    pub address: Option<String>,
    /// Agreed payment in dollars.
    #[serde(default)]
    pub payment_amount: Option<PaymentAmount>,
}

/// Coordinates inside a request body.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LocationBody {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateTaskRequest>,
) -> GatewayResult<(StatusCode, Json<Task>)> {
    identify(&state, &headers)?;

    let location = body
        .location
        .map(|l| GeoPoint::new(l.lat, l.lng))
        .transpose()?;
    let task = state
        .lifecycle
        .create(NewTask {
            order_id: body.order_id.unwrap_or_else(OrderId::generate),
            task_type: body.task_type,
            priority: body.priority.unwrap_or(TaskPriority::Medium),
            scheduled_at: body.scheduled_at,
            location,
            address: body.address,
            payment_amount: body.payment_amount,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// Query parameters for the nearby-task search.
#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Search radius in kilometers; server default when absent.
    #[serde(default)]
    pub radius: Option<f64>,
}

async fn nearby_tasks(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<NearbyQuery>,
) -> GatewayResult<Json<Vec<Task>>> {
    let identity = identify(&state, &headers)?;
    let center = GeoPoint::new(query.lat, query.lng)?;
    let radius_km = query.radius.unwrap_or(state.config.match_radius_km);
    let tasks = state
        .lifecycle
        .nearest(&identity.contractor_id, center, radius_km)
        .await?;
    Ok(Json(tasks))
}

async fn claim_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
    headers: HeaderMap,
) -> GatewayResult<Json<Task>> {
    let identity = identify(&state, &headers)?;
    match state
        .lifecycle
        .claim(&id, &identity.contractor_id)
        .await?
    {
        ClaimOutcome::Claimed(task) => Ok(Json(task)),
        ClaimOutcome::Conflict { actual } => Err(GatewayError::claim_conflict(format!(
            "task was claimed by someone else (status is {actual})"
        ))),
        ClaimOutcome::NotFound => Err(GatewayError::not_found(format!("task {id}"))),
    }
}

/// Request body for a status transition.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    /// Target status.
    pub status: TaskStatus,
    /// Optional reason recorded in the audit history.
    #[serde(default)]
    pub reason: Option<String>,
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
    headers: HeaderMap,
    Json(body): Json<StatusRequest>,
) -> GatewayResult<Json<Task>> {
    let identity = identify(&state, &headers)?;
    let actor = identity.contractor_id.to_string();
    let task = state
        .lifecycle
        .update_status(&id, body.status, &actor, body.reason)
        .await?;
    Ok(Json(task))
}

/// Request body for a payment change.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    /// New amount in dollars; `null` clears the amount.
    pub amount: Option<PaymentAmount>,
    /// Optional reason recorded in the audit history.
    #[serde(default)]
    pub reason: Option<String>,
}

async fn update_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
    headers: HeaderMap,
    Json(body): Json<PaymentRequest>,
) -> GatewayResult<Json<Task>> {
    let identity = identify(&state, &headers)?;
    let actor = identity.contractor_id.to_string();
    let task = state
        .lifecycle
        .set_payment(&id, body.amount, &actor, body.reason)
        .await?;
    Ok(Json(task))
}

/// Request body for task completion.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    /// Completion photo references (at most five).
    #[serde(default)]
    pub photos: Vec<String>,
    /// Free-form completion notes.
    #[serde(default)]
    pub notes: Option<String>,
}

async fn complete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
    headers: HeaderMap,
    Json(body): Json<CompleteRequest>,
) -> GatewayResult<Json<Task>> {
    let identity = identify(&state, &headers)?;
    let task = state
        .lifecycle
        .complete(&id, &identity.contractor_id, body.photos, body.notes)
        .await?;
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<TaskId>,
    headers: HeaderMap,
) -> GatewayResult<StatusCode> {
    identify(&state, &headers)?;
    state.lifecycle.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
