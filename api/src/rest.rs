use crate::db::{Store, RECENT_READINGS_LIMIT};
use crate::errors::{Error, ErrorKind};
use crate::metrics::{self, REQUESTS_TOTAL, REQUEST_ERRORS_TOTAL};
use crate::model::{Device, ErrorResponse, NewDevice, NewReading, NewUser, Reading, User};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
struct AppState {
    store: Arc<dyn Store>,
}

pub fn create_router(store: Arc<dyn Store>) -> Router {
    let state = AppState { store };

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/api/users", post(create_user))
        .route(
            "/api/users/:userId/devices",
            post(register_device).get(list_devices),
        )
        .route(
            "/api/devices/:deviceId/data",
            post(submit_reading).get(recent_readings),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    metrics::gather_metrics().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn create_user(
    State(state): State<AppState>,
    payload: Result<Json<NewUser>, JsonRejection>,
) -> Result<Json<User>, AppError> {
    REQUESTS_TOTAL.with_label_values(&["create_user"]).inc();
    let Json(new_user) = payload?;

    let user = state.store.insert_user(new_user).await?;
    Ok(Json(user))
}

async fn register_device(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    payload: Result<Json<NewDevice>, JsonRejection>,
) -> Result<Json<Device>, AppError> {
    REQUESTS_TOTAL.with_label_values(&["register_device"]).inc();
    let Path(user_id) = path?;
    let Json(new_device) = payload?;

    let owner = resolve_user(state.store.as_ref(), &user_id).await?;
    let device = state.store.insert_device(owner, new_device.name).await?;
    Ok(Json(device))
}

async fn list_devices(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<Vec<Device>>, AppError> {
    REQUESTS_TOTAL.with_label_values(&["list_devices"]).inc();
    let Path(user_id) = path?;

    let owner = resolve_user(state.store.as_ref(), &user_id).await?;
    let devices = state.store.list_devices(owner).await?;
    Ok(Json(devices))
}

async fn submit_reading(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    payload: Result<Json<NewReading>, JsonRejection>,
) -> Result<Json<Reading>, AppError> {
    REQUESTS_TOTAL.with_label_values(&["submit_reading"]).inc();
    let Path(device_id) = path?;
    let Json(reading) = payload?;

    // Device ids are not checked against registered devices.
    let reading = state.store.insert_reading(&device_id, reading).await?;
    Ok(Json(reading))
}

async fn recent_readings(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<Vec<Reading>>, AppError> {
    REQUESTS_TOTAL.with_label_values(&["recent_readings"]).inc();
    let Path(device_id) = path?;

    let readings = state
        .store
        .recent_readings(&device_id, RECENT_READINGS_LIMIT)
        .await?;
    Ok(Json(readings))
}

/// Maps an external identity-provider id to the internal user id.
async fn resolve_user(store: &dyn Store, external_id: &str) -> Result<Uuid, Error> {
    store
        .find_user_id(external_id)
        .await?
        .ok_or(Error::UserNotFound)
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound | ErrorKind::Validation | ErrorKind::Upstream => {
            StatusCode::BAD_REQUEST
        }
    }
}

struct AppError(Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        REQUEST_ERRORS_TOTAL.with_label_values(&[kind.as_str()]).inc();
        warn!(kind = kind.as_str(), "API error: {}", self.0);

        (
            status_for(kind),
            Json(ErrorResponse {
                error: self.0.detail(),
            }),
        )
            .into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        Self(Error::Validation(rejection.body_text()))
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::Validation(rejection.body_text()))
    }
}
