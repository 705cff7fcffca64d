// Administrative REST endpoints over the connection registry.
//
// Non-realtime surface: list the current records, or push a value into
// one or all connections. The group update reuses the same update-all +
// fanout path as the socket handler so both surfaces behave identically.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::IntoResponse,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};

use crate::cors::cors_layer;
use crate::error::{ApiError, ErrorCode};
use crate::fanout::{broadcast_snapshot, ConnectionHub};
use crate::registry::{ConnectionRegistry, RegistryError};

#[derive(Clone)]
struct ApiState {
    registry: ConnectionRegistry,
    hub: ConnectionHub,
}

#[derive(Debug, Deserialize)]
struct UpdateValueRequest {
    value: serde_json::Value,
}

pub fn router(registry: ConnectionRegistry, hub: ConnectionHub) -> Router {
    let state = ApiState { registry, hub };
    Router::new()
        .route("/connection", get(list_connections).put(update_all_connections))
        .route("/connection/{id}", put(update_one_connection))
        .layer(cors_layer())
        .with_state(state)
}

async fn list_connections(State(state): State<ApiState>) -> impl IntoResponse {
    match state.registry.list_all().await {
        Ok(records) => Json(records).into_response(),
        Err(registry_error) => internal_error(registry_error).into_response(),
    }
}

async fn update_all_connections(
    State(state): State<ApiState>,
    payload: Result<Json<UpdateValueRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return validation_error(rejection).into_response(),
    };

    match state.registry.update_all(request.value).await {
        Ok(connections) => {
            let report = broadcast_snapshot(&connections, &state.hub).await;
            debug!(
                updated = connections.len(),
                delivered = report.delivered_count(),
                failed = report.failed_count(),
                "admin group update broadcast settled"
            );
            Json(json!({})).into_response()
        }
        Err(registry_error) => internal_error(registry_error).into_response(),
    }
}

async fn update_one_connection(
    State(state): State<ApiState>,
    Path(connection_id): Path<String>,
    payload: Result<Json<UpdateValueRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return validation_error(rejection).into_response(),
    };

    if connection_id.trim().is_empty() {
        return ApiError::new(ErrorCode::ValidationFailed, "connection id must not be empty")
            .into_response();
    }

    match state.registry.update_value(&connection_id, request.value).await {
        Ok(record) => Json(record).into_response(),
        Err(RegistryError::NotFound { connection_id }) => ApiError::new(
            ErrorCode::NotFound,
            format!("connection `{connection_id}` is not registered"),
        )
        .into_response(),
        Err(registry_error) => internal_error(registry_error).into_response(),
    }
}

fn validation_error(rejection: JsonRejection) -> ApiError {
    ApiError::new(ErrorCode::ValidationFailed, rejection.body_text())
}

fn internal_error(registry_error: RegistryError) -> ApiError {
    error!(%registry_error, "registry operation failed");
    ApiError::from_code(ErrorCode::InternalError)
}
