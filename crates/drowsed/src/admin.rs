//! Internal admin API.
//!
//! Lets the broker layer (or an operator) feed the daemon the records it
//! only reads: service instances, bindings, and sleeping routes.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | PUT | `/v1/service-instances/{id}` | Create or replace a service instance |
//! | PUT | `/v1/bindings/{id}` | Bind an application and start watching it |
//! | DELETE | `/v1/bindings/{id}` | Unbind and stop watching |
//! | PUT | `/v1/routes/{hostname}` | Map a hostname to a sleeping app; 409 while restarting |
//! | GET | `/v1/routes` | List mapped hostnames |
//! | GET | `/v1/watches` | Bindings watched by this process |

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use drowse_state::{Binding, MapOutcome, ProxyMapEntry, ServiceInstance, StateStore};
use drowse_watch::{WatchError, WatchManager};

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub store: StateStore,
    pub watches: Arc<WatchManager>,
}

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Debug, Deserialize)]
pub struct ServiceInstanceRequest {
    pub idle_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct BindingRequest {
    pub app_id: String,
    pub service_instance_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    pub app_id: String,
}

#[derive(Debug, Serialize)]
struct WatchesView {
    owner: String,
    watched: Vec<String>,
}

pub fn admin_router(state: AdminState) -> Router {
    let routes = Router::new()
        .route("/service-instances/{id}", put(put_service_instance))
        .route("/bindings/{id}", put(put_binding).delete(delete_binding))
        .route("/routes", get(list_routes))
        .route("/routes/{hostname}", put(put_route))
        .route("/watches", get(list_watches))
        .with_state(state);

    Router::new().nest("/v1", routes)
}

/// PUT /v1/service-instances/:id
async fn put_service_instance(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(req): Json<ServiceInstanceRequest>,
) -> impl IntoResponse {
    let existing = match state.store.get_service_instance(&id) {
        Ok(existing) => existing,
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };

    let instance = ServiceInstance {
        id,
        idle_interval_secs: req.idle_interval_secs,
        created_at: existing.as_ref().map_or_else(now_secs, |e| e.created_at),
    };
    match state.store.put_service_instance(&instance) {
        Ok(()) if existing.is_some() => ApiResponse::ok(instance).into_response(),
        Ok(()) => (StatusCode::CREATED, ApiResponse::ok(instance)).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// PUT /v1/bindings/:id
async fn put_binding(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    Json(req): Json<BindingRequest>,
) -> impl IntoResponse {
    let existing = match state.store.get_binding(&id) {
        Ok(existing) => existing,
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };
    let created_at = existing.as_ref().map_or_else(now_secs, |b| b.created_at);
    let binding = Binding::new(&id, &req.app_id, &req.service_instance_id, created_at);

    match state.watches.on_bind(&binding) {
        Ok(()) if existing.is_some() => ApiResponse::ok(binding).into_response(),
        Ok(()) => (StatusCode::CREATED, ApiResponse::ok(binding)).into_response(),
        Err(e) => {
            let status = match e {
                WatchError::ServiceInstanceNotFound(_) => StatusCode::NOT_FOUND,
                WatchError::InvalidInterval(_) => StatusCode::BAD_REQUEST,
                WatchError::OwnedElsewhere { .. } => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error_response(&e.to_string(), status).into_response()
        }
    }
}

/// DELETE /v1/bindings/:id
async fn delete_binding(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let binding = match state.store.get_binding(&id) {
        Ok(Some(binding)) => binding,
        Ok(None) => {
            return error_response("binding not found", StatusCode::NOT_FOUND).into_response();
        }
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };

    match state.watches.on_unbind(&binding) {
        Ok(()) => ApiResponse::ok("deleted").into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// PUT /v1/routes/:hostname
async fn put_route(
    State(state): State<AdminState>,
    Path(hostname): Path<String>,
    Json(req): Json<RouteRequest>,
) -> impl IntoResponse {
    let entry = ProxyMapEntry::new(&hostname, &req.app_id);
    match state.store.map_sleeping_app(&entry) {
        Ok(MapOutcome::Created) => {
            info!(hostname = %entry.hostname, app_id = %entry.app_id, "route mapped to sleeping app");
            (StatusCode::CREATED, ApiResponse::ok(entry)).into_response()
        }
        Ok(MapOutcome::Replaced) => {
            info!(hostname = %entry.hostname, app_id = %entry.app_id, "route remapped");
            ApiResponse::ok(entry).into_response()
        }
        Ok(MapOutcome::Restarting) => error_response(
            &format!("{} is restarting", entry.hostname),
            StatusCode::CONFLICT,
        )
        .into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /v1/routes
async fn list_routes(State(state): State<AdminState>) -> impl IntoResponse {
    match state.store.list_proxy_entries() {
        Ok(entries) => ApiResponse::ok(entries).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /v1/watches
async fn list_watches(State(state): State<AdminState>) -> impl IntoResponse {
    ApiResponse::ok(WatchesView {
        owner: state.watches.owner().to_string(),
        watched: state.watches.watched(),
    })
}
