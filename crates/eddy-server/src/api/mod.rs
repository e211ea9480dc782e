//! HTTP peer surface
//!
//! TigerStyle: Thin axum handlers over the replication handler; status codes
//! come from the registry outcome, never invented here.
//!
//! Routes:
//! - `GET /health`: liveness, registry size and self-preservation state
//! - `GET /apps`: the applications view with its reconcile hash code
//! - `PUT /apps/:app/:id`: peer heartbeat
//! - `POST /peerreplication/batch`: peer write batch
//! - `PUT /asg/:name/status`: auto-scaling group status

pub mod apps;
pub mod replication;

use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use eddy_cluster::{error_status, BATCH_PATH};
use eddy_registry::{PreservationSnapshot, RegistryError};
use serde::Serialize;
use tower_http::trace::TraceLayer;

/// Create the API router with all routes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/apps", get(apps::list_applications))
        .route("/apps/:app/:id", put(apps::heartbeat))
        .route(BATCH_PATH, post(replication::batch))
        .route("/asg/:name/status", put(replication::asg_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub instances: usize,
    pub self_preservation: PreservationSnapshot,
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.registry();
    Json(HealthResponse {
        status: "ok".to_string(),
        node_id: state.node_id().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        instances: registry.size().await,
        self_preservation: registry.self_preservation().await,
    })
}

// =============================================================================
// Errors
// =============================================================================

/// Error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

/// API error type that converts to HTTP responses
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let status =
            StatusCode::from_u16(error_status(&err)).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(status, "registry_error", err.to_string())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use eddy_cluster::Replicator;
    use eddy_core::{InstanceFields, InstanceInfo, InstanceStatus, IoContext, RegistryConfig};
    use eddy_dst::SimClock;
    use eddy_registry::{MemoryRegistry, Registry, RegistryView};
    use std::sync::Arc;
    use tower::ServiceExt;

    pub struct TestApp {
        pub router: Router,
        pub store: Arc<MemoryRegistry>,
    }

    pub fn instance(id: &str, app: &str, ldt: u64) -> InstanceInfo {
        InstanceInfo::new(InstanceFields {
            id: id.into(),
            app: app.into(),
            status: InstanceStatus::Up,
            asg_name: Some("asg-1".into()),
            last_dirty_timestamp: ldt,
            ..Default::default()
        })
        .unwrap()
    }

    /// App over a store pre-loaded with `instances` (registered as replicated)
    pub async fn test_app(instances: Vec<InstanceInfo>) -> TestApp {
        let clock = Arc::new(SimClock::from_millis(1_000));
        let store = Arc::new(MemoryRegistry::new(
            &RegistryConfig::for_testing(),
            IoContext::new(clock),
        ));
        for instance in instances {
            store
                .register(instance, &eddy_core::Source::replication("node-b"))
                .await
                .unwrap();
        }
        let registry: Arc<dyn Registry> = Arc::new(Replicator::new(store.clone(), Vec::new()));
        let view = RegistryView::start(store.as_ref()).await.unwrap();
        view.wait_ready().await;
        let state = AppState::new("node-a", registry, store.clone(), view);
        TestApp {
            router: router(state),
            store,
        }
    }

    pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }
}
