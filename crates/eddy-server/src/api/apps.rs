//! Application reads and peer heartbeats

use super::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use eddy_cluster::{HeartbeatQuery, ItemResponse};
use eddy_core::{ApplicationsSummary, InstanceId};

/// GET /apps
pub async fn list_applications(State(state): State<AppState>) -> Json<ApplicationsSummary> {
    Json(state.view().applications().await.summary())
}

/// PUT /apps/:app/:id
///
/// 200 when the copies agree, 404 when this node lacks the instance or holds
/// an older copy, 409 with this node's copy when the caller's is older.
pub async fn heartbeat(
    State(state): State<AppState>,
    Path((app, id)): Path<(String, String)>,
    Query(query): Query<HeartbeatQuery>,
) -> Result<Response, ApiError> {
    let id = InstanceId::new(id).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let reply = state
        .handler()
        .heartbeat(&app, &id, &query)
        .await;
    Ok(item_response(reply))
}

pub(crate) fn item_response(reply: ItemResponse) -> Response {
    let status =
        StatusCode::from_u16(reply.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match reply.response_entity {
        Some(local) => (status, Json(local)).into_response(),
        None => status.into_response(),
    }
}
