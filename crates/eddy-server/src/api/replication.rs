//! Peer replication batches and auto-scaling group status

use super::ApiError;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use eddy_cluster::{AsgStatusQuery, ItemResponse, ReplicationItem, PEER_NAME_UNKNOWN, PEER_NODE_HEADER};
use serde::Serialize;
use tracing::debug;

/// POST /peerreplication/batch
///
/// Items are applied in order; the response list is parallel to the request.
pub async fn batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(items): Json<Vec<ReplicationItem>>,
) -> Json<Vec<ItemResponse>> {
    let peer = headers
        .get(PEER_NODE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(PEER_NAME_UNKNOWN);
    debug!(peer, items = items.len(), "replication batch");
    Json(state.handler().apply_batch(peer, items).await)
}

/// ASG status response
#[derive(Debug, Serialize)]
pub struct AsgStatusResponse {
    pub changed: usize,
}

/// PUT /asg/:name/status?value=ENABLED|DISABLED
pub async fn asg_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<AsgStatusQuery>,
) -> Result<Json<AsgStatusResponse>, ApiError> {
    let changed = state.handler().asg_status(&name, query.value).await?;
    Ok(Json(AsgStatusResponse { changed }))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use eddy_cluster::{ItemResponse, ReplicationItem, PEER_NODE_HEADER};
    use eddy_core::{InstanceId, InstanceStatus};
    use eddy_registry::Registry;

    fn post_batch(items: &[ReplicationItem], peer: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/peerreplication/batch")
            .header("content-type", "application/json");
        if let Some(peer) = peer {
            builder = builder.header(PEER_NODE_HEADER, peer);
        }
        builder
            .body(Body::from(serde_json::to_vec(items).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_batch_applies_in_order() {
        let app = test_app(Vec::new()).await;
        let registered = instance("i-1", "X", 10);
        let items = vec![
            ReplicationItem::register(&registered),
            ReplicationItem::heartbeat(&registered),
            ReplicationItem::unregister("X", InstanceId::new("i-2").unwrap(), 10),
        ];

        let (status, body) = send(&app.router, post_batch(&items, Some("node-b"))).await;

        assert_eq!(status, StatusCode::OK);
        let responses: Vec<ItemResponse> = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            responses
                .iter()
                .map(|r| r.status_code)
                .collect::<Vec<_>>(),
            vec![200, 200, 404]
        );
        let id = InstanceId::new("i-1").unwrap();
        assert!(app.store.get("X", &id).await.is_some());
    }

    #[tokio::test]
    async fn test_batch_without_peer_header() {
        let app = test_app(Vec::new()).await;
        let items = vec![ReplicationItem::register(&instance("i-1", "X", 10))];

        let (status, body) = send(&app.router, post_batch(&items, None)).await;

        assert_eq!(status, StatusCode::OK);
        let responses: Vec<ItemResponse> = serde_json::from_slice(&body).unwrap();
        assert_eq!(responses, vec![ItemResponse::status(200)]);
    }

    #[tokio::test]
    async fn test_malformed_batch_rejected() {
        let app = test_app(Vec::new()).await;
        let request = Request::builder()
            .method("POST")
            .uri("/peerreplication/batch")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let (status, _) = send(&app.router, request).await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn test_asg_disable_then_enable() {
        let app = test_app(vec![instance("i-1", "X", 10), instance("i-2", "X", 10)]).await;
        let id = InstanceId::new("i-1").unwrap();

        let (status, body) = send(
            &app.router,
            Request::builder()
                .method("PUT")
                .uri("/asg/asg-1/status?value=DISABLED")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let response: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(response["changed"], 2);
        let copy = app.store.get("X", &id).await.unwrap();
        assert_eq!(copy.status, InstanceStatus::OutOfService);

        let (status, _) = send(
            &app.router,
            Request::builder()
                .method("PUT")
                .uri("/asg/asg-1/status?value=ENABLED")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let copy = app.store.get("X", &id).await.unwrap();
        assert_eq!(copy.status, InstanceStatus::Up);
    }

    #[tokio::test]
    async fn test_asg_invalid_value() {
        let app = test_app(Vec::new()).await;
        let (status, _) = send(
            &app.router,
            Request::builder()
                .method("PUT")
                .uri("/asg/asg-1/status?value=MAYBE")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
