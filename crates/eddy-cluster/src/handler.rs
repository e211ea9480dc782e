//! Receiving side of peer replication
//!
//! TigerStyle: Every item gets exactly one status code; nothing a peer sends
//! is re-replicated.
//!
//! Items are applied to the local store under `REPLICATION(peer)`. The
//! handler talks to the undecorated registry so replicated writes do not
//! fan out again.
//!
//! Heartbeat validation compares the peer's dirty timestamp with ours:
//!
//! | Peer vs local         | Status | Meaning                             |
//! |-----------------------|--------|-------------------------------------|
//! | unknown locally       | 404    | peer should register it             |
//! | peer newer            | 404    | peer should register its copy       |
//! | peer older            | 409    | body carries our copy               |
//! | equal                 | 200    | lease renewed                       |

use crate::protocol::{
    Action, AsgStatus, HeartbeatQuery, ItemResponse, ReplicationItem, BATCH_PATH,
    PEER_NODE_HEADER,
};
use eddy_core::{
    HttpMethod, HttpRequest, HttpResponse, InstanceId, InstanceStatus, Interest, Source,
};
use eddy_registry::{Outcome, Registry, RegistryError, RegistryResult};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Peer name used when a request does not say who sent it
pub const PEER_NAME_UNKNOWN: &str = "unknown";

/// Applies replicated writes to the local registry
pub struct ReplicationHandler {
    registry: Arc<dyn Registry>,
}

impl ReplicationHandler {
    /// Create a handler over the undecorated registry
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self { registry }
    }

    /// Apply a batch, answering one response per item in order
    pub async fn apply_batch(&self, peer: &str, items: Vec<ReplicationItem>) -> Vec<ItemResponse> {
        let source = Source::replication(peer);
        let count = items.len();
        let mut responses = Vec::with_capacity(count);
        for item in items {
            responses.push(self.apply(&source, item).await);
        }
        debug!(peer, items = count, "applied replication batch");
        responses
    }

    /// Apply one item
    pub async fn apply(&self, source: &Source, item: ReplicationItem) -> ItemResponse {
        let result = match item.action {
            Action::Register => self.register(source, item).await,
            Action::Update => self.update(source, item).await,
            Action::Unregister => self
                .registry
                .unregister(&item.id, source)
                .await
                .map(outcome_status),
            Action::Heartbeat => {
                let query = HeartbeatQuery {
                    status: item.status,
                    last_dirty_timestamp: item.last_dirty_timestamp,
                    overridden_status: item.overridden_status,
                };
                return self.heartbeat(&item.app_name, &item.id, &query).await;
            }
            Action::StatusUpdate => match item.status {
                Some(status) => self
                    .registry
                    .status_update(&item.app_name, &item.id, status, item.last_dirty_timestamp)
                    .await
                    .map(outcome_status),
                None => Ok(ItemResponse::status(400)),
            },
            Action::DeleteStatusOverride => self
                .registry
                .delete_status_override(&item.app_name, &item.id, item.status)
                .await
                .map(outcome_status),
        };

        result.unwrap_or_else(|e| {
            warn!(source = %source, error = %e, "replicated write failed");
            ItemResponse::status(error_status(&e))
        })
    }

    async fn register(&self, source: &Source, item: ReplicationItem) -> RegistryResult<ItemResponse> {
        let Some(instance) = item.instance_info else {
            return Ok(ItemResponse::status(400));
        };
        if instance.id != item.id || instance.app != item.app_name {
            return Ok(ItemResponse::status(400));
        }
        self.registry.register(instance, source).await?;
        Ok(ItemResponse::status(200))
    }

    async fn update(&self, source: &Source, item: ReplicationItem) -> RegistryResult<ItemResponse> {
        let Some(instance) = item.instance_info else {
            return Ok(ItemResponse::status(400));
        };
        if instance.id != item.id {
            return Ok(ItemResponse::status(400));
        }
        self.registry.update(instance, source).await.map(outcome_status)
    }

    /// Validate a peer heartbeat against the local copy and renew on agreement
    ///
    /// When the peer's copy is newer, the override it reports is recorded
    /// ahead of its re-registration.
    pub async fn heartbeat(&self, app: &str, id: &InstanceId, query: &HeartbeatQuery) -> ItemResponse {
        let last_dirty_timestamp = query.last_dirty_timestamp;
        let Some(local) = self.registry.get(app, id).await else {
            debug!(instance_id = %id, app, "heartbeat for unknown instance");
            return ItemResponse::status(404);
        };

        if last_dirty_timestamp > local.last_dirty_timestamp {
            debug!(
                instance_id = %id,
                incoming = last_dirty_timestamp,
                local = local.last_dirty_timestamp,
                "peer copy is newer, asking for registration"
            );
            if let Some(status) = query
                .overridden_status
                .filter(|status| *status != InstanceStatus::Unknown)
            {
                if let Err(e) = self.registry.store_overridden_status(app, id, status).await {
                    warn!(instance_id = %id, error = %e, "failed to store peer override");
                }
            }
            return ItemResponse::status(404);
        }
        if last_dirty_timestamp < local.last_dirty_timestamp {
            info!(
                instance_id = %id,
                incoming = last_dirty_timestamp,
                local = local.last_dirty_timestamp,
                "peer copy is older, answering with ours"
            );
            return ItemResponse::conflict(local.as_ref().clone());
        }

        match self.registry.renew(app, id).await {
            Ok(outcome) => outcome_status(outcome),
            Err(e) => ItemResponse::status(error_status(&e)),
        }
    }

    /// Apply an auto-scaling group status to every member; returns the count changed
    ///
    /// A disabled group is forced `OUT_OF_SERVICE` through an override; enabling
    /// it clears the override and restores `UP`.
    pub async fn asg_status(&self, asg_name: &str, status: AsgStatus) -> RegistryResult<usize> {
        let members: Vec<_> = self
            .registry
            .for_snapshot(&Interest::All)
            .await
            .into_iter()
            .filter(|instance| instance.asg_name.as_deref() == Some(asg_name))
            .collect();

        let mut changed = 0;
        for member in &members {
            let outcome = match status {
                AsgStatus::Disabled => {
                    self.registry
                        .status_update(
                            &member.app,
                            &member.id,
                            status.instance_status(),
                            member.last_dirty_timestamp,
                        )
                        .await?
                }
                AsgStatus::Enabled => {
                    self.registry
                        .delete_status_override(
                            &member.app,
                            &member.id,
                            Some(status.instance_status()),
                        )
                        .await?
                }
            };
            if outcome.is_applied() {
                changed += 1;
            }
        }

        info!(asg = asg_name, status = ?status, changed, "applied ASG status");
        Ok(changed)
    }

    /// Serve the peer HTTP surface from an in-process request
    ///
    /// Mirrors the server's routes for `POST /peerreplication/batch`,
    /// `PUT /apps/{app}/{id}` and `PUT /asg/{name}/status`.
    pub async fn handle_http(&self, request: HttpRequest) -> HttpResponse {
        let (path, query) = split_url(&request.url);
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match (request.method, segments.as_slice()) {
            (HttpMethod::Post, _) if path == BATCH_PATH => {
                let peer = request
                    .headers
                    .get(PEER_NODE_HEADER)
                    .map(String::as_str)
                    .unwrap_or(PEER_NAME_UNKNOWN);
                let items: Vec<ReplicationItem> =
                    match serde_json::from_str(request.body.as_deref().unwrap_or("[]")) {
                        Ok(items) => items,
                        Err(e) => return HttpResponse::new(400, e.to_string()),
                    };
                json_response(200, &self.apply_batch(peer, items).await)
            }
            (HttpMethod::Put, ["apps", app, id]) => {
                let Ok(id) = InstanceId::new(*id) else {
                    return HttpResponse::new(400, "invalid instance id");
                };
                let Some(query) = parse_heartbeat_query(query) else {
                    return HttpResponse::new(400, "lastDirtyTimestamp required");
                };
                let response = self.heartbeat(app, &id, &query).await;
                match response.response_entity {
                    Some(local) => json_response(response.status_code, &local),
                    None => HttpResponse::new(response.status_code, ""),
                }
            }
            (HttpMethod::Put, ["asg", name, "status"]) => {
                let value = query_param(query, "value")
                    .and_then(|v| serde_json::from_value::<AsgStatus>(serde_json::json!(v)).ok());
                let Some(value) = value else {
                    return HttpResponse::new(400, "value must be ENABLED or DISABLED");
                };
                match self.asg_status(name, value).await {
                    Ok(_) => HttpResponse::new(200, ""),
                    Err(e) => HttpResponse::new(error_status(&e), e.to_string()),
                }
            }
            _ => HttpResponse::new(404, "no such route"),
        }
    }
}

fn outcome_status(outcome: Outcome) -> ItemResponse {
    match outcome {
        Outcome::Applied => ItemResponse::status(200),
        Outcome::NotFound => ItemResponse::status(404),
    }
}

/// HTTP status for a registry error
pub fn error_status(error: &RegistryError) -> u16 {
    match error {
        RegistryError::InvalidInstance(_) | RegistryError::AppMismatch { .. } => 400,
        RegistryError::CapacityExceeded { .. } | RegistryError::ShuttingDown => 503,
        _ => 500,
    }
}

fn json_response<T: serde::Serialize>(status: u16, body: &T) -> HttpResponse {
    match serde_json::to_string(body) {
        Ok(body) => HttpResponse::new(status, body).with_header("Content-Type", "application/json"),
        Err(e) => HttpResponse::new(500, e.to_string()),
    }
}

fn split_url(url: &str) -> (&str, &str) {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path_and_query = without_scheme
        .find('/')
        .map_or("/", |index| &without_scheme[index..]);
    path_and_query.split_once('?').unwrap_or((path_and_query, ""))
}

fn query_param<'a>(query: &'a str, name: &str) -> Option<&'a str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

fn parse_heartbeat_query(query: &str) -> Option<HeartbeatQuery> {
    let last_dirty_timestamp = query_param(query, "lastDirtyTimestamp")?.parse().ok()?;
    Some(HeartbeatQuery {
        status: query_param(query, "status").and_then(|s| InstanceStatus::from_str(s).ok()),
        last_dirty_timestamp,
        overridden_status: query_param(query, "overriddenstatus")
            .and_then(|s| InstanceStatus::from_str(s).ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use eddy_core::{InstanceFields, InstanceInfo, IoContext, RegistryConfig};
    use eddy_dst::SimClock;
    use eddy_registry::MemoryRegistry;

    fn instance(id: &str, ldt: u64) -> InstanceInfo {
        InstanceInfo::new(InstanceFields {
            id: id.into(),
            app: "X".into(),
            status: InstanceStatus::Up,
            last_dirty_timestamp: ldt,
            ..Default::default()
        })
        .unwrap()
    }

    fn setup() -> (Arc<MemoryRegistry>, ReplicationHandler) {
        let io = IoContext::new(Arc::new(SimClock::from_millis(1_000)));
        let registry = Arc::new(MemoryRegistry::new(&RegistryConfig::for_testing(), io));
        let handler = ReplicationHandler::new(registry.clone());
        (registry, handler)
    }

    fn id(value: &str) -> InstanceId {
        InstanceId::new(value).unwrap()
    }

    fn query(last_dirty_timestamp: u64) -> HeartbeatQuery {
        HeartbeatQuery {
            status: Some(InstanceStatus::Up),
            last_dirty_timestamp,
            overridden_status: None,
        }
    }

    #[tokio::test]
    async fn test_batch_applies_under_peer_source() {
        let (registry, handler) = setup();
        let responses = handler
            .apply_batch(
                "node-b",
                vec![
                    ReplicationItem::register(&instance("i-1", 10)),
                    ReplicationItem::register(&instance("i-2", 10)),
                    ReplicationItem::unregister("X", id("i-2"), 11),
                    ReplicationItem::unregister("X", id("i-9"), 11),
                ],
            )
            .await;

        let codes: Vec<u16> = responses.iter().map(|r| r.status_code).collect();
        assert_eq!(codes, vec![200, 200, 200, 404]);
        assert_eq!(registry.size().await, 1);

        // Releasing the peer source removes what it replicated
        registry
            .release_source(&Source::replication("node-b"))
            .await
            .unwrap();
        assert_eq!(registry.size().await, 0);
    }

    #[tokio::test]
    async fn test_heartbeat_dirty_timestamp_validation() {
        let (registry, handler) = setup();
        registry
            .register(instance("i-1", 100), &Source::local("i-1"))
            .await
            .unwrap();

        assert_eq!(handler.heartbeat("X", &id("i-1"), &query(100)).await.status_code, 200);
        assert_eq!(handler.heartbeat("X", &id("i-1"), &query(120)).await.status_code, 404);
        assert_eq!(handler.heartbeat("X", &id("i-9"), &query(100)).await.status_code, 404);

        let conflict = handler.heartbeat("X", &id("i-1"), &query(90)).await;
        assert_eq!(conflict.status_code, 409);
        assert_eq!(conflict.response_entity.unwrap().last_dirty_timestamp, 100);
    }

    #[tokio::test]
    async fn test_newer_peer_heartbeat_stores_its_override() {
        let (registry, handler) = setup();
        registry
            .register(instance("i-1", 100), &Source::local("i-1"))
            .await
            .unwrap();

        // Equal copies renew without touching overrides
        let agreeing = HeartbeatQuery {
            overridden_status: Some(InstanceStatus::OutOfService),
            ..query(100)
        };
        assert_eq!(handler.heartbeat("X", &id("i-1"), &agreeing).await.status_code, 200);
        assert_eq!(registry.get("X", &id("i-1")).await.unwrap().overridden_status, None);

        // UNKNOWN is not an override
        let unknown = HeartbeatQuery {
            overridden_status: Some(InstanceStatus::Unknown),
            ..query(120)
        };
        assert_eq!(handler.heartbeat("X", &id("i-1"), &unknown).await.status_code, 404);
        assert_eq!(registry.get("X", &id("i-1")).await.unwrap().overridden_status, None);

        // A newer replica's override is kept while it re-registers
        let mut item = ReplicationItem::heartbeat(&instance("i-1", 120));
        item.overridden_status = Some(InstanceStatus::OutOfService);
        let response = handler.apply(&Source::replication("node-b"), item).await;
        assert_eq!(response.status_code, 404);

        let stored = registry.get("X", &id("i-1")).await.unwrap();
        assert_eq!(stored.overridden_status, Some(InstanceStatus::OutOfService));
        assert_eq!(stored.effective_status(), InstanceStatus::OutOfService);
        assert_eq!(stored.status, InstanceStatus::Up);
        assert_eq!(stored.last_dirty_timestamp, 100);

        // and survives a registration that carries none
        registry
            .register(instance("i-1", 130), &Source::local("i-1"))
            .await
            .unwrap();
        assert_eq!(
            registry.get("X", &id("i-1")).await.unwrap().overridden_status,
            Some(InstanceStatus::OutOfService)
        );
    }

    #[tokio::test]
    async fn test_register_without_copy_is_bad_request() {
        let (_registry, handler) = setup();
        let mut item = ReplicationItem::register(&instance("i-1", 10));
        item.instance_info = None;
        let response = handler.apply(&Source::replication("node-b"), item).await;
        assert_eq!(response.status_code, 400);
    }

    #[tokio::test]
    async fn test_status_update_and_override_removal() {
        let (registry, handler) = setup();
        registry
            .register(instance("i-1", 10), &Source::local("i-1"))
            .await
            .unwrap();
        let source = Source::replication("node-b");

        let response = handler
            .apply(
                &source,
                ReplicationItem::status_update("X", id("i-1"), InstanceStatus::OutOfService, 20),
            )
            .await;
        assert_eq!(response.status_code, 200);
        assert_eq!(
            registry.get("X", &id("i-1")).await.unwrap().effective_status(),
            InstanceStatus::OutOfService
        );

        let response = handler
            .apply(
                &source,
                ReplicationItem::delete_status_override("X", id("i-1"), Some(InstanceStatus::Up), 30),
            )
            .await;
        assert_eq!(response.status_code, 200);
        assert_eq!(
            registry.get("X", &id("i-1")).await.unwrap().effective_status(),
            InstanceStatus::Up
        );
    }

    #[tokio::test]
    async fn test_asg_status() {
        let (registry, handler) = setup();
        for (name, asg) in [("i-1", Some("web-v1")), ("i-2", Some("web-v1")), ("i-3", None)] {
            let mut copy = instance(name, 10);
            copy.asg_name = asg.map(str::to_string);
            registry.register(copy, &Source::local(name)).await.unwrap();
        }

        assert_eq!(handler.asg_status("web-v1", AsgStatus::Disabled).await.unwrap(), 2);
        assert_eq!(
            registry.get("X", &id("i-1")).await.unwrap().effective_status(),
            InstanceStatus::OutOfService
        );
        assert_eq!(
            registry.get("X", &id("i-3")).await.unwrap().effective_status(),
            InstanceStatus::Up
        );

        assert_eq!(handler.asg_status("web-v1", AsgStatus::Enabled).await.unwrap(), 2);
        assert_eq!(
            registry.get("X", &id("i-2")).await.unwrap().effective_status(),
            InstanceStatus::Up
        );
    }

    #[tokio::test]
    async fn test_http_surface() {
        let (registry, handler) = setup();
        let body = serde_json::to_string(&vec![ReplicationItem::register(&instance("i-1", 100))])
            .unwrap();
        let response = handler
            .handle_http(
                HttpRequest::post("http://node-a/peerreplication/batch")
                    .with_header(PEER_NODE_HEADER, "node-b")
                    .with_json_body(body),
            )
            .await;
        assert_eq!(response.status, 200);
        let responses: Vec<ItemResponse> = serde_json::from_str(&response.body).unwrap();
        assert_eq!(responses, vec![ItemResponse::status(200)]);
        assert_eq!(registry.size().await, 1);

        let response = handler
            .handle_http(HttpRequest::put(
                "http://node-a/apps/X/i-1?lastDirtyTimestamp=90&status=UP",
            ))
            .await;
        assert_eq!(response.status, 409);
        let copy: InstanceInfo = serde_json::from_str(&response.body).unwrap();
        assert_eq!(copy.last_dirty_timestamp, 100);

        let response = handler
            .handle_http(HttpRequest::put("http://node-a/apps/X/i-1"))
            .await;
        assert_eq!(response.status, 400);

        let response = handler
            .handle_http(HttpRequest::get("http://node-a/nowhere"))
            .await;
        assert_eq!(response.status, 404);
    }

    #[test]
    fn test_split_url() {
        assert_eq!(split_url("http://a:1/apps/X/i?x=1"), ("/apps/X/i", "x=1"));
        assert_eq!(split_url("http://a"), ("/", ""));
        assert_eq!(query_param("a=1&b=2", "b"), Some("2"));
        assert_eq!(query_param("a=1", "c"), None);
    }
}
