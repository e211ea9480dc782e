//! HTTP client for one replication peer
//!
//! TigerStyle: One request, at most one redirect hop.
//!
//! A 3xx with a `Location` is followed once. When the followed request
//! succeeds, the new base URL is cached and later requests go there
//! directly. A redirect answering the followed request is a hard failure for
//! that request. A transport error on the cached target drops the cache so
//! the next request starts from the configured URL again.

use crate::error::{ReplicationError, ReplicationResult};
use crate::protocol::{ItemResponse, ReplicationItem, BATCH_PATH, PEER_NODE_HEADER};
use eddy_core::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Client for one peer's replication endpoints
pub struct PeerClient {
    local_node: String,
    base_url: String,
    http: Arc<dyn HttpClient>,
    timeout: Duration,
    redirected_base: RwLock<Option<String>>,
}

impl PeerClient {
    /// Create a client for the peer at `base_url`
    pub fn new(
        local_node: impl Into<String>,
        base_url: impl Into<String>,
        http: Arc<dyn HttpClient>,
        timeout: Duration,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            local_node: local_node.into(),
            base_url,
            http,
            timeout,
            redirected_base: RwLock::new(None),
        }
    }

    /// Configured base URL, which also names the peer
    pub fn peer(&self) -> &str {
        &self.base_url
    }

    /// Base URL learned from a redirect, if any
    pub async fn redirected_base(&self) -> Option<String> {
        self.redirected_base.read().await.clone()
    }

    /// Post a batch; the response list is checked against the request list
    pub async fn submit_batch(
        &self,
        items: &[ReplicationItem],
    ) -> ReplicationResult<Vec<ItemResponse>> {
        let body = serde_json::to_string(items)?;
        let response = self
            .execute(HttpMethod::Post, BATCH_PATH, Some(body))
            .await?;
        if !response.is_success() {
            return Err(ReplicationError::from_status(&self.base_url, response.status));
        }

        let responses: Vec<ItemResponse> = serde_json::from_str(&response.body)?;
        if responses.len() != items.len() {
            return Err(ReplicationError::ResponseMismatch {
                peer: self.base_url.clone(),
                sent: items.len(),
                received: responses.len(),
            });
        }
        Ok(responses)
    }

    async fn execute(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<String>,
    ) -> ReplicationResult<HttpResponse> {
        let base = self
            .redirected_base()
            .await
            .unwrap_or_else(|| self.base_url.clone());

        let mut request = HttpRequest::new(method, format!("{}{}", base, path))
            .with_header(PEER_NODE_HEADER, self.local_node.clone())
            .with_timeout(self.timeout);
        if let Some(body) = body {
            request = request.with_json_body(body);
        }

        let response = self.send(&request).await?;
        if !response.is_redirect() {
            return Ok(response);
        }

        let location = match response.location() {
            Some(location) if location.starts_with('/') => format!("{}{}", base, location),
            Some(location) => location.to_string(),
            None => {
                return Err(ReplicationError::InvalidRedirect {
                    peer: self.base_url.clone(),
                    reason: format!("{} without Location", response.status),
                })
            }
        };
        debug!(peer = %self.base_url, location = %location, "following redirect");

        let followed = self.send(&request.redirected(location.clone())).await?;
        if followed.is_redirect() {
            return Err(ReplicationError::RedirectLoop {
                peer: self.base_url.clone(),
                location: followed.location().unwrap_or_default().to_string(),
            });
        }

        if let Some(new_base) = location.strip_suffix(path) {
            info!(peer = %self.base_url, target = %new_base, "caching redirect target");
            *self.redirected_base.write().await = Some(new_base.to_string());
        }
        Ok(followed)
    }

    async fn send(&self, request: &HttpRequest) -> ReplicationResult<HttpResponse> {
        match self.http.execute(request.clone()).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if self.redirected_base.write().await.take().is_some() {
                    warn!(peer = %self.base_url, error = %e, "redirect target failed, dropping it");
                }
                Err(ReplicationError::http(&self.base_url, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Action;
    use eddy_core::{InstanceFields, InstanceId, InstanceInfo, InstanceStatus};
    use eddy_dst::{DeterministicRng, FaultInjectorBuilder, SimHttpClient};

    fn sim_http() -> Arc<SimHttpClient> {
        let faults = Arc::new(FaultInjectorBuilder::new(DeterministicRng::new(7)).build());
        Arc::new(SimHttpClient::new(faults))
    }

    fn client(http: Arc<SimHttpClient>) -> PeerClient {
        PeerClient::new("node-a", "http://node-b/", http, Duration::from_secs(1))
    }

    fn instance(ldt: u64) -> InstanceInfo {
        InstanceInfo::new(InstanceFields {
            id: "i-1".into(),
            app: "X".into(),
            status: InstanceStatus::Up,
            last_dirty_timestamp: ldt,
            ..Default::default()
        })
        .unwrap()
    }

    fn ok_body(count: usize) -> String {
        serde_json::to_string(&vec![ItemResponse::status(200); count]).unwrap()
    }

    #[tokio::test]
    async fn test_batch_posts_with_peer_header() {
        let http = sim_http();
        http.script("http://node-b/peerreplication/batch", HttpResponse::new(200, ok_body(1)))
            .await;
        let client = client(http.clone());

        let responses = client
            .submit_batch(&[ReplicationItem::register(&instance(1))])
            .await
            .unwrap();
        assert_eq!(responses, vec![ItemResponse::status(200)]);

        let sent = http.requests().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].method, "POST");
        assert_eq!(
            sent[0].headers.get(PEER_NODE_HEADER).map(String::as_str),
            Some("node-a")
        );
        let items: Vec<ReplicationItem> =
            serde_json::from_str(sent[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(items[0].action, Action::Register);
    }

    #[tokio::test]
    async fn test_length_mismatch_is_error() {
        let http = sim_http();
        http.script("http://node-b/peerreplication/batch", HttpResponse::new(200, ok_body(1)))
            .await;
        let client = client(http);

        let items = vec![
            ReplicationItem::register(&instance(1)),
            ReplicationItem::unregister("X", InstanceId::new("i-1").unwrap(), 2),
        ];
        let err = client.submit_batch(&items).await.unwrap_err();
        assert!(matches!(
            err,
            ReplicationError::ResponseMismatch {
                sent: 2,
                received: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_busy_peer() {
        let http = sim_http();
        http.script("http://node-b/peerreplication/batch", HttpResponse::new(503, ""))
            .await;
        let err = client(http)
            .submit_batch(&[ReplicationItem::register(&instance(1))])
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicationError::ServerBusy { .. }));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_redirect_followed_once_and_cached() {
        let http = sim_http();
        http.script(
            "http://node-b/peerreplication/batch",
            HttpResponse::new(307, "").with_header("Location", "http://node-c/peerreplication/batch"),
        )
        .await;
        http.script("http://node-c/peerreplication/batch", HttpResponse::new(200, ok_body(1)))
            .await;
        http.script("http://node-c/peerreplication/batch", HttpResponse::new(200, ok_body(1)))
            .await;
        let client = client(http.clone());
        let items = [ReplicationItem::register(&instance(1))];

        client.submit_batch(&items).await.unwrap();
        assert_eq!(client.redirected_base().await.as_deref(), Some("http://node-c"));

        // Second batch goes straight to the cached target
        client.submit_batch(&items).await.unwrap();
        assert_eq!(http.requests_to("http://node-b").await.len(), 1);
        assert_eq!(http.requests_to("http://node-c").await.len(), 2);
    }

    #[tokio::test]
    async fn test_second_redirect_is_hard_failure() {
        let http = sim_http();
        http.script(
            "http://node-b/peerreplication/batch",
            HttpResponse::new(302, "").with_header("Location", "/elsewhere/peerreplication/batch"),
        )
        .await;
        http.script(
            "http://node-b/elsewhere",
            HttpResponse::new(302, "").with_header("Location", "http://node-d/peerreplication/batch"),
        )
        .await;
        let err = client(http)
            .submit_batch(&[ReplicationItem::register(&instance(1))])
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicationError::RedirectLoop { .. }));
        assert!(!err.is_retriable());
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_retriable() {
        let http = sim_http();
        http.partition("http://node-b").await;
        let err = client(http)
            .submit_batch(&[ReplicationItem::register(&instance(1))])
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicationError::Http { .. }));
        assert!(err.is_retriable());
    }
}
