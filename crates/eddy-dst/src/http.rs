//! Simulated HTTP network for DST
//!
//! TigerStyle: Deterministic HTTP simulation with fault injection.
//!
//! [`SimHttpClient`] implements [`HttpClient`] by routing each request to an
//! in-process [`SimRoute`] registered under a base URL. Tests can:
//! - partition a base URL (requests fail with `ConnectionFailed`)
//! - script one-shot responses that pre-empt the route (503, redirects)
//! - inject probabilistic faults through a [`FaultInjector`]
//! - inspect every request afterwards

use crate::fault::{FaultInjector, FaultType};
use async_trait::async_trait;
use eddy_core::http::{HttpClient, HttpError, HttpRequest, HttpResponse, HttpResult};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Maximum recorded requests
const RECORDED_REQUESTS_MAX: usize = 10_000;

// =============================================================================
// Routes
// =============================================================================

/// An in-process HTTP endpoint
#[async_trait]
pub trait SimRoute: Send + Sync {
    /// Serve one request
    async fn handle(&self, request: HttpRequest) -> HttpResponse;
}

/// Recorded HTTP request for verification
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    /// Monotonic sequence number
    pub sequence: u64,
    /// Name of the injected fault, if any
    pub fault_injected: Option<String>,
    /// Response status, if a response was produced
    pub response_status: Option<u16>,
}

// =============================================================================
// SimHttpClient
// =============================================================================

/// Simulated HTTP client routing to in-process peers
pub struct SimHttpClient {
    faults: Arc<FaultInjector>,
    routes: RwLock<Vec<(String, Arc<dyn SimRoute>)>>,
    scripted: RwLock<HashMap<String, VecDeque<HttpResponse>>>,
    partitioned: RwLock<HashSet<String>>,
    recorded_requests: RwLock<Vec<RecordedRequest>>,
    request_count: AtomicU64,
}

impl SimHttpClient {
    /// Create a client with the given fault injector and no routes
    pub fn new(faults: Arc<FaultInjector>) -> Self {
        Self {
            faults,
            routes: RwLock::new(Vec::new()),
            scripted: RwLock::new(HashMap::new()),
            partitioned: RwLock::new(HashSet::new()),
            recorded_requests: RwLock::new(Vec::new()),
            request_count: AtomicU64::new(0),
        }
    }

    /// Serve requests under `base_url` with `route`
    pub async fn route(&self, base_url: impl Into<String>, route: Arc<dyn SimRoute>) {
        self.routes.write().await.push((base_url.into(), route));
    }

    /// Queue a one-shot response for the next request under `url_prefix`
    pub async fn script(&self, url_prefix: impl Into<String>, response: HttpResponse) {
        self.scripted
            .write()
            .await
            .entry(url_prefix.into())
            .or_default()
            .push_back(response);
    }

    /// Make every request under `base_url` fail to connect
    pub async fn partition(&self, base_url: impl Into<String>) {
        self.partitioned.write().await.insert(base_url.into());
    }

    /// Undo [`partition`](Self::partition)
    pub async fn heal(&self, base_url: &str) {
        self.partitioned.write().await.remove(base_url);
    }

    /// All recorded requests
    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.recorded_requests.read().await.clone()
    }

    /// Recorded requests whose URL starts with `prefix`
    pub async fn requests_to(&self, prefix: &str) -> Vec<RecordedRequest> {
        self.recorded_requests
            .read()
            .await
            .iter()
            .filter(|r| r.url.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Number of requests executed
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::SeqCst)
    }

    async fn record(&self, request: &HttpRequest, fault: Option<&str>, status: Option<u16>) {
        let mut requests = self.recorded_requests.write().await;
        if requests.len() >= RECORDED_REQUESTS_MAX {
            requests.remove(0);
        }
        let sequence = self.request_count.fetch_add(1, Ordering::SeqCst);
        requests.push(RecordedRequest {
            url: request.url.clone(),
            method: request.method.to_string(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            sequence,
            fault_injected: fault.map(str::to_string),
            response_status: status,
        });
    }

    async fn take_scripted(&self, url: &str) -> Option<HttpResponse> {
        let mut scripted = self.scripted.write().await;
        let key = scripted
            .iter()
            .filter(|(prefix, queue)| url.starts_with(prefix.as_str()) && !queue.is_empty())
            .map(|(prefix, _)| prefix.clone())
            .max_by_key(String::len)?;
        scripted.get_mut(&key).and_then(VecDeque::pop_front)
    }

    async fn find_route(&self, url: &str) -> Option<Arc<dyn SimRoute>> {
        self.routes
            .read()
            .await
            .iter()
            .filter(|(base, _)| url.starts_with(base.as_str()))
            .max_by_key(|(base, _)| base.len())
            .map(|(_, route)| route.clone())
    }

    async fn is_partitioned(&self, url: &str) -> bool {
        self.partitioned
            .read()
            .await
            .iter()
            .any(|base| url.starts_with(base.as_str()))
    }
}

#[async_trait]
impl HttpClient for SimHttpClient {
    async fn execute(&self, request: HttpRequest) -> HttpResult<HttpResponse> {
        let operation = format!("http {} {}", request.method, request.url);

        if let Some(fault) = self.faults.should_inject(&operation) {
            self.record(&request, Some(fault.name()), None).await;
            return match fault {
                FaultType::PeerUnreachable => Err(HttpError::ConnectionFailed {
                    reason: "simulated connection refused".to_string(),
                }),
                FaultType::PeerTimeout { timeout_ms } => Err(HttpError::Timeout { timeout_ms }),
                FaultType::PeerServerError { status } => Ok(HttpResponse::new(
                    status,
                    format!("simulated {} error", status),
                )),
            };
        }

        if self.is_partitioned(&request.url).await {
            self.record(&request, Some("partition"), None).await;
            return Err(HttpError::ConnectionFailed {
                reason: format!("{} is partitioned", request.url),
            });
        }

        if let Some(response) = self.take_scripted(&request.url).await {
            self.record(&request, None, Some(response.status)).await;
            return Ok(response);
        }

        let Some(route) = self.find_route(&request.url).await else {
            self.record(&request, None, None).await;
            return Err(HttpError::ConnectionFailed {
                reason: format!("no route to {}", request.url),
            });
        };

        let recorded = request.clone();
        let response = route.handle(request).await;
        self.record(&recorded, None, Some(response.status)).await;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{FaultConfig, FaultInjectorBuilder};
    use crate::rng::DeterministicRng;

    struct Echo;

    #[async_trait]
    impl SimRoute for Echo {
        async fn handle(&self, request: HttpRequest) -> HttpResponse {
            HttpResponse::new(200, request.body.unwrap_or_default())
        }
    }

    fn no_faults() -> Arc<FaultInjector> {
        Arc::new(FaultInjectorBuilder::new(DeterministicRng::new(42)).build())
    }

    #[tokio::test]
    async fn test_routes_to_handler() {
        let client = SimHttpClient::new(no_faults());
        client.route("http://node-b", Arc::new(Echo)).await;

        let response = client
            .execute(HttpRequest::post("http://node-b/peerreplication/batch").with_json_body("[]"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "[]");
        assert_eq!(client.requests_to("http://node-b").await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_host_fails() {
        let client = SimHttpClient::new(no_faults());
        let result = client.execute(HttpRequest::get("http://nowhere/")).await;
        assert!(matches!(result, Err(HttpError::ConnectionFailed { .. })));
    }

    #[tokio::test]
    async fn test_scripted_response_is_one_shot() {
        let client = SimHttpClient::new(no_faults());
        client.route("http://node-b", Arc::new(Echo)).await;
        client
            .script("http://node-b", HttpResponse::new(503, "busy"))
            .await;

        let first = client.execute(HttpRequest::get("http://node-b/x")).await.unwrap();
        let second = client.execute(HttpRequest::get("http://node-b/x")).await.unwrap();
        assert_eq!(first.status, 503);
        assert_eq!(second.status, 200);
    }

    #[tokio::test]
    async fn test_partition_and_heal() {
        let client = SimHttpClient::new(no_faults());
        client.route("http://node-b", Arc::new(Echo)).await;

        client.partition("http://node-b").await;
        assert!(client.execute(HttpRequest::get("http://node-b/")).await.is_err());

        client.heal("http://node-b").await;
        assert!(client.execute(HttpRequest::get("http://node-b/")).await.is_ok());
    }

    #[tokio::test]
    async fn test_injected_fault() {
        let faults = Arc::new(
            FaultInjectorBuilder::new(DeterministicRng::new(42))
                .with_fault(FaultConfig::new(FaultType::PeerTimeout { timeout_ms: 50 }, 1.0))
                .build(),
        );
        let client = SimHttpClient::new(faults);
        client.route("http://node-b", Arc::new(Echo)).await;

        let result = client.execute(HttpRequest::get("http://node-b/")).await;
        assert!(matches!(result, Err(HttpError::Timeout { timeout_ms: 50 })));

        let requests = client.requests().await;
        assert_eq!(requests[0].fault_injected.as_deref(), Some("peer_timeout"));
    }
}
