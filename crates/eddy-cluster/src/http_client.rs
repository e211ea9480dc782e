//! Production HTTP client
//!
//! TigerStyle: reqwest behind the [`HttpClient`] trait so replication can run
//! against `SimHttpClient` in tests.
//!
//! Redirects are never followed here; the peer client decides how many hops
//! a request may take.

use crate::error::{ReplicationError, ReplicationResult};
use async_trait::async_trait;
use eddy_core::http::{
    HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, HttpResult,
    HTTP_CLIENT_RESPONSE_BYTES_MAX, HTTP_CLIENT_TIMEOUT_MS_DEFAULT,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// reqwest-backed HTTP client
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Client with the default timeout
    pub fn new() -> ReplicationResult<Self> {
        Self::with_timeout(Duration::from_millis(HTTP_CLIENT_TIMEOUT_MS_DEFAULT))
    }

    /// Client with a custom timeout
    pub fn with_timeout(timeout: Duration) -> ReplicationResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ReplicationError::ClientSetup {
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> HttpResult<HttpResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
            HttpMethod::Put => self.client.put(&request.url),
            HttpMethod::Delete => self.client.delete(&request.url),
        };

        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        builder = builder.timeout(request.timeout);

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout {
                    timeout_ms: request.timeout.as_millis() as u64,
                }
            } else if e.is_connect() {
                HttpError::ConnectionFailed {
                    reason: e.to_string(),
                }
            } else if e.is_builder() {
                HttpError::InvalidUrl {
                    url: request.url.clone(),
                }
            } else {
                HttpError::RequestFailed {
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.to_string(), v.to_string());
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| HttpError::RequestFailed {
                reason: e.to_string(),
            })?;

        if body.len() as u64 > HTTP_CLIENT_RESPONSE_BYTES_MAX {
            return Err(HttpError::ResponseTooLarge {
                size: body.len() as u64,
                max: HTTP_CLIENT_RESPONSE_BYTES_MAX,
            });
        }

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Default client for talking to peers
pub fn default_http_client(timeout: Duration) -> ReplicationResult<Arc<dyn HttpClient>> {
    Ok(Arc::new(ReqwestHttpClient::with_timeout(timeout)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds() {
        assert!(ReqwestHttpClient::new().is_ok());
        assert!(default_http_client(Duration::from_millis(500)).is_ok());
    }

    #[tokio::test]
    async fn test_invalid_url_is_an_error() {
        let client = ReqwestHttpClient::new().unwrap();
        let result = client.execute(HttpRequest::get("not a url")).await;
        assert!(result.is_err());
    }
}
