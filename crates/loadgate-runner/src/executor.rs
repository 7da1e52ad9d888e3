//! Request executor seam.
//!
//! The engine never speaks HTTP itself. Workers hand an [`HttpRequest`] to a
//! [`RequestExecutor`] and turn whatever comes back into samples.

use async_trait::async_trait;
use loadgate_core::RequestTemplate;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// One request to issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Upper-case HTTP method.
    pub method: String,
    /// Target URL.
    pub url: String,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
    /// Request body.
    pub body: Option<String>,
    /// Deadline for the whole exchange.
    pub timeout: Duration,
}

impl From<&RequestTemplate> for HttpRequest {
    fn from(template: &RequestTemplate) -> Self {
        Self {
            method: template.method.clone(),
            url: template.url.clone(),
            headers: template.headers.clone(),
            body: template.body.clone(),
            timeout: template.timeout,
        }
    }
}

impl HttpRequest {
    /// Bytes put on the wire for the body.
    #[must_use]
    pub fn body_len(&self) -> u64 {
        self.body.as_ref().map_or(0, |b| b.len() as u64)
    }
}

/// Outcome of a request that reached the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Time from send to full body.
    pub latency: Duration,
    /// Response bytes.
    pub bytes_received: u64,
    /// Request bytes.
    pub bytes_sent: u64,
}

impl HttpResponse {
    /// 4xx and 5xx responses count as failed requests.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status >= 400
    }
}

/// Request that never produced a response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Deadline exceeded.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other transport failure.
    #[error("request failed: {0}")]
    Request(String),
}

impl TransportError {
    /// Short value for the `error` sample tag.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Connect(_) => "connect",
            Self::Request(_) => "request",
        }
    }
}

/// Capability that performs requests on behalf of workers.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// Issues `request` and reports what happened.
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}
