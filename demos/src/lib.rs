//! Shared pieces of the fetchbox demos.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fetchbox::{RawResponse, Transport, TransportError, TransportRequest};
use http::{HeaderMap, HeaderValue, StatusCode, header::CONTENT_TYPE};
use tracing_subscriber::EnvFilter;

/// In-process transport that answers every request with a JSON document
/// describing it, after a fixed latency.
#[derive(Debug)]
pub struct EchoTransport {
    latency: Duration,
    calls: AtomicUsize,
}

impl EchoTransport {
    /// Creates a transport answering after `latency`.
    pub fn new(latency: Duration) -> Self {
        EchoTransport {
            latency,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Transport for EchoTransport {
    async fn invoke(&self, request: TransportRequest) -> Result<RawResponse, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::select! {
            _ = request.signal.cancelled() => return Err(TransportError::Aborted),
            _ = tokio::time::sleep(self.latency) => {}
        }
        tracing::info!(call, method = %request.method, url = %request.url, "echo transport called");

        let body = serde_json::json!({
            "call": call,
            "method": request.method.as_str(),
            "url": request.url,
        });
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-call", HeaderValue::from(call));
        Ok(RawResponse::new(
            StatusCode::OK,
            headers,
            Bytes::from(body.to_string()),
        ))
    }

    fn name(&self) -> &str {
        "echo"
    }
}

/// Installs a `fmt` subscriber honouring `RUST_LOG`, defaulting to `info,fetchbox=debug`.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fetchbox=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
