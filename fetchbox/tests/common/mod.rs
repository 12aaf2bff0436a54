#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fetchbox::{
    DeleteStatus, Fingerprint, RawResponse, SetOptions, Store, StoreError, Transport,
    TransportError, TransportRequest,
};
use fetchbox_store::{MemoryStore, Raw, StoreResult};
use http::{HeaderMap, HeaderValue, StatusCode, header::CONTENT_TYPE};
use serde_json::{Value, json};

/// Scripted reply of the mock transport.
#[derive(Debug, Clone)]
pub struct Reply {
    status: u16,
    content_type: &'static str,
    body: String,
    headers: Vec<(&'static str, String)>,
    delay: Duration,
    fail: bool,
}

impl Reply {
    pub fn json(value: Value) -> Self {
        Reply {
            status: 200,
            content_type: "application/json",
            body: value.to_string(),
            headers: Vec::new(),
            delay: Duration::from_millis(10),
            fail: false,
        }
    }

    pub fn text(text: &str) -> Self {
        Reply {
            content_type: "text/plain",
            body: text.to_owned(),
            ..Reply::json(Value::Null)
        }
    }

    pub fn connection_error() -> Self {
        Reply {
            fail: true,
            ..Reply::text("")
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.push((name, value.to_owned()));
        self
    }
}

type Handler = dyn Fn(&TransportRequest, usize) -> Reply + Send + Sync;

/// Transport double: counts calls, records requests and replies from a script.
#[derive(Clone)]
pub struct MockTransport {
    calls: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<TransportRequest>>>,
    handler: Arc<Handler>,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&TransportRequest, usize) -> Reply + Send + Sync + 'static,
    {
        MockTransport {
            calls: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            handler: Arc::new(handler),
        }
    }

    /// Replies with `{"call": n, "url": ...}` after 10ms.
    pub fn counting() -> Self {
        MockTransport::new(|request, call| Reply::json(json!({"call": call, "url": request.url})))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls that ran to completion without being aborted.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> TransportRequest {
        self.requests().pop().expect("no request was sent")
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn invoke(&self, request: TransportRequest) -> Result<RawResponse, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let reply = (self.handler)(&request, call);
        self.requests.lock().unwrap().push(request.clone());

        tokio::select! {
            _ = request.signal.cancelled() => return Err(TransportError::Aborted),
            _ = tokio::time::sleep(reply.delay) => {}
        }
        self.completed.fetch_add(1, Ordering::SeqCst);

        if reply.fail {
            return Err(TransportError::Connection("connection refused".into()));
        }
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(reply.content_type));
        for (name, value) in reply.headers {
            headers.insert(name, HeaderValue::from_str(&value).unwrap());
        }
        Ok(RawResponse::new(
            StatusCode::from_u16(reply.status).unwrap(),
            headers,
            Bytes::from(reply.body),
        ))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Store wrapper counting operations, optionally failing every call.
#[derive(Clone, Default)]
pub struct CountingStore {
    inner: MemoryStore,
    pub gets: Arc<AtomicUsize>,
    pub sets: Arc<AtomicUsize>,
    pub deletes: Arc<AtomicUsize>,
    pub broken: bool,
}

impl CountingStore {
    pub fn broken() -> Self {
        CountingStore {
            broken: true,
            ..Default::default()
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn check(&self) -> StoreResult<()> {
        if self.broken {
            Err(StoreError::ConnectionError("store is down".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store for CountingStore {
    async fn get(&self, key: &Fingerprint) -> StoreResult<Option<Raw>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &Fingerprint, value: Raw, options: SetOptions) -> StoreResult<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.set(key, value, options).await
    }

    async fn delete(&self, key: &Fingerprint) -> StoreResult<DeleteStatus> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.delete(key).await
    }

    async fn size(&self) -> StoreResult<usize> {
        self.inner.size().await
    }

    fn name(&self) -> &str {
        "counting"
    }
}

/// Reads the `call` counter of a [`MockTransport::counting`] reply.
pub fn call_of(value: &Value) -> u64 {
    value["call"].as_u64().expect("reply has a call counter")
}
