use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use fetchbox_core::{
    FetchValue, Fingerprint, Payload, Provenance, ResponseHeaders, ResponseSource, Transport,
};
use http::Method;
use pin_project::pin_project;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::config::{RequestConfig, RequestData};
use crate::engine::{Engine, SharedFetch};
use crate::error::{Error, FetchError};
use crate::interceptor::Interceptors;
use crate::timer::PendingTimers;

/// A settled request result with its cache provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    value: FetchValue,
    provenance: Provenance,
}

impl Response {
    /// Returns the result value.
    pub fn value(&self) -> &FetchValue {
        &self.value
    }

    /// Consumes the response, returning the value.
    pub fn into_value(self) -> FetchValue {
        self.value
    }

    /// Returns the decoded body, if the value has one.
    pub fn data(&self) -> Option<&Payload> {
        self.value.payload()
    }

    /// Returns the selected response headers, if any.
    pub fn headers(&self) -> Option<&ResponseHeaders> {
        self.value.headers()
    }

    /// Returns where the result came from.
    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// `true` when the result was shared from the in-memory cache.
    pub fn is_from_memory_cache(&self) -> bool {
        self.provenance.is_from_memory_cache()
    }

    /// `true` when the result was read from the external cache store.
    pub fn is_from_store_cache(&self) -> bool {
        self.provenance.is_from_store_cache()
    }

    /// Deserializes the body into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        self.value.deserialize()
    }
}

/// Body and selected headers of a `*_with_headers` call.
#[derive(Debug, Clone, PartialEq)]
pub struct WithHeaders<T> {
    /// Decoded body.
    pub data: T,
    /// Selected response headers. Absent headers map to `None`.
    pub headers: ResponseHeaders,
}

impl<T: DeserializeOwned> WithHeaders<T> {
    fn from_response(response: &Response) -> Result<Self, Error> {
        Ok(WithHeaders {
            data: response.deserialize()?,
            headers: response.headers().cloned().unwrap_or_default(),
        })
    }
}

/// Cancels the transport of one request.
///
/// Deduplicated callers share one transport call, so aborting one of them
/// aborts it for all.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    signal: CancellationToken,
}

impl AbortHandle {
    /// Cancels the request.
    pub fn abort(&self) {
        self.signal.cancel();
    }

    /// `true` once the request was cancelled, by the caller or by its deadline.
    pub fn is_aborted(&self) -> bool {
        self.signal.is_cancelled()
    }
}

/// A request in flight.
///
/// The request runs on its own task and completes even if the handle is
/// dropped. Awaiting the handle yields the [`Response`].
#[pin_project]
#[must_use = "the handle yields the response; dropping it does not cancel the request"]
pub struct FetchHandle {
    #[pin]
    result: SharedFetch,
    config: Arc<RequestConfig>,
    from_memory: bool,
    signal: CancellationToken,
}

impl FetchHandle {
    /// `true` when the request joined a live in-memory entry.
    pub fn is_from_memory_cache(&self) -> bool {
        self.from_memory
    }

    /// Returns the merged configuration after request interceptors ran.
    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    /// Returns a handle that cancels the transport.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            signal: self.signal.clone(),
        }
    }

    /// Cancels the transport.
    pub fn abort(&self) {
        self.signal.cancel();
    }
}

impl Future for FetchHandle {
    type Output = Result<Response, FetchError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let fetched = ready!(this.result.poll(cx));
        let from_memory = *this.from_memory;
        Poll::Ready(fetched.map(|fetched| Response {
            value: fetched.value,
            provenance: Provenance::new(if from_memory {
                ResponseSource::Memory
            } else {
                fetched.source
            }),
        }))
    }
}

/// A request in flight that deserializes its body into `T`.
#[pin_project]
#[must_use = "the future yields the decoded body"]
pub struct Decoded<T> {
    #[pin]
    handle: FetchHandle,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Decoded<T> {
    fn new(handle: FetchHandle) -> Self {
        Decoded {
            handle,
            _marker: PhantomData,
        }
    }

    /// Returns a handle that cancels the transport.
    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.abort_handle()
    }

    /// `true` when the request joined a live in-memory entry.
    pub fn is_from_memory_cache(&self) -> bool {
        self.handle.is_from_memory_cache()
    }
}

impl<T: DeserializeOwned> Future for Decoded<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let response = ready!(self.project().handle.poll(cx))?;
        Poll::Ready(response.deserialize().map_err(Error::from))
    }
}

/// Builder for [`Fetchbox`].
pub struct FetchboxBuilder {
    transport: Arc<dyn Transport>,
    defaults: RequestConfig,
}

impl FetchboxBuilder {
    /// Creates a builder around a transport with the built-in defaults.
    pub fn new<T>(transport: T) -> Self
    where
        T: Transport + 'static,
    {
        FetchboxBuilder {
            transport: Arc::new(transport),
            defaults: RequestConfig::defaults(),
        }
    }

    /// Layers `defaults` over the built-in defaults.
    pub fn defaults(mut self, defaults: RequestConfig) -> Self {
        self.defaults = self.defaults.merge(defaults);
        self
    }

    /// Builds the client.
    pub fn build(self) -> Fetchbox {
        Fetchbox {
            engine: Engine::new(self.transport, self.defaults),
        }
    }
}

/// HTTP client facade with interceptors, deduplication and caching.
///
/// Cloning a `Fetchbox` is cheap; clones share the cache, the interceptors
/// and the timers. Requests are spawned on the current tokio runtime, so
/// every request method must be called from within one.
///
/// ```no_run
/// use fetchbox::{Fetchbox, RequestConfig};
/// use fetchbox_reqwest::ReqwestTransport;
/// use std::time::Duration;
///
/// # async fn run() -> Result<(), fetchbox::Error> {
/// let client = Fetchbox::builder(ReqwestTransport::new(reqwest::Client::new()))
///     .defaults(RequestConfig::default().with_base_url("https://api.example.com"))
///     .build();
///
/// let options = RequestConfig::default().with_cache_timeout(Duration::from_secs(30));
/// let users: serde_json::Value = client.get("/users", None, options).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Fetchbox {
    engine: Arc<Engine>,
}

impl std::fmt::Debug for Fetchbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetchbox")
            .field("defaults", self.engine.defaults())
            .field("cached_entries", &self.engine.cached_entries())
            .field("pending_timers", &self.engine.pending_timers())
            .finish()
    }
}

fn method_config(method: Method, url: &str, data: Option<RequestData>) -> RequestConfig {
    RequestConfig {
        data,
        ..RequestConfig::new(method, url)
    }
}

fn require_header_keys(options: &RequestConfig) -> Result<(), Error> {
    match &options.response_header_keys {
        Some(keys) if !keys.is_empty() => Ok(()),
        _ => Err(Error::MissingResponseHeaderKeys),
    }
}

impl Fetchbox {
    /// Creates a client with the built-in defaults.
    pub fn new<T>(transport: T) -> Self
    where
        T: Transport + 'static,
    {
        FetchboxBuilder::new(transport).build()
    }

    /// Creates a builder.
    pub fn builder<T>(transport: T) -> FetchboxBuilder
    where
        T: Transport + 'static,
    {
        FetchboxBuilder::new(transport)
    }

    /// Returns the request and response interceptor chains.
    pub fn interceptors(&self) -> &Interceptors {
        self.engine.interceptors()
    }

    /// Returns the client defaults.
    pub fn defaults(&self) -> &RequestConfig {
        self.engine.defaults()
    }

    /// Computes the fingerprint `config` resolves to, after merging and interceptors.
    pub fn fingerprint(&self, config: RequestConfig) -> Result<Fingerprint, Error> {
        Ok(self.engine.prepare(config)?.fingerprint())
    }

    /// Starts a request.
    ///
    /// Fails only when a request interceptor rejects the configuration; in
    /// that case nothing is sent.
    pub fn request(&self, config: RequestConfig) -> Result<FetchHandle, Error> {
        let resolution = self.engine.resolve(config, false)?;
        Ok(FetchHandle {
            result: resolution.result,
            config: resolution.config,
            from_memory: resolution.from_memory,
            signal: resolution.signal,
        })
    }

    /// Starts a request and waits for its response.
    pub async fn fetch(&self, config: RequestConfig) -> Result<Response, Error> {
        Ok(self.request(config)?.await?)
    }

    /// Starts a request whose body deserializes into `T`, with its abort handle.
    pub fn request_abortable<T>(
        &self,
        config: RequestConfig,
    ) -> Result<(Decoded<T>, AbortHandle), Error> {
        let handle = self.request(config)?;
        let abort = handle.abort_handle();
        Ok((Decoded::new(handle), abort))
    }

    /// `GET` request; `data` becomes the query string.
    pub async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        data: Option<RequestData>,
        options: RequestConfig,
    ) -> Result<T, Error> {
        Decoded::new(self.request(method_config(Method::GET, url, data).merge(options))?).await
    }

    /// `POST` request; `data` becomes the body.
    pub async fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        data: impl Into<RequestData>,
        options: RequestConfig,
    ) -> Result<T, Error> {
        let config = method_config(Method::POST, url, Some(data.into())).merge(options);
        Decoded::new(self.request(config)?).await
    }

    /// `GET` request returning the body with the headers named in
    /// `options.response_header_keys`, which must not be empty.
    pub async fn get_with_headers<T: DeserializeOwned>(
        &self,
        url: &str,
        data: Option<RequestData>,
        options: RequestConfig,
    ) -> Result<WithHeaders<T>, Error> {
        require_header_keys(&options)?;
        let response = self
            .fetch(method_config(Method::GET, url, data).merge(options))
            .await?;
        WithHeaders::from_response(&response)
    }

    /// `POST` request returning the body with the headers named in
    /// `options.response_header_keys`, which must not be empty.
    pub async fn post_with_headers<T: DeserializeOwned>(
        &self,
        url: &str,
        data: impl Into<RequestData>,
        options: RequestConfig,
    ) -> Result<WithHeaders<T>, Error> {
        require_header_keys(&options)?;
        let config = method_config(Method::POST, url, Some(data.into())).merge(options);
        let response = self.fetch(config).await?;
        WithHeaders::from_response(&response)
    }

    /// `GET` request paired with its abort handle.
    pub fn get_abortable<T>(
        &self,
        url: &str,
        data: Option<RequestData>,
        options: RequestConfig,
    ) -> Result<(Decoded<T>, AbortHandle), Error> {
        self.request_abortable(method_config(Method::GET, url, data).merge(options))
    }

    /// `POST` request paired with its abort handle.
    pub fn post_abortable<T>(
        &self,
        url: &str,
        data: impl Into<RequestData>,
        options: RequestConfig,
    ) -> Result<(Decoded<T>, AbortHandle), Error> {
        self.request_abortable(
            method_config(Method::POST, url, Some(data.into())).merge(options),
        )
    }

    /// Drops the cached result of the request `config` describes.
    ///
    /// The configuration is merged and intercepted exactly like a request, so
    /// pass the same configuration the request was made with. The entry is
    /// removed from memory, any scheduled eviction or revalidation for it is
    /// cancelled, and then it is deleted from the cache store. A store error is
    /// returned only after memory and timers are cleared.
    ///
    /// A revalidation already in flight is left to finish; its result is
    /// written through to a configured store but is not kept in memory.
    pub async fn clear_cache(&self, config: RequestConfig) -> Result<(), Error> {
        self.engine.clear(config).await
    }

    /// Cancels the transport of every live cache entry, then every timer.
    pub fn abort_all(&self) {
        self.engine.abort_all();
    }

    /// Cancels every pending eviction, revalidation and deadline timer.
    ///
    /// Entries whose eviction timer is cancelled stay in memory until
    /// cleared. Requests whose deadline is cancelled wait for the transport.
    pub fn clear_all_timers(&self) {
        self.engine.clear_all_timers();
    }

    /// Aborts everything in flight, cancels every timer and empties the
    /// in-memory cache.
    pub fn teardown(&self) {
        self.engine.teardown();
    }

    /// Number of pending timers per kind.
    pub fn pending_timers(&self) -> PendingTimers {
        self.engine.pending_timers()
    }

    /// Number of live in-memory entries, pending or settled.
    pub fn cached_entries(&self) -> usize {
        self.engine.cached_entries()
    }

    /// `true` when a live in-memory entry exists for `fingerprint`.
    pub fn is_cached(&self, fingerprint: &Fingerprint) -> bool {
        self.engine.is_cached(fingerprint)
    }
}
