//! Request configuration.
//!
//! Every recognized option lives on [`RequestConfig`] as an `Option`, so a
//! per-call configuration can be layered over client defaults with
//! [`RequestConfig::merge`]. A field set on the override replaces the default
//! wholesale; headers are not merged key by key.
//!
//! Client defaults can be loaded from YAML or JSON. Durations use humantime
//! notation:
//!
//! ```yaml
//! base_url: https://api.example.com
//! timeout: 30s
//! cache_timeout: 5m
//! revalidate_time: 30s
//! ignore: [404]
//! headers:
//!   x-client: fetchbox
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use fetchbox_core::{Credentials, Fingerprint, FormPart, RequestMode};
use fetchbox_store::Store;
use http::{HeaderMap, Method};
use serde::Deserialize;
use smol_str::SmolStr;
use tokio_util::sync::CancellationToken;

/// Default deadline of a request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
/// Default message of a timeout error.
pub const DEFAULT_TIMEOUT_ERROR_MESSAGE: &str = "timeout";
/// Default status of a timeout error.
pub const DEFAULT_TIMEOUT_ERROR_STATUS: u16 = 504;
/// Default content type of `POST` and `PUT` bodies.
pub const DEFAULT_PUT_POST_CONTENT_TYPE: &str = "application/json; charset=UTF-8";
/// Header keys copied from an origin request by default.
pub const DEFAULT_INJECT_HEADER_KEYS: [&str; 5] = [
    "x-request-id",
    "x-b3-traceid",
    "x-b3-spanid",
    "x-b3-parentspanid",
    "x-b3-sampled",
];

/// Request payload.
///
/// For `GET` requests the payload is embedded into the query string; for
/// other methods it becomes the body.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestData {
    /// JSON document. Objects become `key=value` pairs for `GET`.
    Json(serde_json::Value),
    /// Text sent verbatim (appended verbatim to the query string for `GET`).
    Text(String),
    /// Multipart form. Always sent as a file upload.
    Multipart(Vec<FormPart>),
}

impl RequestData {
    /// Canonical text of the payload used for fingerprinting.
    ///
    /// JSON objects serialize with sorted keys, so key order never matters.
    pub fn canonical(&self) -> String {
        match self {
            RequestData::Json(value) => sorted(value).to_string(),
            RequestData::Text(text) => text.clone(),
            RequestData::Multipart(parts) => serde_json::to_string(parts).unwrap_or_default(),
        }
    }
}

fn sorted(value: &serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), sorted(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

impl From<serde_json::Value> for RequestData {
    fn from(value: serde_json::Value) -> Self {
        RequestData::Json(value)
    }
}

impl From<&str> for RequestData {
    fn from(value: &str) -> Self {
        RequestData::Text(value.to_owned())
    }
}

impl From<String> for RequestData {
    fn from(value: String) -> Self {
        RequestData::Text(value)
    }
}

impl From<Vec<FormPart>> for RequestData {
    fn from(value: Vec<FormPart>) -> Self {
        RequestData::Multipart(value)
    }
}

/// Normalized request description.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Prefix joined with relative URLs.
    pub base_url: Option<String>,
    /// Request URL, absolute or relative to `base_url`.
    pub url: Option<String>,
    /// HTTP method. Defaults to `POST`.
    #[serde(with = "method_serde")]
    pub method: Option<Method>,
    /// Payload: query parameters for `GET`, body otherwise.
    #[serde(skip)]
    pub data: Option<RequestData>,
    /// Query parameters for non-`GET` requests (object or string).
    pub query: Option<serde_json::Value>,
    /// Outgoing headers.
    #[serde(with = "headers_serde")]
    pub headers: Option<HeaderMap>,
    /// Deadline of the transport call.
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Message of the timeout error.
    pub timeout_error_message: Option<String>,
    /// Status of the timeout error.
    pub timeout_error_status: Option<u16>,
    /// Lifetime of a cached result. Zero disables caching; `None` caches until cleared.
    #[serde(with = "humantime_serde")]
    pub cache_timeout: Option<Duration>,
    /// Delay before a result served from cache is refreshed in the background.
    #[serde(with = "humantime_serde")]
    pub revalidate_time: Option<Duration>,
    /// External cache store.
    #[serde(skip)]
    pub cache_store: Option<Arc<dyn Store>>,
    /// Return the untouched transport response. Disables caching.
    pub is_use_origin: Option<bool>,
    /// Send object payloads as multipart form data.
    pub is_file: Option<bool>,
    /// Percent-encode `GET` query parameters twice.
    pub is_encode_url: Option<bool>,
    /// Statuses that are not treated as errors.
    pub ignore: Option<Vec<u16>>,
    /// Response headers copied into the result.
    pub response_header_keys: Option<Vec<SmolStr>>,
    /// Cookie policy.
    pub credentials: Option<Credentials>,
    /// Request mode.
    pub mode: Option<RequestMode>,
    /// Emit debug events for cache reads.
    pub is_debug: Option<bool>,
    /// Headers of the request being served, for trace propagation.
    #[serde(skip)]
    pub origin_headers: Option<HeaderMap>,
    /// Keys copied from `origin_headers` into the outgoing request.
    pub inject_header_keys: Option<Vec<SmolStr>>,
    /// Content type set on `POST` and `PUT` bodies without one.
    pub default_put_post_content_type: Option<String>,
    /// Caller cancellation signal.
    #[serde(skip)]
    pub signal: Option<CancellationToken>,
}

impl RequestConfig {
    /// Creates a configuration for a method and URL.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        RequestConfig {
            method: Some(method),
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// The built-in client defaults.
    pub fn defaults() -> Self {
        RequestConfig {
            method: Some(Method::POST),
            timeout: Some(DEFAULT_TIMEOUT),
            timeout_error_message: Some(DEFAULT_TIMEOUT_ERROR_MESSAGE.to_owned()),
            timeout_error_status: Some(DEFAULT_TIMEOUT_ERROR_STATUS),
            credentials: Some(Credentials::Include),
            mode: Some(RequestMode::Cors),
            is_debug: Some(false),
            default_put_post_content_type: Some(DEFAULT_PUT_POST_CONTENT_TYPE.to_owned()),
            inject_header_keys: Some(
                DEFAULT_INJECT_HEADER_KEYS
                    .iter()
                    .map(|key| SmolStr::new_static(key))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    /// Layers `overrides` over `self`. Fields set on `overrides` win.
    pub fn merge(self, overrides: RequestConfig) -> RequestConfig {
        RequestConfig {
            base_url: overrides.base_url.or(self.base_url),
            url: overrides.url.or(self.url),
            method: overrides.method.or(self.method),
            data: overrides.data.or(self.data),
            query: overrides.query.or(self.query),
            headers: overrides.headers.or(self.headers),
            timeout: overrides.timeout.or(self.timeout),
            timeout_error_message: overrides
                .timeout_error_message
                .or(self.timeout_error_message),
            timeout_error_status: overrides.timeout_error_status.or(self.timeout_error_status),
            cache_timeout: overrides.cache_timeout.or(self.cache_timeout),
            revalidate_time: overrides.revalidate_time.or(self.revalidate_time),
            cache_store: overrides.cache_store.or(self.cache_store),
            is_use_origin: overrides.is_use_origin.or(self.is_use_origin),
            is_file: overrides.is_file.or(self.is_file),
            is_encode_url: overrides.is_encode_url.or(self.is_encode_url),
            ignore: overrides.ignore.or(self.ignore),
            response_header_keys: overrides.response_header_keys.or(self.response_header_keys),
            credentials: overrides.credentials.or(self.credentials),
            mode: overrides.mode.or(self.mode),
            is_debug: overrides.is_debug.or(self.is_debug),
            origin_headers: overrides.origin_headers.or(self.origin_headers),
            inject_header_keys: overrides.inject_header_keys.or(self.inject_header_keys),
            default_put_post_content_type: overrides
                .default_put_post_content_type
                .or(self.default_put_post_content_type),
            signal: overrides.signal.or(self.signal),
        }
    }

    /// Computes the fingerprint of this configuration.
    ///
    /// Components, in order: base URL, URL, method, canonical body, then
    /// `name=value` header pairs sorted by name. Absent components hash as
    /// empty strings.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut builder = Fingerprint::builder()
            .component(self.base_url.as_deref().unwrap_or_default())
            .component(self.url.as_deref().unwrap_or_default())
            .component(self.method.as_ref().map(Method::as_str).unwrap_or_default())
            .component(
                self.data
                    .as_ref()
                    .map(RequestData::canonical)
                    .unwrap_or_default(),
            );
        if let Some(headers) = &self.headers {
            let mut pairs: Vec<(&str, &[u8])> = headers
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_bytes()))
                .collect();
            pairs.sort();
            for (name, value) in pairs {
                let mut pair = Vec::with_capacity(name.len() + value.len() + 1);
                pair.extend_from_slice(name.as_bytes());
                pair.push(b'=');
                pair.extend_from_slice(value);
                builder.push(pair);
            }
        }
        builder.build()
    }

    /// Resolved method.
    pub fn method(&self) -> Method {
        self.method.clone().unwrap_or(Method::POST)
    }

    /// Resolved deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Resolved timeout error message.
    pub fn timeout_error_message(&self) -> &str {
        self.timeout_error_message
            .as_deref()
            .unwrap_or(DEFAULT_TIMEOUT_ERROR_MESSAGE)
    }

    /// Resolved timeout error status.
    pub fn timeout_error_status(&self) -> u16 {
        self.timeout_error_status
            .unwrap_or(DEFAULT_TIMEOUT_ERROR_STATUS)
    }

    /// `true` when caching is disabled with a zero cache timeout.
    pub fn is_cache_disabled(&self) -> bool {
        self.cache_timeout.is_some_and(|ttl| ttl.is_zero())
    }

    /// `true` when the raw transport response is requested.
    pub fn is_use_origin(&self) -> bool {
        self.is_use_origin.unwrap_or(false)
    }

    /// `true` for multipart uploads.
    pub fn is_file(&self) -> bool {
        self.is_file.unwrap_or(false) || matches!(self.data, Some(RequestData::Multipart(_)))
    }

    /// `true` when `GET` query parameters are percent-encoded.
    pub fn is_encode_url(&self) -> bool {
        self.is_encode_url.unwrap_or(false)
    }

    /// `true` when cache read events are logged.
    pub fn is_debug(&self) -> bool {
        self.is_debug.unwrap_or(false)
    }

    /// `true` when `status` must not be treated as an error.
    pub fn is_ignored(&self, status: u16) -> bool {
        self.ignore
            .as_ref()
            .is_some_and(|ignore| ignore.contains(&status))
    }

    /// Resolved credentials policy.
    pub fn credentials(&self) -> Credentials {
        self.credentials.unwrap_or_default()
    }

    /// Resolved request mode.
    pub fn mode(&self) -> RequestMode {
        self.mode.unwrap_or_default()
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the payload.
    pub fn with_data(mut self, data: impl Into<RequestData>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Sets non-`GET` query parameters.
    pub fn with_query(mut self, query: serde_json::Value) -> Self {
        self.query = Some(query);
        self
    }

    /// Adds a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            http::HeaderName::from_bytes(name.as_bytes()),
            http::HeaderValue::from_str(value),
        ) {
            self.headers
                .get_or_insert_with(HeaderMap::new)
                .append(name, value);
        }
        self
    }

    /// Sets the deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the cache lifetime. Zero disables caching.
    pub fn with_cache_timeout(mut self, ttl: Duration) -> Self {
        self.cache_timeout = Some(ttl);
        self
    }

    /// Sets the background refresh delay.
    pub fn with_revalidate_time(mut self, delay: Duration) -> Self {
        self.revalidate_time = Some(delay);
        self
    }

    /// Sets the external cache store.
    pub fn with_cache_store(mut self, store: Arc<dyn Store>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Selects response headers to return with the body.
    pub fn with_response_header_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<SmolStr>,
    {
        self.response_header_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the caller cancellation signal.
    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }
}

impl fmt::Debug for RequestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestConfig")
            .field("base_url", &self.base_url)
            .field("url", &self.url)
            .field("method", &self.method)
            .field("data", &self.data)
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .field("cache_timeout", &self.cache_timeout)
            .field("revalidate_time", &self.revalidate_time)
            .field(
                "cache_store",
                &self.cache_store.as_ref().map(|store| store.name().to_owned()),
            )
            .field("is_use_origin", &self.is_use_origin)
            .field("is_file", &self.is_file)
            .field("ignore", &self.ignore)
            .field("response_header_keys", &self.response_header_keys)
            .field("is_debug", &self.is_debug)
            .finish_non_exhaustive()
    }
}

mod method_serde {
    use http::Method;
    use serde::{Deserialize, Deserializer, de::Error};

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Option<Method>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|method| {
                Method::from_bytes(method.to_ascii_uppercase().as_bytes()).map_err(D::Error::custom)
            })
            .transpose()
    }
}

mod headers_serde {
    use std::collections::BTreeMap;

    use http::{HeaderMap, HeaderName, HeaderValue};
    use serde::{Deserialize, Deserializer, de::Error};

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Option<HeaderMap>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Some(raw) = Option::<BTreeMap<String, String>>::deserialize(deserializer)? else {
            return Ok(None);
        };
        let mut headers = HeaderMap::with_capacity(raw.len());
        for (name, value) in raw {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(D::Error::custom)?;
            let value = HeaderValue::from_str(&value).map_err(D::Error::custom)?;
            headers.append(name, value);
        }
        Ok(Some(headers))
    }
}
