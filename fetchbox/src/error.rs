use std::fmt;
use std::sync::Arc;

use fetchbox_store::StoreError;
use thiserror::Error;

use crate::config::RequestConfig;

/// Classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// The transport failed before producing a response (DNS, connection, abort, decode).
    Network,
    /// The deadline elapsed before the transport settled.
    Timeout,
    /// The transport completed with a non-2xx status that is not ignored.
    Http,
}

impl FetchErrorKind {
    /// Returns the kind as a string slice.
    pub const fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::Network => "network",
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::Http => "http",
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Cause = Arc<dyn std::error::Error + Send + Sync>;

/// Failure of a single request.
///
/// A `FetchError` is immutable and cheap to clone: one failure of a shared
/// request is delivered to every caller waiting on it.
#[derive(Clone, Error)]
#[error("{kind} error: {message}")]
pub struct FetchError {
    kind: FetchErrorKind,
    message: String,
    status: Option<u16>,
    config: Arc<RequestConfig>,
    #[source]
    cause: Option<Cause>,
}

impl FetchError {
    /// Creates an error of the given kind.
    pub fn new(
        kind: FetchErrorKind,
        message: impl Into<String>,
        status: Option<u16>,
        config: Arc<RequestConfig>,
    ) -> Self {
        FetchError {
            kind,
            message: message.into(),
            status,
            config,
            cause: None,
        }
    }

    /// Network failure wrapping the underlying error.
    pub fn network<E>(cause: E, config: Arc<RequestConfig>) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        FetchError {
            kind: FetchErrorKind::Network,
            message: cause.to_string(),
            status: None,
            config,
            cause: Some(Arc::new(cause)),
        }
    }

    /// Deadline failure carrying the configured message and status.
    pub fn timeout(config: Arc<RequestConfig>) -> Self {
        let message = config.timeout_error_message().to_owned();
        let status = config.timeout_error_status();
        FetchError::new(FetchErrorKind::Timeout, message, Some(status), config)
    }

    /// Non-2xx response.
    pub fn http(message: impl Into<String>, status: u16, config: Arc<RequestConfig>) -> Self {
        FetchError::new(FetchErrorKind::Http, message, Some(status), config)
    }

    /// Returns the error kind.
    pub fn kind(&self) -> FetchErrorKind {
        self.kind
    }

    /// `true` for [`FetchErrorKind::Network`].
    pub fn is_network(&self) -> bool {
        self.kind == FetchErrorKind::Network
    }

    /// `true` for [`FetchErrorKind::Timeout`].
    pub fn is_timeout(&self) -> bool {
        self.kind == FetchErrorKind::Timeout
    }

    /// `true` for [`FetchErrorKind::Http`].
    pub fn is_http(&self) -> bool {
        self.kind == FetchErrorKind::Http
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the HTTP status, when one applies.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Returns the configuration of the request that failed.
    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    /// Returns the wrapped cause, if any.
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

impl fmt::Debug for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("status", &self.status)
            .field("url", &self.config.url)
            .field("cause", &self.cause)
            .finish()
    }
}

/// Failure raised by a request interceptor.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct InterceptError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl InterceptError {
    /// Creates an error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        InterceptError {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps another error.
    pub fn from_source<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        InterceptError {
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors returned by the [`Fetchbox`](crate::Fetchbox) facade.
#[derive(Debug, Error)]
pub enum Error {
    /// The request failed or timed out.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// A request interceptor rejected the configuration; nothing was sent.
    #[error("request interceptor failed: {0}")]
    Intercept(#[from] InterceptError),
    /// The cache store failed during an explicit cache operation.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The result could not be deserialized into the requested type.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    /// A `*_with_headers` call was made without response header keys.
    #[error("response_header_keys cannot be empty")]
    MissingResponseHeaderKeys,
}

impl Error {
    /// Returns the request failure, if this is one.
    pub fn as_fetch(&self) -> Option<&FetchError> {
        match self {
            Error::Fetch(err) => Some(err),
            _ => None,
        }
    }
}
