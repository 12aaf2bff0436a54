//! The raw request primitive.
//!
//! [`Transport`] is the seam between the engine and the network. An
//! implementation receives a fully prepared [`TransportRequest`] (URL with
//! query string, headers, encoded body) and returns the buffered response.
//! Status classification, body decoding and timeouts all happen above this
//! trait, so implementations stay thin.
//!
//! Implementations must honor [`TransportRequest::signal`]: once it is
//! cancelled the call should stop as soon as possible and return
//! [`TransportError::Aborted`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::RawResponse;

/// Cookie policy forwarded to transports that understand it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Credentials {
    /// Never send credentials.
    Omit,
    /// Send credentials to the same origin only.
    SameOrigin,
    /// Always send credentials.
    #[default]
    Include,
}

/// Request mode forwarded to transports that understand it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// Cross-origin requests allowed.
    #[default]
    Cors,
    /// Opaque cross-origin requests.
    NoCors,
    /// Same-origin requests only.
    SameOrigin,
}

/// A single multipart form field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormPart {
    /// Field name.
    pub name: String,
    /// Field value.
    pub value: FormValue,
}

impl FormPart {
    /// Creates a text field.
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        FormPart {
            name: name.into(),
            value: FormValue::Text(value.into()),
        }
    }

    /// Creates a file field.
    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        content_type: Option<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        FormPart {
            name: name.into(),
            value: FormValue::File {
                file_name: file_name.into(),
                content_type,
                bytes: bytes.into(),
            },
        }
    }
}

/// Value of a multipart form field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormValue {
    /// Plain text value.
    Text(String),
    /// File upload.
    File {
        /// File name reported to the server.
        file_name: String,
        /// MIME type of the file, if known.
        content_type: Option<String>,
        /// File contents.
        bytes: Bytes,
    },
}

/// Encoded request body.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportBody {
    /// Text body (JSON documents are sent as text).
    Text(String),
    /// Binary body.
    Bytes(Bytes),
    /// Multipart form. The transport sets the boundary and content type.
    Multipart(Vec<FormPart>),
}

/// A fully prepared request handed to a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Absolute URL including the query string.
    pub url: String,
    /// HTTP method.
    pub method: Method,
    /// Outgoing headers.
    pub headers: HeaderMap,
    /// Encoded body. Always `None` for `GET`.
    pub body: Option<TransportBody>,
    /// Cookie policy.
    pub credentials: Credentials,
    /// Request mode.
    pub mode: RequestMode,
    /// Cancellation signal. Cancelled on caller abort or deadline expiry.
    pub signal: CancellationToken,
}

/// Failure of the raw request primitive.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The cancellation signal fired before the call completed.
    #[error("request was aborted")]
    Aborted,

    /// The request could not be built (bad URL, bad header, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Connection, DNS, TLS or protocol failure.
    #[error(transparent)]
    Connection(Box<dyn std::error::Error + Send + Sync>),
}

/// The raw request primitive: performs one network call.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues the request and buffers the response.
    async fn invoke(&self, request: TransportRequest) -> Result<RawResponse, TransportError>;

    /// Returns the name of this transport for diagnostics.
    fn name(&self) -> &str {
        "transport"
    }
}

#[async_trait]
impl<T> Transport for Arc<T>
where
    T: Transport + ?Sized,
{
    async fn invoke(&self, request: TransportRequest) -> Result<RawResponse, TransportError> {
        (**self).invoke(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    async fn invoke(&self, request: TransportRequest) -> Result<RawResponse, TransportError> {
        (**self).invoke(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
