#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod client;
mod engine;
mod invoker;
mod race;

/// Request configuration, defaults and merging.
pub mod config;

/// Error types.
///
/// - [`FetchError`] for failed requests (network, timeout, http)
/// - [`InterceptError`] for rejected request configurations
/// - [`Error`] for everything the facade returns
pub mod error;

/// Request and response interceptor chains.
pub mod interceptor;

/// Metrics collection.
///
/// When the `metrics` feature is enabled, this module declares counters for
/// cache hits by source, misses, timeouts, revalidations and swallowed store
/// errors, plus a histogram of transport call duration.
pub mod metrics;

/// Timer bookkeeping.
pub mod timer;

pub use client::{AbortHandle, Decoded, FetchHandle, Fetchbox, FetchboxBuilder, Response, WithHeaders};
pub use config::{RequestConfig, RequestData};
pub use error::{Error, FetchError, FetchErrorKind, InterceptError};
pub use interceptor::{InterceptorId, Interceptors, RequestInterceptors, ResponseInterceptors};
pub use timer::PendingTimers;

pub use fetchbox_core::{
    Credentials, FetchValue, Fingerprint, FormPart, FormValue, Payload, Provenance, RawResponse,
    RequestMode, ResponseHeaders, ResponseSource, Transport, TransportBody, TransportError,
    TransportRequest,
};
pub use fetchbox_store::{CacheStore, DeleteStatus, MemoryStore, SetOptions, Store, StoreError};
pub use tokio_util::sync::CancellationToken;
