#![warn(missing_docs)]
//! # fetchbox-core
//!
//! Core types for the fetchbox HTTP client facade.
//!
//! This crate holds the vocabulary shared between the engine (`fetchbox`),
//! the cache store abstraction (`fetchbox-store`) and the transport
//! integrations (`fetchbox-reqwest`):
//!
//! - **Identify** logically identical requests ([`Fingerprint`])
//! - **Carry** request results ([`FetchValue`], [`Payload`], [`RawResponse`])
//! - **Report** where a result came from ([`Provenance`], [`ResponseSource`])
//! - **Call** the network ([`Transport`])

pub mod fingerprint;
pub mod provenance;
pub mod transport;
pub mod value;

pub use fingerprint::{Fingerprint, FingerprintBuilder};
pub use provenance::{Provenance, ResponseSource};
pub use transport::{
    Credentials, FormPart, FormValue, RequestMode, Transport, TransportBody, TransportError,
    TransportRequest,
};
pub use value::{FetchValue, Payload, RawResponse, ResponseHeaders};

#[doc(hidden)]
pub use tokio_util::sync::CancellationToken;
