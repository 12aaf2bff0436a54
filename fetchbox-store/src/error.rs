//! Error types for store operations.

use thiserror::Error;

/// Error type for store operations.
///
/// The engine never lets these errors reach the caller of a request: store
/// reads fall through to the network and failed writes are only logged. They
/// are surfaced by explicit operations such as cache invalidation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Internal store error, state or computation error.
    ///
    /// Any error not related to network interaction.
    #[error(transparent)]
    InternalError(Box<dyn std::error::Error + Send + Sync>),

    /// Network interaction error.
    ///
    /// Errors occurring during communication with remote stores.
    #[error(transparent)]
    ConnectionError(Box<dyn std::error::Error + Send + Sync>),

    /// Serialization or deserialization error.
    #[error(transparent)]
    FormatError(#[from] serde_json::Error),
}
