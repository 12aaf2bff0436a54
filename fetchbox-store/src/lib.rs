//! Traits and structs for fetchbox cache store interaction.
//!
//! If you want to plug your own persistent cache into fetchbox, you are in the right place:
//! implement [`Store`] and hand an `Arc` of it to the request configuration.
mod error;
mod memory;
mod store;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use store::{CacheStore, SetOptions, Store, StoreResult};

/// Raw byte data type used for serialized cache values.
pub type Raw = bytes::Bytes;

/// Status of deleting result.
#[derive(Debug, PartialEq, Eq)]
pub enum DeleteStatus {
    /// Record successfully deleted.
    Deleted(u32),
    /// Record already missing.
    Missing,
}
