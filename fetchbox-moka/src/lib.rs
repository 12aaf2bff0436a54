#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod builder;
mod store;

pub use builder::{Bounded, MokaStoreBuilder, Unbounded};
pub use moka::policy::EvictionPolicy;
pub use store::MokaStore;
