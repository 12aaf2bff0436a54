#![doc = include_str!("../README.md")]

mod transport;

pub use transport::ReqwestTransport;

/// Re-export of the reqwest client type for convenience.
pub use reqwest::Client as ReqwestClient;
