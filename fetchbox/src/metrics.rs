//! Metrics declaration and recording.
//!
//! With the `metrics` feature disabled every recorder is an empty inline
//! function and compiles away.

use std::time::Duration;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Track number of results shared from the in-memory cache.
    pub static ref MEMORY_HIT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "fetchbox_memory_hit_total",
            "Total number of results shared from the in-memory cache."
        );
        "fetchbox_memory_hit_total"
    };
    /// Track number of results read from an external cache store.
    pub static ref STORE_HIT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "fetchbox_store_hit_total",
            "Total number of results read from an external cache store."
        );
        "fetchbox_store_hit_total"
    };
    /// Track number of requests that had to reach the transport.
    pub static ref MISS_COUNTER: &'static str = {
        metrics::describe_counter!(
            "fetchbox_miss_total",
            "Total number of requests sent to the transport."
        );
        "fetchbox_miss_total"
    };
    /// Track number of requests that lost the deadline race.
    pub static ref TIMEOUT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "fetchbox_timeout_total",
            "Total number of requests that timed out."
        );
        "fetchbox_timeout_total"
    };
    /// Track number of background revalidations started.
    pub static ref REVALIDATION_COUNTER: &'static str = {
        metrics::describe_counter!(
            "fetchbox_revalidation_total",
            "Total number of background revalidations started."
        );
        "fetchbox_revalidation_total"
    };
    /// Track store failures swallowed by the engine.
    pub static ref STORE_ERROR_COUNTER: &'static str = {
        metrics::describe_counter!(
            "fetchbox_store_errors_total",
            "Total number of swallowed cache store failures."
        );
        "fetchbox_store_errors_total"
    };
    /// Histogram of transport call duration.
    pub static ref TRANSPORT_DURATION: &'static str = {
        metrics::describe_histogram!(
            "fetchbox_transport_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of transport calls in seconds."
        );
        "fetchbox_transport_duration_seconds"
    };
}

#[cfg(feature = "metrics")]
#[inline]
pub(crate) fn record_memory_hit() {
    metrics::counter!(*MEMORY_HIT_COUNTER).increment(1);
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub(crate) fn record_memory_hit() {}

#[cfg(feature = "metrics")]
#[inline]
pub(crate) fn record_store_hit(store: &str) {
    metrics::counter!(*STORE_HIT_COUNTER, "store" => store.to_owned()).increment(1);
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub(crate) fn record_store_hit(_store: &str) {}

#[cfg(feature = "metrics")]
#[inline]
pub(crate) fn record_miss() {
    metrics::counter!(*MISS_COUNTER).increment(1);
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub(crate) fn record_miss() {}

#[cfg(feature = "metrics")]
#[inline]
pub(crate) fn record_timeout() {
    metrics::counter!(*TIMEOUT_COUNTER).increment(1);
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub(crate) fn record_timeout() {}

#[cfg(feature = "metrics")]
#[inline]
pub(crate) fn record_revalidation() {
    metrics::counter!(*REVALIDATION_COUNTER).increment(1);
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub(crate) fn record_revalidation() {}

#[cfg(feature = "metrics")]
#[inline]
pub(crate) fn record_store_error(store: &str, operation: &'static str) {
    metrics::counter!(
        *STORE_ERROR_COUNTER,
        "store" => store.to_owned(),
        "operation" => operation
    )
    .increment(1);
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub(crate) fn record_store_error(_store: &str, _operation: &'static str) {}

/// Records the duration of one transport call with its outcome.
#[cfg(feature = "metrics")]
#[inline]
pub(crate) fn record_transport(transport: &str, duration: Duration, success: bool) {
    metrics::histogram!(
        *TRANSPORT_DURATION,
        "transport" => transport.to_owned(),
        "success" => if success { "true" } else { "false" }
    )
    .record(duration.as_secs_f64());
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub(crate) fn record_transport(_transport: &str, _duration: Duration, _success: bool) {}
