//! Provenance of a request result.

/// Where a result was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseSource {
    /// Fresh transport call (cache miss, bypass or revalidation).
    #[default]
    Transport,
    /// Live entry of the in-memory cache, including an in-flight shared request.
    Memory,
    /// Value promoted from the external cache store.
    Store,
}

impl ResponseSource {
    /// Returns the source as a string slice.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::Transport => "transport",
            ResponseSource::Memory => "memory",
            ResponseSource::Store => "store",
        }
    }
}

/// Cache provenance flags attached to every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Provenance {
    source: ResponseSource,
}

impl Provenance {
    /// Creates provenance for the given source.
    pub const fn new(source: ResponseSource) -> Self {
        Provenance { source }
    }

    /// Returns the response source.
    pub const fn source(&self) -> ResponseSource {
        self.source
    }

    /// `true` when the result was shared from the in-memory cache.
    pub const fn is_from_memory_cache(&self) -> bool {
        matches!(self.source, ResponseSource::Memory)
    }

    /// `true` when the result was read from the external cache store.
    pub const fn is_from_store_cache(&self) -> bool {
        matches!(self.source, ResponseSource::Store)
    }
}
