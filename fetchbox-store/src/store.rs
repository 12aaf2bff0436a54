use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use fetchbox_core::{FetchValue, Fingerprint};

use crate::{DeleteStatus, Raw, StoreError};

pub type StoreResult<T> = Result<T, StoreError>;

/// Options accompanying a store write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetOptions {
    /// Time-to-live of the entry. `None` keeps it until deleted.
    pub ttl: Option<Duration>,
}

impl SetOptions {
    /// Options with the given time-to-live.
    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        SetOptions { ttl }
    }

    /// TTL in whole seconds, rounded up so sub-second TTLs never become "no expiry".
    pub fn ttl_seconds(&self) -> Option<u64> {
        self.ttl.map(|ttl| {
            let secs = ttl.as_secs();
            if ttl.subsec_nanos() > 0 { secs + 1 } else { secs }
        })
    }
}

#[async_trait]
pub trait Store: Sync + Send {
    async fn get(&self, key: &Fingerprint) -> StoreResult<Option<Raw>>;

    async fn set(&self, key: &Fingerprint, value: Raw, options: SetOptions) -> StoreResult<()>;

    async fn delete(&self, key: &Fingerprint) -> StoreResult<DeleteStatus>;

    async fn has(&self, key: &Fingerprint) -> StoreResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn size(&self) -> StoreResult<usize>;

    /// Returns the name of this store for diagnostics.
    fn name(&self) -> &str {
        "store"
    }
}

#[async_trait]
impl Store for &dyn Store {
    async fn get(&self, key: &Fingerprint) -> StoreResult<Option<Raw>> {
        (*self).get(key).await
    }

    async fn set(&self, key: &Fingerprint, value: Raw, options: SetOptions) -> StoreResult<()> {
        (*self).set(key, value, options).await
    }

    async fn delete(&self, key: &Fingerprint) -> StoreResult<DeleteStatus> {
        (*self).delete(key).await
    }

    async fn has(&self, key: &Fingerprint) -> StoreResult<bool> {
        (*self).has(key).await
    }

    async fn size(&self) -> StoreResult<usize> {
        (*self).size().await
    }

    fn name(&self) -> &str {
        (*self).name()
    }
}

#[async_trait]
impl Store for Box<dyn Store> {
    async fn get(&self, key: &Fingerprint) -> StoreResult<Option<Raw>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &Fingerprint, value: Raw, options: SetOptions) -> StoreResult<()> {
        (**self).set(key, value, options).await
    }

    async fn delete(&self, key: &Fingerprint) -> StoreResult<DeleteStatus> {
        (**self).delete(key).await
    }

    async fn has(&self, key: &Fingerprint) -> StoreResult<bool> {
        (**self).has(key).await
    }

    async fn size(&self) -> StoreResult<usize> {
        (**self).size().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[async_trait]
impl Store for Arc<dyn Store + 'static> {
    async fn get(&self, key: &Fingerprint) -> StoreResult<Option<Raw>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &Fingerprint, value: Raw, options: SetOptions) -> StoreResult<()> {
        (**self).set(key, value, options).await
    }

    async fn delete(&self, key: &Fingerprint) -> StoreResult<DeleteStatus> {
        (**self).delete(key).await
    }

    async fn has(&self, key: &Fingerprint) -> StoreResult<bool> {
        (**self).has(key).await
    }

    async fn size(&self) -> StoreResult<usize> {
        (**self).size().await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Typed store operations over [`FetchValue`].
///
/// Values are encoded as JSON so any store that can hold bytes can hold a
/// request result. Raw transport responses are not cacheable and fail to encode.
pub trait CacheStore: Store {
    fn get_value(
        &self,
        key: &Fingerprint,
    ) -> impl Future<Output = StoreResult<Option<FetchValue>>> + Send {
        async move {
            match self.get(key).await? {
                Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
                None => Ok(None),
            }
        }
    }

    fn set_value(
        &self,
        key: &Fingerprint,
        value: &FetchValue,
        ttl: Option<Duration>,
    ) -> impl Future<Output = StoreResult<()>> + Send {
        let encoded = serde_json::to_vec(value).map(Raw::from);
        async move {
            self.set(key, encoded?, SetOptions::with_ttl(ttl)).await
        }
    }
}

impl<T> CacheStore for T where T: Store + ?Sized {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_seconds_rounds_up() {
        assert_eq!(SetOptions::default().ttl_seconds(), None);
        assert_eq!(
            SetOptions::with_ttl(Some(Duration::from_millis(500))).ttl_seconds(),
            Some(1)
        );
        assert_eq!(
            SetOptions::with_ttl(Some(Duration::from_secs(3))).ttl_seconds(),
            Some(3)
        );
    }
}
