//! Request and response interceptor chains.
//!
//! Each chain is an ordered list of slots holding an optional success handler
//! and an optional error handler. [`InterceptorChain::eject`] tombstones a
//! slot instead of removing it, so the ids of the remaining slots stay valid.
//!
//! # Request chain
//!
//! Request handlers run synchronously in registration order and edit the
//! merged [`RequestConfig`] in place. When the success handler of slot `i`
//! fails, the error goes to the first error handler registered at a slot
//! `j >= i`. A recovered error resumes processing at slot `j + 1`. If the
//! error handler fails too, or no error handler is left, the chain stops and
//! the request is never issued.
//!
//! # Response chain
//!
//! Response handlers run asynchronously over `Result<FetchValue, FetchError>`.
//! Each slot maps a success through its success handler and a failure
//! through its error handler; a missing handler passes the value through.
//! The outcome of the last slot is what the caller sees.

use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use fetchbox_core::FetchValue;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::config::RequestConfig;
use crate::error::{FetchError, InterceptError};

/// Handle returned when registering a handler pair, used to eject it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptorId(usize);

#[derive(Clone)]
struct Slot<S, E> {
    on_success: Option<S>,
    on_error: Option<E>,
}

/// Ordered list of handler pairs with tombstoned removal.
pub struct InterceptorChain<S, E> {
    slots: RwLock<Vec<Option<Slot<S, E>>>>,
}

impl<S: Clone, E: Clone> InterceptorChain<S, E> {
    fn new() -> Self {
        InterceptorChain {
            slots: RwLock::new(Vec::new()),
        }
    }

    fn push(&self, on_success: Option<S>, on_error: Option<E>) -> InterceptorId {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.push(Some(Slot {
            on_success,
            on_error,
        }));
        InterceptorId(slots.len() - 1)
    }

    /// Removes a handler pair. Returns `false` if it was already ejected.
    pub fn eject(&self, id: InterceptorId) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots
            .get_mut(id.0)
            .and_then(Option::take)
            .is_some()
    }

    /// Number of live handler pairs.
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .flatten()
            .count()
    }

    /// `true` when no handler pair is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Option<Slot<S, E>>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

type RequestSuccess = Arc<dyn Fn(&mut RequestConfig) -> Result<(), InterceptError> + Send + Sync>;
type RequestFailure =
    Arc<dyn Fn(&mut RequestConfig, InterceptError) -> Result<(), InterceptError> + Send + Sync>;

/// Request interceptor chain.
pub type RequestInterceptors = InterceptorChain<RequestSuccess, RequestFailure>;

impl RequestInterceptors {
    /// Registers a success handler and an error handler.
    pub fn use_handlers<F, E>(&self, on_success: F, on_error: E) -> InterceptorId
    where
        F: Fn(&mut RequestConfig) -> Result<(), InterceptError> + Send + Sync + 'static,
        E: Fn(&mut RequestConfig, InterceptError) -> Result<(), InterceptError>
            + Send
            + Sync
            + 'static,
    {
        self.push(Some(Arc::new(on_success)), Some(Arc::new(on_error)))
    }

    /// Registers a success handler only.
    pub fn use_success<F>(&self, on_success: F) -> InterceptorId
    where
        F: Fn(&mut RequestConfig) -> Result<(), InterceptError> + Send + Sync + 'static,
    {
        self.push(Some(Arc::new(on_success)), None)
    }

    /// Registers an error handler only.
    pub fn use_error<E>(&self, on_error: E) -> InterceptorId
    where
        E: Fn(&mut RequestConfig, InterceptError) -> Result<(), InterceptError>
            + Send
            + Sync
            + 'static,
    {
        self.push(None, Some(Arc::new(on_error)))
    }

    pub(crate) fn apply(&self, config: &mut RequestConfig) -> Result<(), InterceptError> {
        let slots = self.snapshot();
        let mut index = 0;
        while index < slots.len() {
            let Some(Some(on_success)) = slots[index].as_ref().map(|slot| &slot.on_success) else {
                index += 1;
                continue;
            };
            match on_success(config) {
                Ok(()) => index += 1,
                Err(err) => {
                    let handler = slots[index..].iter().enumerate().find_map(|(offset, slot)| {
                        slot.as_ref()
                            .and_then(|slot| slot.on_error.as_ref())
                            .map(|on_error| (index + offset, on_error))
                    });
                    match handler {
                        Some((position, on_error)) => {
                            on_error(config, err)?;
                            index = position + 1;
                        }
                        None => return Err(err),
                    }
                }
            }
        }
        Ok(())
    }
}

type ResponseSuccess =
    Arc<dyn Fn(FetchValue) -> BoxFuture<'static, Result<FetchValue, FetchError>> + Send + Sync>;
type ResponseFailure =
    Arc<dyn Fn(FetchError) -> BoxFuture<'static, Result<FetchValue, FetchError>> + Send + Sync>;

/// Response interceptor chain.
pub type ResponseInterceptors = InterceptorChain<ResponseSuccess, ResponseFailure>;

/// A snapshot of the response chain taken when a request is dispatched.
pub(crate) struct ResponsePipeline {
    slots: Vec<Option<Slot<ResponseSuccess, ResponseFailure>>>,
}

impl ResponsePipeline {
    pub(crate) async fn apply(
        self,
        mut result: Result<FetchValue, FetchError>,
    ) -> Result<FetchValue, FetchError> {
        for slot in self.slots.iter().flatten() {
            result = match result {
                Ok(value) => match &slot.on_success {
                    Some(on_success) => on_success(value).await,
                    None => Ok(value),
                },
                Err(err) => match &slot.on_error {
                    Some(on_error) => on_error(err).await,
                    None => Err(err),
                },
            };
        }
        result
    }
}

impl ResponseInterceptors {
    /// Registers a success handler and an error handler.
    pub fn use_handlers<F, FF, E, EF>(&self, on_success: F, on_error: E) -> InterceptorId
    where
        F: Fn(FetchValue) -> FF + Send + Sync + 'static,
        FF: Future<Output = Result<FetchValue, FetchError>> + Send + 'static,
        E: Fn(FetchError) -> EF + Send + Sync + 'static,
        EF: Future<Output = Result<FetchValue, FetchError>> + Send + 'static,
    {
        self.push(
            Some(Arc::new(move |value| on_success(value).boxed())),
            Some(Arc::new(move |err| on_error(err).boxed())),
        )
    }

    /// Registers a success handler only.
    pub fn use_success<F, FF>(&self, on_success: F) -> InterceptorId
    where
        F: Fn(FetchValue) -> FF + Send + Sync + 'static,
        FF: Future<Output = Result<FetchValue, FetchError>> + Send + 'static,
    {
        self.push(Some(Arc::new(move |value| on_success(value).boxed())), None)
    }

    /// Registers an error handler only.
    pub fn use_error<E, EF>(&self, on_error: E) -> InterceptorId
    where
        E: Fn(FetchError) -> EF + Send + Sync + 'static,
        EF: Future<Output = Result<FetchValue, FetchError>> + Send + 'static,
    {
        self.push(None, Some(Arc::new(move |err| on_error(err).boxed())))
    }

    pub(crate) fn pipeline(&self) -> ResponsePipeline {
        ResponsePipeline {
            slots: self.snapshot(),
        }
    }
}

/// The request and response chains of a client.
pub struct Interceptors {
    /// Runs over the merged configuration before the fingerprint is computed.
    pub request: RequestInterceptors,
    /// Runs over the transport outcome before it is cached.
    pub response: ResponseInterceptors,
}

impl Interceptors {
    pub(crate) fn new() -> Self {
        Interceptors {
            request: InterceptorChain::new(),
            response: InterceptorChain::new(),
        }
    }
}

impl Default for Interceptors {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use fetchbox_core::Payload;
    use http::Method;

    use super::*;

    fn trace() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn request_handlers_run_in_order() {
        let chain = Interceptors::new();
        chain.request.use_success(|config| {
            config.url = Some("/first".to_owned());
            Ok(())
        });
        chain.request.use_success(|config| {
            let url = config.url.take().unwrap_or_default();
            config.url = Some(format!("{url}/second"));
            Ok(())
        });

        let mut config = RequestConfig::new(Method::GET, "/origin");
        chain.request.apply(&mut config).unwrap();
        assert_eq!(config.url.as_deref(), Some("/first/second"));
    }

    #[test]
    fn eject_keeps_other_ids() {
        let chain = Interceptors::new();
        let calls = trace();
        let (a, b, c) = (calls.clone(), calls.clone(), calls.clone());
        let first = chain.request.use_success(move |_| {
            a.lock().unwrap().push("first");
            Ok(())
        });
        let second = chain.request.use_success(move |_| {
            b.lock().unwrap().push("second");
            Ok(())
        });
        let third = chain.request.use_success(move |_| {
            c.lock().unwrap().push("third");
            Ok(())
        });

        assert!(chain.request.eject(second));
        assert!(!chain.request.eject(second));
        assert_eq!(chain.request.len(), 2);

        chain.request.apply(&mut RequestConfig::default()).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["first", "third"]);

        assert!(chain.request.eject(first));
        assert!(chain.request.eject(third));
        assert!(chain.request.is_empty());
    }

    #[test]
    fn failure_goes_to_next_error_handler() {
        let chain = Interceptors::new();
        let calls = trace();
        let (a, b, c) = (calls.clone(), calls.clone(), calls.clone());
        chain
            .request
            .use_success(|_| Err(InterceptError::new("boom")));
        chain.request.use_handlers(
            move |_| {
                a.lock().unwrap().push("skipped success");
                Ok(())
            },
            move |config, err| {
                b.lock().unwrap().push("recovered");
                config.url = Some(err.message().to_owned());
                Ok(())
            },
        );
        chain.request.use_success(move |_| {
            c.lock().unwrap().push("resumed");
            Ok(())
        });

        let mut config = RequestConfig::default();
        chain.request.apply(&mut config).unwrap();
        assert_eq!(*calls.lock().unwrap(), vec!["recovered", "resumed"]);
        assert_eq!(config.url.as_deref(), Some("boom"));
    }

    #[test]
    fn unhandled_failure_stops_the_chain() {
        let chain = Interceptors::new();
        let calls = trace();
        let after = calls.clone();
        chain
            .request
            .use_success(|_| Err(InterceptError::new("denied")));
        chain.request.use_success(move |_| {
            after.lock().unwrap().push("after");
            Ok(())
        });

        let err = chain
            .request
            .apply(&mut RequestConfig::default())
            .unwrap_err();
        assert_eq!(err.message(), "denied");
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn failing_error_handler_stops_the_chain() {
        let chain = Interceptors::new();
        chain.request.use_handlers(
            |_| Err(InterceptError::new("first")),
            |_, err| Err(InterceptError::new(format!("{} then second", err.message()))),
        );
        chain.request.use_error(|_, _| Ok(()));

        let err = chain
            .request
            .apply(&mut RequestConfig::default())
            .unwrap_err();
        assert_eq!(err.message(), "first then second");
    }

    #[tokio::test]
    async fn response_chain_maps_and_recovers() {
        let chain = Interceptors::new();
        chain.response.use_success(|value: FetchValue| async move {
            let text = value.payload().and_then(Payload::as_text).unwrap_or_default();
            Ok(FetchValue::Data(Payload::Text(format!("{text}!"))))
        });
        chain.response.use_error(|err: FetchError| async move {
            Ok(FetchValue::Data(Payload::Text(format!(
                "recovered from {}",
                err.kind()
            ))))
        });

        let ok = chain
            .response
            .pipeline()
            .apply(Ok(FetchValue::Data(Payload::Text("hi".to_owned()))))
            .await
            .unwrap();
        assert_eq!(ok, FetchValue::Data(Payload::Text("hi!".to_owned())));

        let config = Arc::new(RequestConfig::default());
        let recovered = chain
            .response
            .pipeline()
            .apply(Err(FetchError::http("bad", 500, config)))
            .await
            .unwrap();
        assert_eq!(
            recovered,
            FetchValue::Data(Payload::Text("recovered from http".to_owned()))
        );
    }
}
