//! Deadline race between the transport and the request timeout.

mod common;

use std::time::Duration;

use common::{MockTransport, Reply, call_of};
use fetchbox::{Fetchbox, RequestConfig};
use http::Method;
use serde_json::{Value, json};

fn slow() -> MockTransport {
    MockTransport::new(|_, call| {
        Reply::json(json!({"call": call})).delay(Duration::from_millis(1000))
    })
}

fn get() -> RequestConfig {
    RequestConfig::new(Method::GET, "/slow")
        .with_base_url("https://api.test")
        .with_timeout(Duration::from_millis(100))
}

#[tokio::test(start_paused = true)]
async fn test_deadline_rejects_and_aborts_the_transport() {
    let transport = slow();
    let client = Fetchbox::new(transport.clone());
    let started = tokio::time::Instant::now();

    let handle = client.request(get()).unwrap();
    let abort = handle.abort_handle();
    let err = handle.await.unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.message(), "timeout");
    assert_eq!(err.status(), Some(504));
    assert!(started.elapsed() < Duration::from_millis(200));
    assert!(abort.is_aborted());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(transport.completed(), 0);
    assert_eq!(client.cached_entries(), 0);
    assert_eq!(client.pending_timers().total(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_result_is_never_cached() {
    let transport = slow();
    let client = Fetchbox::new(transport.clone());

    client.fetch(get()).await.unwrap_err();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let value: Value = client
        .fetch(get().with_timeout(Duration::from_secs(5)))
        .await
        .unwrap()
        .deserialize()
        .unwrap();
    assert_eq!(call_of(&value), 2);
}

#[tokio::test(start_paused = true)]
async fn test_custom_timeout_error() {
    let client = Fetchbox::new(slow());
    let config = RequestConfig {
        timeout_error_message: Some("upstream too slow".to_owned()),
        timeout_error_status: Some(408),
        ..get()
    };

    let err = client.fetch(config).await.unwrap_err();
    let err = err.as_fetch().unwrap();
    assert!(err.is_timeout());
    assert_eq!(err.message(), "upstream too slow");
    assert_eq!(err.status(), Some(408));
    assert_eq!(err.config().timeout, Some(Duration::from_millis(100)));
}

#[tokio::test(start_paused = true)]
async fn test_clearing_timers_lets_the_transport_finish() {
    let transport = slow();
    let client = Fetchbox::new(transport.clone());

    let handle = client.request(get()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.pending_timers().timeout, 1);
    client.clear_all_timers();

    let response = handle.await.unwrap();
    assert_eq!(call_of(&response.deserialize().unwrap()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_caller_signal_aborts_without_deadline() {
    let transport = slow();
    let client = Fetchbox::new(transport.clone());
    let signal = fetchbox::CancellationToken::new();

    let handle = client
        .request(get().with_timeout(Duration::from_secs(10)).with_signal(signal.clone()))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    signal.cancel();

    let err = handle.await.unwrap_err();
    assert!(err.is_network());
    assert_eq!(transport.completed(), 0);
    assert_eq!(client.pending_timers().timeout, 0);
}
