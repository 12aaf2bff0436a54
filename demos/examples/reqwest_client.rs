//! Reqwest Client Example
//!
//! Sends cached requests to a real HTTP server with `ReqwestTransport`.
//!
//! Run:
//!   cargo run -p fetchbox-demos --example reqwest_client -- http://httpbin.org
//!
//! The first argument is the base URL; it defaults to `http://httpbin.org`.
//! Plain `http://` URLs work out of the box; enable a TLS feature on
//! `reqwest` for `https://` targets.

use std::time::Duration;

use fetchbox::{Fetchbox, RequestConfig};
use fetchbox_demos::init_tracing;
use fetchbox_reqwest::ReqwestTransport;
use serde_json::Value;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let base_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://httpbin.org".to_owned());
    let client = Fetchbox::builder(ReqwestTransport::new(reqwest::Client::new()))
        .defaults(RequestConfig::default().with_base_url(base_url))
        .build();

    let options = || {
        RequestConfig::default()
            .with_cache_timeout(Duration::from_secs(30))
            .with_response_header_keys(["content-type", "date"])
    };

    let first = client
        .get_with_headers::<Value>("/get", Some(serde_json::json!({"demo": 1}).into()), options())
        .await?;
    let second = client
        .fetch(
            RequestConfig::new(http::Method::GET, "/get")
                .with_data(serde_json::json!({"demo": 1}))
                .merge(options()),
        )
        .await?;

    println!("headers: {:?}", first.headers);
    println!("second call from memory: {}", second.is_from_memory_cache());

    let (echo, abort) = client.post_abortable::<Value>(
        "/delay/5",
        serde_json::json!({"hello": "world"}),
        RequestConfig::default().with_timeout(Duration::from_secs(10)),
    )?;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        abort.abort();
    });
    match echo.await {
        Ok(body) => println!("echo: {body}"),
        Err(err) => println!("aborted: {err}"),
    }
    Ok(())
}
