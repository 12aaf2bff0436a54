//! Caching Example
//!
//! Walks through the fetchbox cache against an in-process transport.
//!
//! Features shown:
//!   - Client defaults loaded from YAML
//!   - Request and response interceptors
//!   - Deduplication of concurrent identical requests
//!   - Stale-while-revalidate with a background refresh
//!   - A Moka backed cache store with write-through
//!   - Timeouts and bulk teardown
//!
//! Run:
//!   cargo run -p fetchbox-demos --example caching
//!
//! Set `RUST_LOG=fetchbox=debug` to see cache reads and revalidations.

use std::sync::Arc;
use std::time::Duration;

use fetchbox::{Fetchbox, InterceptError, RequestConfig};
use fetchbox_demos::{EchoTransport, init_tracing};
use fetchbox_moka::MokaStore;
use serde_json::Value;

const DEFAULTS: &str = r#"
base_url: "https://api.example.com/v1"
timeout: 2s
is_debug: true
headers:
  x-client: fetchbox-demo
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let defaults: RequestConfig = serde_saphyr::from_str(DEFAULTS)?;
    let client = Fetchbox::builder(EchoTransport::new(Duration::from_millis(200)))
        .defaults(defaults)
        .build();

    client.interceptors().request.use_success(|config: &mut RequestConfig| {
        if config.url.as_deref().is_some_and(|url| url.starts_with("/admin")) {
            return Err(InterceptError::new("admin routes are not allowed"));
        }
        *config = std::mem::take(config).with_header("authorization", "Bearer demo");
        Ok(())
    });
    client.interceptors().response.use_success(|value| async move {
        tracing::debug!(?value, "response interceptor");
        Ok(value)
    });

    // Concurrent identical requests share one transport call.
    let cached = || RequestConfig::default().with_cache_timeout(Duration::from_secs(5));
    let (a, b) = tokio::join!(
        client.get::<Value>("/users", None, cached()),
        client.get::<Value>("/users", None, cached()),
    );
    println!("deduplicated: {} / {}", a?["call"], b?["call"]);

    // Stale-while-revalidate: the cached value is served, then refreshed.
    let swr = || cached().with_revalidate_time(Duration::from_millis(300));
    let first: Value = client.get("/feed", None, swr()).await?;
    let stale: Value = client.get("/feed", None, swr()).await?;
    tokio::time::sleep(Duration::from_millis(800)).await;
    let fresh: Value = client.get("/feed", None, swr()).await?;
    println!(
        "swr: first={} stale={} fresh={}",
        first["call"], stale["call"], fresh["call"]
    );

    // Write-through to an external store.
    let store = Arc::new(MokaStore::builder().max_entries(1_000).build());
    let stored = || cached().with_cache_store(store.clone());
    client.get::<Value>("/teams", None, stored()).await?;
    let response = client
        .fetch(RequestConfig::new(http::Method::GET, "/teams").merge(stored()))
        .await?;
    println!("store hit: {}", response.is_from_store_cache());

    // Interceptor rejection: nothing is sent.
    if let Err(err) = client.get::<Value>("/admin/users", None, cached()).await {
        println!("rejected: {err}");
    }

    // Deadline race.
    let hurried = RequestConfig::default().with_timeout(Duration::from_millis(50));
    if let Err(err) = client.get::<Value>("/slow", None, hurried).await {
        println!("timed out: {err}");
    }

    println!("pending timers: {:?}", client.pending_timers());
    client.teardown();
    println!("after teardown: {} entries", client.cached_entries());
    Ok(())
}
