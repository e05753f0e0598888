//! Shared helpers for the integration suite.

use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use relay_sf_api::auth::StaticToken;
use relay_sf_api::client::{
    BackoffStrategy, ClientConfig, Event, RetryPolicy, SalesforceClient,
};
use wiremock::MockServer;

static TRACING: Once = Once::new();

/// Route tracing output through the test harness, honoring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// The default rules with delays short enough for tests.
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy::default()
        .with_backoff(BackoffStrategy::Constant)
        .with_initial_delay(Duration::from_millis(5))
        .with_max_delay(Duration::from_millis(5))
}

pub fn config(retry: Option<RetryPolicy>) -> ClientConfig {
    let builder = ClientConfig::builder().with_timeout(Duration::from_secs(5));
    match retry {
        Some(policy) => builder.with_retry(policy),
        None => builder.without_retry(),
    }
    .build()
    .expect("valid test config")
}

/// A client against `server` authenticated with a fixed token.
pub fn static_client(server: &MockServer) -> SalesforceClient {
    init_tracing();
    SalesforceClient::builder(server.uri(), Arc::new(StaticToken::new("00Dtest!token")))
        .with_config(config(Some(fast_retry_policy())))
        .build()
        .expect("client")
}

/// Records every event published on a client's bus. Dispatch is
/// concurrent, so only counts are meaningful, not order.
pub fn record_events(client: &SalesforceClient) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    client.events().subscribe(move |event| {
        sink.lock().unwrap().push(event.clone());
        Ok(())
    });
    seen
}

pub fn count(events: &Mutex<Vec<Event>>, name: &str) -> usize {
    events
        .lock()
        .unwrap()
        .iter()
        .filter(|event| event.name() == name)
        .count()
}
