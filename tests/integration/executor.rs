//! Request executor behavior over a real HTTP transport.

use std::sync::Arc;
use std::time::{Duration, Instant};

use relay_sf_api::client::{ErrorKind, Request, ResponseRule, RetryPolicy, SalesforceClient};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{config, count, fast_retry_policy, record_events, static_client};

#[tokio::test]
async fn test_server_error_is_retried_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/services/data/v62.0/limits"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/services/data/v62.0/limits"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Sforce-Limit-Info", "api-usage=40/15000")
                .set_body_json(json!({"DailyApiRequests": {"Max": 15000, "Remaining": 14960}})),
        )
        .mount(&server)
        .await;

    let client = static_client(&server);
    let events = record_events(&client);

    let limits = client.limits().await.unwrap();
    assert_eq!(limits["DailyApiRequests"]["Max"], 15000);

    client.events().wait_idle().await;
    assert_eq!(count(&events, "request"), 3);
    assert_eq!(count(&events, "retry"), 2);
    // Every physical attempt that got a response consumed quota
    assert_eq!(count(&events, "rest_api_call_consumption"), 3);
    assert_eq!(count(&events, "response"), 1);

    let last = events
        .lock()
        .unwrap()
        .iter()
        .find(|event| event.name() == "response")
        .cloned()
        .unwrap();
    assert_eq!(last.consumed(), Some(40));
    assert_eq!(last.remaining(), Some(14960));
}

#[tokio::test]
async fn test_retries_exhausted_carries_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!([{
            "errorCode": "SERVER_UNAVAILABLE",
            "message": "try later"
        }])))
        .expect(4)
        .mount(&server)
        .await;

    let client = static_client(&server);
    let err = client.limits().await.unwrap_err();

    match err.kind {
        ErrorKind::RetriesExhausted { attempts } => assert_eq!(attempts, 3),
        other => panic!("unexpected: {other:?}"),
    }
    let source = std::error::Error::source(&err).expect("last error as source");
    assert!(source.to_string().contains("try later"));
}

#[tokio::test]
async fn test_non_retryable_error_surfaces_directly() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!([{
            "errorCode": "NOT_FOUND",
            "message": "The requested resource does not exist"
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let client = static_client(&server);
    let err = client.limits().await.unwrap_err();
    assert_eq!(err.status(), Some(404));
    assert!(!matches!(err.kind, ErrorKind::RetriesExhausted { .. }));
}

#[tokio::test]
async fn test_row_lock_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!([{
            "errorCode": "UNABLE_TO_LOCK_ROW",
            "message": "unable to obtain exclusive access to this record"
        }])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = static_client(&server);
    let url = client.rest_url("sobjects/Account/001xx000003DGb2AAG");
    client
        .patch_json(&url, &json!({"Name": "Locked"}))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_standard_headers_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("Authorization", "Bearer 00Dtest!token"))
        .and(header("Sforce-Line-Ending", "LF"))
        .and(header("Accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let client = static_client(&server);
    let response = client
        .execute(Request::get(client.rest_url("limits")))
        .await
        .unwrap();
    assert!(response.is_success());

    let received = server.received_requests().await.unwrap();
    let options = received[0]
        .headers
        .get("sforce-call-options")
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(options.starts_with("client=relay-sf-api/"));
}

#[tokio::test]
async fn test_custom_response_rule_with_own_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(409))
        .expect(2)
        .mount(&server)
        .await;

    // One retry for conflicts even though the policy allows three overall
    let policy = RetryPolicy::new()
        .with_initial_delay(Duration::from_millis(1))
        .with_response_rule(ResponseRule::new(|r| r.status() == 409).with_max_retries(1));
    let client = SalesforceClient::builder(
        server.uri(),
        Arc::new(relay_sf_api::StaticToken::new("token")),
    )
    .with_config(config(Some(policy)))
    .build()
    .unwrap();

    let err = client.limits().await.unwrap_err();
    assert!(matches!(err.kind, ErrorKind::RetriesExhausted { attempts: 1 }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_admission_gate_bounds_requests_in_flight() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(8)
        .mount(&server)
        .await;

    let config = relay_sf_api::ClientConfig::builder()
        .with_retry(fast_retry_policy())
        .with_concurrency_limit(2)
        .build()
        .unwrap();
    let client = SalesforceClient::builder(
        server.uri(),
        Arc::new(relay_sf_api::StaticToken::new("token")),
    )
    .with_config(config)
    .build()
    .unwrap();

    let started = Instant::now();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.limits().await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Eight 100ms calls through two slots take at least four rounds
    assert!(started.elapsed() >= Duration::from_millis(380));
    assert_eq!(client.available_permits(), 2);
}
