//! Login flows driven through the executor.

use std::sync::Arc;

use relay_sf_api::client::{ErrorKind, SalesforceClient};
use relay_sf_api::{ClientCredentialsFlow, JwtBearerFlow, SoapLogin};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{config, count, fast_retry_policy, init_tracing, record_events};

const TEST_KEY: &[u8] = include_bytes!("../../crates/sf-auth/tests/fixtures/test_key.pem");

fn token_body(token: &str, instance: &str) -> serde_json::Value {
    json!({
        "access_token": token,
        "instance_url": instance,
        "token_type": "Bearer"
    })
}

#[tokio::test]
async fn test_client_credentials_refresh_after_401() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/services/oauth2/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-1", &server.uri())))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/services/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-2", &server.uri())))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/services/data/v62.0/limits"))
        .and(header("Authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!([{
            "errorCode": "INVALID_SESSION_ID",
            "message": "Session expired or invalid"
        }])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/services/data/v62.0/limits"))
        .and(header("Authorization", "Bearer tok-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(2)
        .mount(&server)
        .await;

    let client = SalesforceClient::builder(
        server.uri(),
        Arc::new(ClientCredentialsFlow::new("client-id", "client-secret")),
    )
    .with_config(config(Some(fast_retry_policy())))
    .build()
    .unwrap();
    let events = record_events(&client);

    assert_eq!(client.limits().await.unwrap()["ok"], true);
    // The refreshed token is reused without another login
    assert_eq!(client.limits().await.unwrap()["ok"], true);

    client.events().wait_idle().await;
    // Two logins and three data calls, each reported as requests
    assert_eq!(count(&events, "request"), 5);
    assert_eq!(count(&events, "retry"), 1);
}

#[tokio::test]
async fn test_repeated_401_is_not_refreshed_twice() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/services/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok", &server.uri())))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!([{
            "errorCode": "INVALID_SESSION_ID",
            "message": "Session expired or invalid"
        }])))
        .expect(2)
        .mount(&server)
        .await;

    let client = SalesforceClient::builder(
        server.uri(),
        Arc::new(ClientCredentialsFlow::new("client-id", "client-secret")),
    )
    .with_config(config(Some(fast_retry_policy())))
    .build()
    .unwrap();

    let err = client.limits().await.unwrap_err();
    assert!(matches!(err.kind, ErrorKind::RetriesExhausted { attempts: 1 }));
}

#[tokio::test]
async fn test_oauth_error_is_authentication_error_and_not_retried() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/services/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "invalid client credentials"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = SalesforceClient::builder(
        server.uri(),
        Arc::new(ClientCredentialsFlow::new("client-id", "bad-secret")),
    )
    .with_config(config(Some(fast_retry_policy())))
    .build()
    .unwrap();

    let err = client.limits().await.unwrap_err();
    assert!(err.is_auth_error(), "unexpected: {err:?}");
    assert!(err.to_string().contains("invalid_client"));
    assert!(!err.to_string().contains("bad-secret"));
}

#[tokio::test]
async fn test_soap_login_then_rest_call() {
    init_tracing();
    let server = MockServer::start().await;

    let login_response = r#"<?xml version="1.0" encoding="UTF-8"?>
<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns="urn:partner.soap.sforce.com">
  <soapenv:Body>
    <loginResponse>
      <result>
        <serverUrl>https://acme.my.salesforce.com/services/Soap/u/62.0/00Dxx</serverUrl>
        <sessionId>00Dxx0000001gEF!SESSION</sessionId>
        <userInfo><sessionSecondsValid>7200</sessionSecondsValid></userInfo>
      </result>
    </loginResponse>
  </soapenv:Body>
</soapenv:Envelope>"#;

    Mock::given(method("POST"))
        .and(path("/services/Soap/u/62.0"))
        .and(header("SOAPAction", "login"))
        .and(body_string_contains("<n1:username>user@example.com</n1:username>"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "text/xml")
                .set_body_string(login_response),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/services/data/v62.0/limits"))
        .and(header("Authorization", "Bearer 00Dxx0000001gEF!SESSION"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let client = SalesforceClient::new(
        server.uri(),
        SoapLogin::new("user@example.com", "password", "securitytoken"),
    )
    .unwrap();

    client.limits().await.unwrap();
    let token = client.access_token().await.unwrap();
    assert!(token.expires_at().is_some());
}

#[tokio::test]
async fn test_jwt_bearer_then_rest_call() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/services/oauth2/token"))
        .and(body_string_contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"))
        .and(body_string_contains("assertion="))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("jwt-token", &server.uri())))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("Authorization", "Bearer jwt-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let client = SalesforceClient::new(
        server.uri(),
        JwtBearerFlow::new("consumer-key", "user@example.com", TEST_KEY),
    )
    .unwrap();

    client.limits().await.unwrap();
}
