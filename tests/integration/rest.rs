//! sObject and query helpers end to end.

use relay_sf_api::rest::SalesforceRestClient;
use serde::Deserialize;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::static_client;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Account {
    id: String,
    name: String,
}

#[tokio::test]
async fn test_query_follows_next_records_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/services/data/v62.0/query"))
        .and(query_param("q", "SELECT Id, Name FROM Account"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 3,
            "done": false,
            "nextRecordsUrl": "/services/data/v62.0/query/01gxx0000002345-2000",
            "records": [
                {"attributes": {"type": "Account"}, "Id": "001A", "Name": "Acme"},
                {"attributes": {"type": "Account"}, "Id": "001B", "Name": "Globex"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/services/data/v62.0/query/01gxx0000002345-2000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 3,
            "done": true,
            "records": [
                {"attributes": {"type": "Account"}, "Id": "001C", "Name": "Initech"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let rest = SalesforceRestClient::from_client(static_client(&server));
    let accounts: Vec<Account> = rest.query("SELECT Id, Name FROM Account").await.unwrap();

    let names: Vec<_> = accounts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, ["Acme", "Globex", "Initech"]);
    assert_eq!(accounts[2].id, "001C");
}

#[tokio::test]
async fn test_query_all_uses_query_all_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/services/data/v62.0/queryAll"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "totalSize": 1,
            "done": true,
            "records": [{"Id": "001D", "Name": "Deleted Co"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let rest = SalesforceRestClient::from_client(static_client(&server));
    let accounts: Vec<Account> = rest
        .query_all("SELECT Id, Name FROM Account WHERE IsDeleted = true")
        .await
        .unwrap();
    assert_eq!(accounts.len(), 1);
}

#[tokio::test]
async fn test_create_update_delete_round() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/data/v62.0/sobjects/Account"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "001xx000003DGb2AAG",
            "success": true,
            "errors": []
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/services/data/v62.0/sobjects/Account/001xx000003DGb2AAG"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/services/data/v62.0/sobjects/Account/001xx000003DGb2AAG"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let rest = SalesforceRestClient::from_client(static_client(&server));
    let id = rest.create("Account", &json!({"Name": "Acme"})).await.unwrap();
    rest.update("Account", &id, &json!({"Name": "Acme Corp"}))
        .await
        .unwrap();
    rest.delete("Account", &id).await.unwrap();
}
