//! Composite and composite batch orchestration against a mock org.

use relay_sf_api::client::ErrorKind as ClientErrorKind;
use relay_sf_api::client::RequestMethod;
use relay_sf_api::rest::{BinaryPart, ErrorKind, Outcome, SalesforceRestClient, MAX_SUBREQUESTS};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::static_client;

async fn rest_client() -> (MockServer, SalesforceRestClient) {
    let server = MockServer::start().await;
    let rest = SalesforceRestClient::from_client(static_client(&server));
    (server, rest)
}

#[tokio::test]
async fn test_account_and_contact_in_one_call() {
    let (server, rest) = rest_client().await;

    Mock::given(method("POST"))
        .and(path("/services/data/v62.0/composite"))
        .and(body_partial_json(json!({
            "allOrNone": true,
            "compositeRequest": [
                {
                    "method": "POST",
                    "url": "/services/data/v62.0/sobjects/Account",
                    "referenceId": "Account_create_0",
                    "body": {"Name": "Acme"}
                },
                {
                    "method": "POST",
                    "url": "/services/data/v62.0/sobjects/Contact",
                    "referenceId": "Contact_create_0",
                    "body": {"LastName": "Doe", "AccountId": "@{Account_create_0.id}"}
                }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "compositeResponse": [
                {
                    "body": {"id": "001xx000003DGb2AAG", "success": true, "errors": []},
                    "httpHeaders": {"Location": "/services/data/v62.0/sobjects/Account/001xx000003DGb2AAG"},
                    "httpStatusCode": 201,
                    "referenceId": "Account_create_0"
                },
                {
                    "body": {"id": "003xx000004TmiQAAS", "success": true, "errors": []},
                    "httpHeaders": {},
                    "httpStatusCode": 201,
                    "referenceId": "Contact_create_0"
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut composite = rest.composite().with_all_or_none(true);
    let account = composite
        .sobject()
        .create("Account", &json!({"Name": "Acme"}))
        .unwrap();
    let contact = composite
        .sobject()
        .create(
            "Contact",
            &json!({"LastName": "Doe", "AccountId": account.reference().id()}),
        )
        .unwrap();

    assert!(!account.is_done());
    composite.execute().await.unwrap();

    assert_eq!(account.id().unwrap(), "001xx000003DGb2AAG");
    assert_eq!(contact.id().unwrap(), "003xx000004TmiQAAS");
    let resolved = contact.resolved_body().unwrap().unwrap();
    assert_eq!(resolved["AccountId"], account.id().unwrap());
}

#[tokio::test]
async fn test_failed_dependency_marks_dependents_dangling() {
    let (server, rest) = rest_client().await;

    Mock::given(method("POST"))
        .and(path("/services/data/v62.0/composite"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "compositeResponse": [
                {
                    "body": [{"errorCode": "REQUIRED_FIELD_MISSING", "message": "Required fields are missing: [Name]", "fields": ["Name"]}],
                    "httpHeaders": {},
                    "httpStatusCode": 400,
                    "referenceId": "Account_create_0"
                },
                {
                    "body": [{"errorCode": "PROCESSING_HALTED", "message": "Invalid reference specified."}],
                    "httpHeaders": {},
                    "httpStatusCode": 400,
                    "referenceId": "Contact_create_0"
                },
                {
                    "body": {"totalSize": 1, "done": true, "records": [{"Id": "005xx"}]},
                    "httpHeaders": {},
                    "httpStatusCode": 200,
                    "referenceId": "Query_0"
                }
            ]
        })))
        .mount(&server)
        .await;

    let mut composite = rest.composite();
    let account = composite.sobject().create("Account", &json!({})).unwrap();
    let contact = composite
        .sobject()
        .create("Contact", &json!({"AccountId": account.reference().id()}))
        .unwrap();
    let users = composite.query("SELECT Id FROM User LIMIT 1").unwrap();
    composite.execute().await.unwrap();

    let err = account.id().unwrap_err();
    assert_eq!(
        err.client_error().and_then(|e| e.error_code()),
        Some("REQUIRED_FIELD_MISSING")
    );

    assert!(matches!(
        contact.outcome().unwrap(),
        Outcome::DanglingReference { dependency, .. } if dependency == "Account_create_0"
    ));
    match contact.id().unwrap_err().client_kind() {
        Some(ClientErrorKind::DanglingReference { reference_id, dependency }) => {
            assert_eq!(reference_id, "Contact_create_0");
            assert_eq!(dependency, "Account_create_0");
        }
        other => panic!("unexpected: {other:?}"),
    }

    assert_eq!(users.records().unwrap().len(), 1);
}

#[tokio::test]
async fn test_autoraise_groups_errors() {
    let (server, rest) = rest_client().await;

    Mock::given(method("POST"))
        .and(path("/services/data/v62.0/composite"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "compositeResponse": [
                {
                    "body": [{"errorCode": "FIELD_CUSTOM_VALIDATION_EXCEPTION", "message": "no"}],
                    "httpHeaders": {},
                    "httpStatusCode": 400,
                    "referenceId": "Account_update_0"
                },
                {
                    "body": [{"errorCode": "ENTITY_IS_DELETED", "message": "gone"}],
                    "httpHeaders": {},
                    "httpStatusCode": 404,
                    "referenceId": "Account_delete_0"
                }
            ]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let build = |group_errors: bool| {
        let mut composite = rest
            .composite()
            .with_autoraise(true)
            .with_group_errors(group_errors);
        composite
            .sobject()
            .update("Account", "001xx000003DGb2AAG", &json!({"Name": "x"}))
            .unwrap();
        composite
            .sobject()
            .delete("Account", "001xx000003DGb3AAG", None)
            .unwrap();
        composite
    };

    let err = build(true).execute().await.unwrap_err();
    match err.client_kind() {
        Some(ClientErrorKind::CompositeFailures(errors)) => {
            assert_eq!(errors.len(), 2);
            assert_eq!(errors[1].error_code(), Some("ENTITY_IS_DELETED"));
        }
        other => panic!("unexpected: {other:?}"),
    }

    let err = build(false).execute().await.unwrap_err();
    assert_eq!(
        err.client_error().and_then(|e| e.error_code()),
        Some("FIELD_CUSTOM_VALIDATION_EXCEPTION")
    );
}

#[tokio::test]
async fn test_capacity_checked_before_dispatch() {
    let (server, rest) = rest_client().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut composite = rest.composite();
    for i in 0..MAX_SUBREQUESTS {
        composite
            .sobject()
            .create("Account", &json!({"Name": format!("Account {i}")}))
            .unwrap();
    }
    let err = composite
        .sobject()
        .create("Account", &json!({"Name": "one too many"}))
        .unwrap_err();
    match err.client_kind() {
        Some(ClientErrorKind::CompositeCapacity { count, limit }) => {
            assert_eq!(*count, 26);
            assert_eq!(*limit, 25);
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(composite.len(), MAX_SUBREQUESTS);

    let mut batch = rest.composite_batch();
    for _ in 0..MAX_SUBREQUESTS {
        batch.query("SELECT Id FROM Account").unwrap();
    }
    assert!(batch.query("SELECT Id FROM Account").is_err());
}

#[tokio::test]
async fn test_empty_requests_make_no_call() {
    let (server, rest) = rest_client().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    rest.composite().execute().await.unwrap();
    rest.composite_batch().execute().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_reference_id_rejected() {
    let (_server, rest) = rest_client().await;
    let mut composite = rest.composite();
    let url = "/services/data/v62.0/limits";
    composite
        .add("Limits", RequestMethod::Get, url, None)
        .unwrap();
    let err = composite
        .add("Limits", RequestMethod::Get, url, None)
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::DuplicateReference(ref id) if id == "Limits"));
}

#[tokio::test]
async fn test_reference_id_charset_enforced() {
    let (_server, rest) = rest_client().await;
    let mut composite = rest.composite();
    let url = "/services/data/v62.0/limits";
    let err = composite
        .add("org-limits", RequestMethod::Get, url, None)
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidInput(_)));
    assert!(composite.is_empty());

    composite.add("org_limits_2", RequestMethod::Get, url, None).unwrap();
    assert_eq!(composite.len(), 1);
}

#[tokio::test]
async fn test_batch_sends_binary_part_names() {
    let (server, rest) = rest_client().await;

    Mock::given(method("POST"))
        .and(path("/services/data/v62.0/composite/batch"))
        .and(body_partial_json(json!({
            "batchRequests": [
                {
                    "method": "POST",
                    "url": "/services/data/v62.0/sobjects/ContentVersion",
                    "richInput": {"Title": "report", "PathOnClient": "report.pdf"},
                    "binaryPartName": "report",
                    "binaryPartNameAlias": "VersionData"
                },
                {"method": "GET", "url": "/services/data/v62.0/limits"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hasErrors": false,
            "results": [
                {"statusCode": 201, "result": {"id": "068xx000000abcdAAA", "success": true, "errors": []}},
                {"statusCode": 200, "result": {}}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut batch = rest.composite_batch();
    let upload = batch
        .add_with_binary_part(
            RequestMethod::Post,
            "/services/data/v62.0/sobjects/ContentVersion",
            Some(json!({"Title": "report", "PathOnClient": "report.pdf"})),
            BinaryPart::new("report", "VersionData"),
        )
        .unwrap();
    let limits = batch
        .add(RequestMethod::Get, "/services/data/v62.0/limits", None)
        .unwrap();
    batch.execute().await.unwrap();

    assert_eq!(upload.status().unwrap(), Some(201));
    assert_eq!(limits.status().unwrap(), Some(200));

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert!(body["batchRequests"][1].get("binaryPartName").is_none());
}

#[tokio::test]
async fn test_batch_halt_on_error_skips_the_rest() {
    let (server, rest) = rest_client().await;

    Mock::given(method("POST"))
        .and(path("/services/data/v62.0/composite/batch"))
        .and(body_partial_json(json!({"haltOnError": true})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hasErrors": true,
            "results": [
                {"statusCode": 201, "result": {"id": "001xx000003DGb2AAG", "success": true, "errors": []}},
                {"statusCode": 400, "result": [{"errorCode": "INVALID_FIELD", "message": "No such column 'Bogus__c'"}]},
                {"statusCode": 412, "result": [{"errorCode": "BATCH_PROCESSING_HALTED", "message": "Batch processing halted per request"}]},
                {"statusCode": 412, "result": [{"errorCode": "BATCH_PROCESSING_HALTED", "message": "Batch processing halted per request"}]}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut batch = rest.composite_batch().with_halt_on_error(true);
    let created = batch
        .sobject()
        .create("Account", &json!({"Name": "Acme"}))
        .unwrap();
    let failed = batch
        .sobject()
        .update("Account", "001xx000003DGb2AAG", &json!({"Bogus__c": 1}))
        .unwrap();
    let third = batch.query("SELECT Id FROM Account").unwrap();
    let fourth = batch
        .sobject()
        .get("Account", "001xx000003DGb2AAG", None, Some(&["Id", "Name"]))
        .unwrap();
    batch.execute().await.unwrap();

    assert_eq!(created.id().unwrap(), "001xx000003DGb2AAG");
    assert_eq!(failed.status().unwrap(), Some(400));
    assert_eq!(third.outcome().unwrap(), &Outcome::Skipped);
    assert_eq!(fourth.outcome().unwrap(), &Outcome::Skipped);
    assert!(matches!(
        fourth.record().unwrap_err().client_kind(),
        Some(ClientErrorKind::NotExecuted(id)) if id == fourth.reference_id()
    ));
}

#[tokio::test]
async fn test_batch_rejects_references() {
    let (_server, rest) = rest_client().await;
    let mut batch = rest.composite_batch();
    batch
        .sobject()
        .update("Contact", "@{Account_create_0.id}", &json!({"LastName": "x"}))
        .unwrap();
    let err = batch.execute().await.unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidInput(_)));
}

#[tokio::test]
async fn test_html_escaped_strings_are_unescaped() {
    let (server, rest) = rest_client().await;

    Mock::given(method("POST"))
        .and(path("/services/data/v62.0/composite/batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hasErrors": false,
            "results": [
                {"statusCode": 200, "result": {"Id": "001xx000003DGb2AAG", "Name": "Smith &amp; Sons"}}
            ]
        })))
        .mount(&server)
        .await;

    let mut batch = rest.composite_batch();
    let account = batch
        .sobject()
        .get("Account", "001xx000003DGb2AAG", None, None)
        .unwrap();
    batch.execute().await.unwrap();

    assert_eq!(account.record().unwrap()["Name"], "Smith & Sons");
}
