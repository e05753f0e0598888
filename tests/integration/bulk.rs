//! Bulk ingest jobs end to end, through the shared executor.

use std::time::Duration;

use relay_sf_api::bulk::{BulkApiClient, IngestOptions, JobState, Record};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{count, record_events, static_client};

const JOB_PATH: &str = "/services/data/v62.0/jobs/ingest/750xx0000000001";

fn job(state: &str) -> serde_json::Value {
    json!({
        "id": "750xx0000000001",
        "state": state,
        "object": "Contact",
        "operation": "update"
    })
}

fn record(value: serde_json::Value) -> Record {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn test_update_survives_transient_poll_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/data/v62.0/jobs/ingest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(job("Open")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("{JOB_PATH}/batches")))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(JOB_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(job("UploadComplete")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(JOB_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(JOB_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(job("InProgress")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(JOB_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(job("JobComplete")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{JOB_PATH}/successfulResults")))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("\"sf__Id\",\"sf__Created\",Id,Email\n003A,false,003A,a@acme.test\n"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{JOB_PATH}/failedResults")))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "\"sf__Id\",\"sf__Error\",Id,Email\n003B,INVALID_EMAIL_ADDRESS:Email: invalid email address: nope:Email --,003B,nope\n",
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{JOB_PATH}/unprocessedrecords")))
        .respond_with(ResponseTemplate::new(200).set_body_string("Id,Email\n"))
        .mount(&server)
        .await;

    let client = static_client(&server);
    let events = record_events(&client);
    let bulk = BulkApiClient::from_client(client.clone()).with_poll_interval(Duration::from_millis(5));

    let records = vec![
        record(json!({"Id": "003A", "Email": "a@acme.test"})),
        record(json!({"Id": "003B", "Email": "nope"})),
    ];
    let result = bulk
        .update("Contact", &records, Some(IngestOptions::default()))
        .await
        .unwrap();

    assert_eq!(result.jobs.len(), 1);
    assert_eq!(result.jobs[0].state, JobState::JobComplete);
    assert_eq!(result.successful_results.len(), 1);
    assert_eq!(result.failed_results[0]["Email"], "nope");
    assert!(result.failed_results[0]["sf__Error"].starts_with("INVALID_EMAIL_ADDRESS"));
    assert!(result.unprocessed_records.is_empty());
    assert!(result.has_failures());

    client.events().wait_idle().await;
    assert_eq!(count(&events, "retry"), 1);
    assert_eq!(count(&events, "bulk_api_batch_consumption"), 1);
}
