//! Composite API wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A composite request containing multiple subrequests.
#[derive(Debug, Clone, Serialize)]
pub struct CompositeRequest {
    #[serde(rename = "allOrNone")]
    pub all_or_none: bool,
    #[serde(rename = "collateSubrequests")]
    pub collate_subrequests: bool,
    #[serde(rename = "compositeRequest")]
    pub subrequests: Vec<CompositeSubrequest>,
}

/// A single subrequest within a composite request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeSubrequest {
    pub method: String,
    pub url: String,
    #[serde(rename = "referenceId")]
    pub reference_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Response from a composite request.
#[derive(Debug, Clone, Deserialize)]
pub struct CompositeResponse {
    #[serde(rename = "compositeResponse")]
    pub responses: Vec<CompositeSubresponse>,
}

/// Response from a single subrequest.
#[derive(Debug, Clone, Deserialize)]
pub struct CompositeSubresponse {
    #[serde(default)]
    pub body: Value,
    #[serde(rename = "httpHeaders", default)]
    pub http_headers: serde_json::Map<String, Value>,
    #[serde(rename = "httpStatusCode")]
    pub http_status_code: u16,
    #[serde(rename = "referenceId", default)]
    pub reference_id: Option<String>,
}

/// A composite batch request containing multiple independent subrequests.
#[derive(Debug, Clone, Serialize)]
pub struct CompositeBatchRequest {
    #[serde(rename = "batchRequests")]
    pub batch_requests: Vec<CompositeBatchSubrequest>,
    #[serde(rename = "haltOnError")]
    pub halt_on_error: bool,
}

/// A single subrequest within a composite batch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeBatchSubrequest {
    pub method: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "richInput")]
    pub rich_input: Option<Value>,
    /// Name of the binary part in a multipart request.
    #[serde(rename = "binaryPartName", default, skip_serializing_if = "Option::is_none")]
    pub binary_part_name: Option<String>,
    /// `name` parameter in the binary part's `Content-Disposition` header.
    #[serde(rename = "binaryPartNameAlias", default, skip_serializing_if = "Option::is_none")]
    pub binary_part_name_alias: Option<String>,
}

/// Response from a composite batch request.
#[derive(Debug, Clone, Deserialize)]
pub struct CompositeBatchResponse {
    #[serde(rename = "hasErrors", default)]
    pub has_errors: bool,
    pub results: Vec<CompositeBatchSubresponse>,
}

/// Response from a single batch subrequest.
///
/// The batch endpoint does not echo reference ids today; when it does, the
/// id takes precedence over position.
#[derive(Debug, Clone, Deserialize)]
pub struct CompositeBatchSubresponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(default)]
    pub result: Value,
    #[serde(rename = "referenceId", default)]
    pub reference_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_composite_request_serialization() {
        let request = CompositeRequest {
            all_or_none: true,
            collate_subrequests: false,
            subrequests: vec![
                CompositeSubrequest {
                    method: "POST".to_string(),
                    url: "/services/data/v62.0/sobjects/Account".to_string(),
                    reference_id: "Account_create_0".to_string(),
                    body: Some(json!({"Name": "Test Corp"})),
                },
                CompositeSubrequest {
                    method: "GET".to_string(),
                    url: "/services/data/v62.0/sobjects/Account/@{Account_create_0.id}".to_string(),
                    reference_id: "Account_get_0".to_string(),
                    body: None,
                },
            ],
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["allOrNone"], true);
        assert_eq!(json["collateSubrequests"], false);
        assert_eq!(json["compositeRequest"].as_array().unwrap().len(), 2);

        let first = &json["compositeRequest"][0];
        assert_eq!(first["method"], "POST");
        assert_eq!(first["referenceId"], "Account_create_0");
        assert!(first["body"].is_object());

        // GET subrequest should omit null body
        let second = &json["compositeRequest"][1];
        assert_eq!(second["method"], "GET");
        assert!(second.get("body").is_none());
    }

    #[test]
    fn test_composite_response_deserialization() {
        let json = json!({
            "compositeResponse": [
                {
                    "body": {"id": "001xx000003Dgb2AAC", "success": true, "errors": []},
                    "httpHeaders": {"Location": "/services/data/v62.0/sobjects/Account/001xx"},
                    "httpStatusCode": 201,
                    "referenceId": "Account_create_0"
                },
                {
                    "body": null,
                    "httpHeaders": {},
                    "httpStatusCode": 204,
                    "referenceId": "Account_update_0"
                }
            ]
        });

        let response: CompositeResponse = serde_json::from_value(json).unwrap();
        assert_eq!(response.responses.len(), 2);
        assert_eq!(response.responses[0].http_status_code, 201);
        assert_eq!(
            response.responses[0].reference_id.as_deref(),
            Some("Account_create_0")
        );
        assert!(response.responses[1].body.is_null());
    }

    #[test]
    fn test_composite_batch_round_trip_shapes() {
        let request = CompositeBatchRequest {
            batch_requests: vec![CompositeBatchSubrequest {
                method: "GET".to_string(),
                url: "/services/data/v62.0/sobjects/Account/001xx".to_string(),
                rich_input: None,
                binary_part_name: None,
                binary_part_name_alias: None,
            }],
            halt_on_error: true,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["haltOnError"], true);
        assert_eq!(json["batchRequests"].as_array().unwrap().len(), 1);
        // Optional fields should be omitted
        assert!(json["batchRequests"][0].get("richInput").is_none());
        assert!(json["batchRequests"][0].get("binaryPartName").is_none());
        assert!(json["batchRequests"][0].get("binaryPartNameAlias").is_none());

        let response: CompositeBatchResponse = serde_json::from_value(json!({
            "hasErrors": true,
            "results": [
                {"statusCode": 200, "result": {"Id": "001xx", "Name": "Acme"}},
                {"statusCode": 404, "result": [{"errorCode": "NOT_FOUND", "message": "not found"}]},
                {"statusCode": 204, "result": null}
            ]
        }))
        .unwrap();
        assert!(response.has_errors);
        assert_eq!(response.results.len(), 3);
        assert_eq!(response.results[1].status_code, 404);
        assert!(response.results[0].reference_id.is_none());
    }
}
