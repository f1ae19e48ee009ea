//! Verify the pure pieces against JSON test vectors stored in `test-vectors/`.
//!
//! Each vector file describes inputs, expected requests, simulated responses,
//! and expected results. Comparing parsed JSON (not raw strings) avoids
//! false negatives from field-ordering differences.

use sobject_broker::auth::{build_token_request, parse_token_response};
use sobject_broker::url::build_url;
use sobject_broker::{classify, ApiError, Body, Credentials, HttpMethod, HttpResponse, Outcome};

fn response(sim: &serde_json::Value) -> HttpResponse {
    HttpResponse::buffered(
        sim["status"].as_u64().unwrap() as u16,
        sim["content_type"].as_str(),
        sim["body"].as_str().unwrap().to_string(),
    )
}

// ---------------------------------------------------------------------------
// URL building
// ---------------------------------------------------------------------------

#[test]
fn url_test_vectors() {
    let raw = include_str!("../../test-vectors/urls.json");
    let vectors: serde_json::Value = serde_json::from_str(raw).unwrap();
    let root = vectors["root"].as_str().unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let segments: Vec<&str> = case["segments"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s.as_str().unwrap())
            .collect();
        let query: Vec<(&str, &str)> = case["query"]
            .as_array()
            .unwrap()
            .iter()
            .map(|pair| (pair[0].as_str().unwrap(), pair[1].as_str().unwrap()))
            .collect();

        assert_eq!(
            build_url(root, &segments, &query),
            case["expected"].as_str().unwrap(),
            "{name}"
        );
    }
}

// ---------------------------------------------------------------------------
// Response classification
// ---------------------------------------------------------------------------

#[test]
fn classify_test_vectors() {
    let raw = include_str!("../../test-vectors/classify.json");
    let vectors: serde_json::Value = serde_json::from_str(raw).unwrap();

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let sim = &case["response"];
        let expected = &case["expected"];
        let result = classify(response(sim));

        if let Some(json) = expected.get("json") {
            match result {
                Ok(Outcome::Body(Body::Json(value))) => assert_eq!(&value, json, "{name}: body"),
                other => panic!("{name}: expected JSON, got {other:?}"),
            }
        } else if let Some(content_type) = expected.get("raw") {
            match result {
                Ok(Outcome::Body(Body::Raw { content_type: ct, content })) => {
                    assert_eq!(ct.as_deref(), content_type.as_str(), "{name}: content type");
                    assert_eq!(&content[..], sim["body"].as_str().unwrap().as_bytes(), "{name}: bytes");
                }
                other => panic!("{name}: expected raw body, got {other:?}"),
            }
        } else {
            let err = result.unwrap_err();
            match expected["error"].as_str().unwrap() {
                "auth" => {
                    let want = expected["retryable"].as_bool().unwrap();
                    assert!(
                        matches!(err, ApiError::Auth { retryable, .. } if retryable == want),
                        "{name}: {err:?}"
                    );
                }
                "request" => {
                    let want = expected["status"].as_u64().unwrap() as u16;
                    assert!(
                        matches!(err, ApiError::Request { status, .. } if status == want),
                        "{name}: {err:?}"
                    );
                }
                "decode" => assert!(matches!(err, ApiError::Decode(_)), "{name}: {err:?}"),
                other => panic!("{name}: unknown expected error: {other}"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Token exchange
// ---------------------------------------------------------------------------

#[test]
fn token_test_vectors() {
    let raw = include_str!("../../test-vectors/token.json");
    let vectors: serde_json::Value = serde_json::from_str(raw).unwrap();

    let credentials: Credentials = serde_json::from_value(vectors["credentials"].clone()).unwrap();
    let expected_req = &vectors["expected_request"];

    // Verify build
    let req = build_token_request(&credentials);
    assert_eq!(req.method, HttpMethod::Post);
    assert_eq!(req.method.as_str(), expected_req["method"].as_str().unwrap());
    assert_eq!(req.host, expected_req["host"].as_str().unwrap());
    assert_eq!(req.path, expected_req["path"].as_str().unwrap());
    let expected_headers: Vec<(String, String)> = expected_req["headers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| (h[0].as_str().unwrap().to_string(), h[1].as_str().unwrap().to_string()))
        .collect();
    assert_eq!(req.headers, expected_headers);
    assert!(req.body.is_none());

    // Verify parse
    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let sim = &case["response"];
        let resp = HttpResponse::buffered(
            sim["status"].as_u64().unwrap() as u16,
            Some("application/json"),
            sim["body"].as_str().unwrap().to_string(),
        );
        let result = parse_token_response(resp);

        if case.get("expected_error").is_some() {
            let err = result.unwrap_err();
            assert!(matches!(err, ApiError::Auth { retryable: false, .. }), "{name}: {err:?}");
        } else {
            let bundle = result.unwrap();
            assert_eq!(bundle.access_token, case["expected"]["access_token"].as_str().unwrap(), "{name}");
            assert_eq!(bundle.instance_host, case["expected"]["instance_host"].as_str().unwrap(), "{name}");
        }
    }
}
