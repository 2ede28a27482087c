use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use tolog::server::router;
use tolog::settings::Settings;

async fn post(body: Value) -> (StatusCode, Value) {
    let app = router(Arc::new(Settings::default()));
    let request = Request::builder()
        .method("POST")
        .uri("/v1/parse")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn parse_to_tolog_plus() {
    let (status, body) = post(json!({ "query": "select $t from instance-of($t, person)?" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["output"], "%version 1.2\nselect $t from instance-of($t, person)?\n");
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn request_overrides_settings() {
    let (status, body) = post(json!({
        "query": "topic($x), topic($x)?",
        "output": "tolog",
        "optimizers": [],
    }))
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["output"], "topic($x), topic($x)?\n", "no optimization, no version line");
}

#[tokio::test]
async fn json_output_uses_the_request_base() {
    let (status, body) = post(json!({
        "query": "select $x from instance-of($x, <person>)?",
        "base": "http://example.org/tm/",
        "output": "json",
    }))
    .await;
    assert_eq!(status, StatusCode::OK);
    let query: Value = serde_json::from_str(body["output"].as_str().unwrap()).unwrap();
    assert_eq!(query["base"], "http://example.org/tm/");
    let argument = &query["statement"]["clauses"][0]["arguments"][1];
    assert_eq!(argument["value"]["iri"], "http://example.org/tm/person");
}

#[tokio::test]
async fn syntax_errors_are_bad_requests() {
    let (status, body) = post(json!({ "query": "select $x from" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert!(body["error"].as_str().unwrap().contains("Invalid query"));
}

#[tokio::test]
async fn unknown_optimizer_is_a_bad_request() {
    let (status, body) = post(json!({ "query": "topic($x)?", "optimizers": ["nope"] })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn legacy_output_of_plus_query_is_a_bad_request() {
    let (status, _) = post(json!({ "query": "%version 1.2 topic($x), $x /= @1?", "output": "tolog" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
