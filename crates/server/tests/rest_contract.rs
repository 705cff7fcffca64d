// Administrative REST surface contract, exercised against the full
// router with an in-memory store.

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tally_server::{
    build_router, fanout::ConnectionHub, registry::ConnectionRegistry, store::ConnectionStore,
};
use tower::ServiceExt;

fn test_app() -> (Router, ConnectionRegistry) {
    let registry = ConnectionRegistry::new(ConnectionStore::in_memory());
    let app = build_router(registry.clone(), ConnectionHub::default());
    (app, registry)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body should be readable");
    serde_json::from_slice(&bytes).expect("body should be valid json")
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

#[tokio::test]
async fn list_connections_empty() {
    let (app, _registry) = test_app();

    let response = app
        .oneshot(Request::builder().uri("/connection").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap().to_str().unwrap(),
        "application/json"
    );
    assert_eq!(body_json(response).await, json!([]));
}

#[tokio::test]
async fn list_connections_returns_registered_records() {
    let (app, registry) = test_app();
    registry.register("conn-a").await.unwrap();
    registry.register("conn-b").await.unwrap();
    registry.update_value("conn-a", json!({ "points": 5 })).await.unwrap();

    let response = app
        .oneshot(Request::builder().uri("/connection").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let mut records = body_json(response).await;
    let records = records.as_array_mut().expect("response should be an array");
    assert_eq!(records.len(), 2);

    records.sort_by_key(|r| r["connection_id"].as_str().unwrap().to_owned());
    assert_eq!(records[0]["connection_id"], "conn-a");
    assert_eq!(records[0]["value"]["points"], 5);
    assert_eq!(records[1]["connection_id"], "conn-b");
    assert!(records[1].get("value").is_none());
}

#[tokio::test]
async fn put_connection_updates_every_record() {
    let (app, registry) = test_app();
    registry.register("conn-a").await.unwrap();
    registry.register("conn-b").await.unwrap();

    let response = app
        .oneshot(json_request(Method::PUT, "/connection", json!({ "value": "reset" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({}));

    let records = registry.list_all().await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.value == Some(json!("reset"))));
}

#[tokio::test]
async fn put_connection_missing_body_is_bad_request() {
    let (app, _registry) = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::PUT)
                .uri("/connection")
                .header("content-type", "application/json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn put_connection_wrong_shape_is_bad_request() {
    let (app, _registry) = test_app();

    let response = app
        .oneshot(json_request(Method::PUT, "/connection", json!({ "not_value": 1 })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn put_single_connection_returns_updated_record() {
    let (app, registry) = test_app();
    registry.register("conn-a").await.unwrap();
    registry.register("conn-b").await.unwrap();

    let response = app
        .oneshot(json_request(
            Method::PUT,
            "/connection/conn-a",
            json!({ "value": { "points": 8 } }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let record = body_json(response).await;
    assert_eq!(record["connection_id"], "conn-a");
    assert_eq!(record["value"]["points"], 8);

    // Sibling untouched.
    let records = registry.list_all().await.unwrap();
    let b = records.iter().find(|r| r.connection_id == "conn-b").unwrap();
    assert!(b.value.is_none());
}

#[tokio::test]
async fn put_unknown_connection_is_not_found() {
    let (app, _registry) = test_app();

    let response = app
        .oneshot(json_request(Method::PUT, "/connection/ghost", json!({ "value": 1 })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn responses_carry_cors_allow_origin() {
    let (app, _registry) = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/connection")
                .header("origin", "https://board.example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers().get("access-control-allow-origin").unwrap(), "*");
}
