mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{FailingConnector, RecordingPlatform};
use serde_json::{json, Value};
use signal_relay::{router, RelayAgent, RelayConfig};
use std::sync::Arc;
use tower::ServiceExt;

struct Harness {
    agent: Arc<RelayAgent>,
    platform: Arc<RecordingPlatform>,
    app: Router,
}

fn harness() -> Harness {
    let platform = Arc::new(RecordingPlatform::default());
    let agent = Arc::new(RelayAgent::new(
        RelayConfig::default(),
        platform.clone(),
        Arc::new(FailingConnector::default()),
    ));
    let app = router(Arc::clone(&agent));
    Harness {
        agent,
        platform,
        app,
    }
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_form_schema() {
    let h = harness();
    let (status, body) = call(&h.app, "GET", "/form", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sections"][0]["title"], "Connection");
    assert_eq!(body["sections"][1]["fields"][0]["type"], "button");
    assert_eq!(body["sections"][1]["fields"][0]["label"], "Visit");
}

#[tokio::test]
async fn test_register_consumer_and_consume() {
    let h = harness();

    let (status, body) = call(
        &h.app,
        "POST",
        "/form",
        Some(json!({"stream_type": "consumer", "stream_name": "plant"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "success", "message": "plant registered"}));
    assert_eq!(h.platform.opened(), vec!["plant"]);

    let (status, _) = call(
        &h.app,
        "POST",
        "/consume/plant",
        Some(json!({"payload": {"key": "temp", "time": "1.5", "value": 20}})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let signal = h.agent.store().get("temp").unwrap();
    assert_eq!(signal.len(), 1);
    assert_eq!(
        h.platform.declared(),
        vec![("temp".to_string(), "temp from stream".to_string())]
    );

    // Registering the same consumer again is a no-op
    let (status, _) = call(
        &h.app,
        "POST",
        "/start",
        Some(json!({"stream_type": "consumer", "stream_name": "plant"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.platform.opened().len(), 1);
}

#[tokio::test]
async fn test_consume_requires_registered_stream() {
    let h = harness();
    let (status, body) = call(
        &h.app,
        "POST",
        "/consume/nowhere",
        Some(json!({"payload": {"key": "temp", "time": 1, "value": 2}})),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "STREAM_NOT_REGISTERED");
    assert!(h.agent.store().is_empty());
}

#[tokio::test]
async fn test_single_producer_stream() {
    let h = harness();

    let (status, _) = call(
        &h.app,
        "POST",
        "/form",
        Some(json!({"stream_type": "producer", "stream_name": "out"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.agent.producer_stream().as_deref(), Some("out"));

    let (status, body) = call(
        &h.app,
        "POST",
        "/form",
        Some(json!({"stream_type": "producer", "stream_name": "other"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "PRODUCER_ACTIVE");

    let (status, _) = call(
        &h.app,
        "POST",
        "/form",
        Some(json!({"stream_type": "consumer", "stream_name": "out"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    h.agent.shutdown().await;
    assert!(h.agent.producer_stream().is_none());
}

#[tokio::test]
async fn test_invalid_registration() {
    let h = harness();
    let (status, body) = call(
        &h.app,
        "POST",
        "/form",
        Some(json!({"stream_type": "sideways", "stream_name": "x"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_bridge_lifecycle() {
    let h = harness();
    let variable = json!({"name": "temp", "source_ip": "127.0.0.1", "source_port": 9100});

    let (status, _) = call(&h.app, "POST", "/bridge/temp", Some(variable.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(h.agent.registry().contains("temp"));

    let (status, body) = call(&h.app, "POST", "/bridge/temp", Some(variable)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "temp re-bridged");
    assert_eq!(h.agent.registry().len(), 1);

    let (status, _) = call(&h.app, "POST", "/unbridge/temp", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.agent.registry().is_empty());

    // Removing again is harmless
    let (status, body) = call(&h.app, "POST", "/unbridge/temp", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "temp was not bridged");
}

#[tokio::test]
async fn test_bridge_name_must_match_path() {
    let h = harness();
    let (status, _) = call(
        &h.app,
        "POST",
        "/bridge/temp",
        Some(json!({"name": "pressure", "source_ip": "127.0.0.1", "source_port": 9100})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.agent.registry().is_empty());
}

#[tokio::test]
async fn test_health_report() {
    let h = harness();
    call(
        &h.app,
        "POST",
        "/bridge/temp",
        Some(json!({"name": "temp", "source_ip": "10.0.0.5", "source_port": 9100})),
    )
    .await;

    let (status, body) = call(&h.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["id"], "signal-relay");
    assert_eq!(body["bridges"][0]["variable"]["name"], "temp");
    assert_eq!(body["bridges"][0]["url"], "ws://10.0.0.5:9100/fetch/temp");
    assert!(body["signals"].as_array().unwrap().is_empty());

    h.agent.shutdown().await;
}
