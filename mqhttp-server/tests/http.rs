mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use mqhttp_client::{ClientError, ConnectOptions, Publisher, QoS};
use mqhttp_server::broker::MessageHook;
use mqhttp_server::http::{self, AppState, BasicCredentials, BrokerPublisher};
use mqhttp_server::relay::RelayHook;
use mqhttp_server::slot::{LatestValue, Reading};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::ServiceExt;

use crate::common::{connect, recv, start_broker, TestBroker};

#[derive(Default)]
struct FakePublisher {
    sent: Mutex<Vec<(String, QoS, Bytes)>>,
    fail: bool,
}

#[async_trait]
impl BrokerPublisher for FakePublisher {
    async fn publish(&self, topic: &str, qos: QoS, _retain: bool, payload: Bytes) -> Result<(), ClientError> {
        if self.fail {
            return Err(ClientError::NotConnected);
        }
        self.sent.lock().await.push((topic.to_string(), qos, payload));
        Ok(())
    }
}

fn state(slot: &LatestValue, publisher: Arc<dyn BrokerPublisher>) -> AppState {
    AppState::new(
        slot.clone(),
        publisher,
        BasicCredentials::new("try", "catch"),
        QoS::AtMostOnce,
    )
}

fn app(slot: &LatestValue, publisher: Arc<dyn BrokerPublisher>) -> Router {
    http::router(state(slot, publisher))
}

fn publish_body(topic: &str, message: &str) -> String {
    json!({"topic": topic, "message": message}).to_string()
}

fn basic(user: &str, pass: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, pass)))
}

fn post_publish(auth: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/publish")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

async fn relay_broker(slot: &LatestValue) -> TestBroker {
    let hook_slot = slot.clone();
    start_broker(move |handle| {
        let hook: Arc<dyn MessageHook> = Arc::new(RelayHook::new(hook_slot, handle));
        Some(hook)
    })
    .await
}

#[tokio::test]
async fn ping_and_ready_need_no_state() {
    let slot = LatestValue::new();
    let router = app(&slot, Arc::new(FakePublisher::default()));

    let response = router.clone().oneshot(get("/ping")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "pong");

    let response = router.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "i am ready !");
}

#[tokio::test]
async fn latest_value_starts_empty() {
    let slot = LatestValue::new();
    let router = app(&slot, Arc::new(FakePublisher::default()));

    let response = router.oneshot(get("/subscribe/sensor/suhu")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"topic": "", "message": ""}));
}

#[tokio::test]
async fn accepted_publish_is_readable_and_forwarded() {
    let slot = LatestValue::new();
    let publisher = Arc::new(FakePublisher::default());
    let router = app(&slot, publisher.clone());

    let response = router
        .clone()
        .oneshot(post_publish(
            Some(&basic("try", "catch")),
            r#"{"topic":"sensor/suhu","message":"30"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await, json!({"status": "ok"}));

    let response = router.oneshot(get("/subscribe/sensor/suhu")).await.unwrap();
    assert_eq!(
        body_json(response).await,
        json!({"topic": "sensor/suhu", "message": "30"})
    );

    let sent = publisher.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "sensor/suhu");
    assert_eq!(&sent[0].2[..], b"30");
}

#[tokio::test]
async fn missing_or_wrong_credentials_are_rejected() {
    let slot = LatestValue::new();
    let publisher = Arc::new(FakePublisher::default());
    let router = app(&slot, publisher.clone());
    let body = r#"{"topic":"sensor/suhu","message":"30"}"#;

    for auth in [None, Some(basic("try", "nope")), Some("Bearer token".to_string())] {
        let response = router
            .clone()
            .oneshot(post_publish(auth.as_deref(), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"Authorization Required\""
        );
    }

    assert!(publisher.sent.lock().await.is_empty());
    assert_eq!(slot.snapshot().await, Reading::default());
}

#[tokio::test]
async fn credentials_are_checked_before_the_body() {
    let slot = LatestValue::new();
    let publisher = Arc::new(FakePublisher::default());
    let router = http::router(state(&slot, publisher.clone()).with_body_limit(64));
    let oversized = publish_body("sensor/suhu", &"9".repeat(1024));

    for body in ["not json", r#"{"topic":""}"#, oversized.as_str()] {
        let response = router
            .clone()
            .oneshot(post_publish(None, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "body {:.32}", body);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"Authorization Required\""
        );
    }

    assert!(publisher.sent.lock().await.is_empty());
    assert_eq!(slot.snapshot().await, Reading::default());
}

#[tokio::test]
async fn topics_longer_than_a_length_prefix_are_bad_requests() {
    let slot = LatestValue::new();
    slot.set("sensor/suhu", "30").await;
    let publisher = Arc::new(FakePublisher::default());
    let router = app(&slot, publisher.clone());
    let auth = basic("try", "catch");

    for topic in ["a".repeat(65_537), "a".repeat(65_536), "sensor/+".to_string()] {
        let response = router
            .clone()
            .oneshot(post_publish(Some(&auth), &publish_body(&topic, "hello")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "topic of {} bytes", topic.len());
        assert_eq!(body_json(response).await["status"], "error");
    }

    // the longest legal topic still goes through
    let response = router
        .oneshot(post_publish(Some(&auth), &publish_body(&"a".repeat(65_535), "hello")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let sent = publisher.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0.len(), 65_535);
    assert_eq!(slot.snapshot().await.topic.len(), 65_535);
}

#[tokio::test]
async fn bodies_over_the_limit_are_payload_too_large() {
    let slot = LatestValue::new();
    let publisher = Arc::new(FakePublisher::default());
    let router = http::router(state(&slot, publisher.clone()).with_body_limit(1024));

    let response = router
        .clone()
        .oneshot(post_publish(
            Some(&basic("try", "catch")),
            &publish_body("sensor/suhu", &"9".repeat(2048)),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body_json(response).await["status"], "error");
    assert!(publisher.sent.lock().await.is_empty());
    assert_eq!(slot.snapshot().await, Reading::default());

    let response = router
        .oneshot(post_publish(
            Some(&basic("try", "catch")),
            &publish_body("sensor/suhu", "30"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn incomplete_bodies_are_bad_requests() {
    let slot = LatestValue::new();
    let publisher = Arc::new(FakePublisher::default());
    let router = app(&slot, publisher.clone());
    let auth = basic("try", "catch");

    let bodies = [
        r#"{"message":"30"}"#,
        r#"{"topic":"sensor/suhu"}"#,
        r#"{"topic":"","message":"30"}"#,
        r#"{"topic":"sensor/suhu","message":""}"#,
        "not json",
    ];
    for body in bodies {
        let response = router
            .clone()
            .oneshot(post_publish(Some(&auth), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {}", body);
        let json = body_json(response).await;
        assert_eq!(json["status"], "error");
        assert!(json["error"].as_str().is_some_and(|e| !e.is_empty()));
    }

    assert!(publisher.sent.lock().await.is_empty());
    assert_eq!(slot.snapshot().await, Reading::default());
}

#[tokio::test]
async fn broker_failure_is_failed_dependency() {
    let slot = LatestValue::new();
    let publisher = Arc::new(FakePublisher {
        fail: true,
        ..Default::default()
    });
    let router = app(&slot, publisher);

    let response = router
        .oneshot(post_publish(
            Some(&basic("try", "catch")),
            r#"{"topic":"sensor/suhu","message":"30"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FAILED_DEPENDENCY);
    let json = body_json(response).await;
    assert_eq!(json["status"], "error");

    // the slot is written before the publish is attempted
    assert_eq!(slot.snapshot().await.message, "30");
}

#[tokio::test]
async fn content_type_is_not_required() {
    let slot = LatestValue::new();
    let router = app(&slot, Arc::new(FakePublisher::default()));

    let request = Request::builder()
        .method("POST")
        .uri("/publish")
        .header(header::AUTHORIZATION, basic("try", "catch"))
        .body(Body::from(r#"{"topic":"a","message":"b"}"#))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn http_write_travels_through_broker_to_subscribers() {
    let slot = LatestValue::new();
    let broker = relay_broker(&slot).await;

    let mut sub = connect(&broker, "dashboard").await;
    sub.subscribe("sensor/suhu", QoS::AtMostOnce).await.unwrap();

    let publisher = Publisher::connect(
        &broker.addr(),
        ConnectOptions::new("bridge").with_credentials("user", "password"),
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    let router = app(&slot, publisher.clone());

    let response = router
        .clone()
        .oneshot(post_publish(
            Some(&basic("try", "catch")),
            r#"{"topic":"sensor/suhu","message":"31.2"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let got = recv(&mut sub).await;
    assert_eq!(&got.payload[..], b"31.2");

    let response = router.oneshot(get("/subscribe/sensor/suhu")).await.unwrap();
    assert_eq!(
        body_json(response).await,
        json!({"topic": "sensor/suhu", "message": "31.2"})
    );
    publisher.close().await;
}

#[tokio::test]
async fn oversized_message_fails_and_the_connection_survives() {
    let slot = LatestValue::new();
    let broker = relay_broker(&slot).await;

    let mut sub = connect(&broker, "dashboard").await;
    sub.subscribe("sensor/suhu", QoS::AtMostOnce).await.unwrap();

    let publisher = Publisher::connect(
        &broker.addr(),
        ConnectOptions::new("bridge").with_max_packet_size(mqhttp_protocol::DEFAULT_MAX_PACKET_SIZE),
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    // body limit well above the broker frame limit so the client check is what trips
    let router = http::router(state(&slot, publisher.clone()).with_body_limit(1024 * 1024));
    let auth = basic("try", "catch");

    let response = router
        .clone()
        .oneshot(post_publish(
            Some(&auth),
            &publish_body("sensor/suhu", &"9".repeat(300 * 1024)),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FAILED_DEPENDENCY);

    let err = publisher
        .publish("sensor/suhu", QoS::AtMostOnce, false, Bytes::from(vec![b'9'; 300 * 1024]))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::PacketTooLarge { .. }), "{:?}", err);
    assert!(!err.is_connection_lost());

    let response = router
        .oneshot(post_publish(Some(&auth), &publish_body("sensor/suhu", "small")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // nothing oversized was ever written, so the first delivery is the small one
    let got = recv(&mut sub).await;
    assert_eq!(&got.payload[..], b"small");
    publisher.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn device_and_http_writes_never_tear_the_latest_value() {
    let slot = LatestValue::new();
    let broker = relay_broker(&slot).await;
    let publisher = Publisher::connect(&broker.addr(), ConnectOptions::new("bridge"), Duration::from_secs(5))
        .await
        .unwrap();
    let router = app(&slot, publisher.clone());

    let mut writers = Vec::new();
    for device in 0..3 {
        let mut client = connect(&broker, &format!("dev{}", device)).await;
        writers.push(tokio::spawn(async move {
            for i in 0..100 {
                let topic = format!("sensor/dev{}", device);
                let message = format!("dev{}-{}", device, i);
                client.publish(&topic, QoS::AtMostOnce, false, message).await.unwrap();
            }
            // a round trip makes sure every publish above reached the broker
            client.ping().await.unwrap();
        }));
    }
    for writer in 0..2 {
        let router = router.clone();
        writers.push(tokio::spawn(async move {
            let auth = basic("try", "catch");
            for i in 0..50 {
                let body = publish_body(&format!("http/w{}", writer), &format!("w{}-{}", writer, i));
                let response = router.clone().oneshot(post_publish(Some(&auth), &body)).await.unwrap();
                assert_eq!(response.status(), StatusCode::CREATED);
            }
        }));
    }

    let mut readers = Vec::new();
    for _ in 0..2 {
        let router = router.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..300 {
                let response = router.clone().oneshot(get("/subscribe/sensor/suhu")).await.unwrap();
                let reading: Reading = serde_json::from_str(&body_text(response).await).unwrap();
                if reading.topic.is_empty() {
                    assert!(reading.message.is_empty(), "torn read: {:?}", reading);
                    continue;
                }
                let tag = reading.topic.rsplit('/').next().unwrap();
                assert!(
                    reading.message.starts_with(&format!("{}-", tag)),
                    "torn read: {:?}",
                    reading
                );
            }
        }));
    }

    for task in writers.into_iter().chain(readers) {
        task.await.unwrap();
    }

    let last = slot.snapshot().await;
    assert!(!last.topic.is_empty());
    assert!(last.message.starts_with(&format!("{}-", last.topic.rsplit('/').next().unwrap())));
    publisher.close().await;
}
