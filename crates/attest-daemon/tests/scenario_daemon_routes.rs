//! In-process scenario tests for attest-daemon HTTP endpoints.
//!
//! The Axum router is driven through `tower::ServiceExt::oneshot` against a
//! memory backend and the paper issuer; no socket is bound.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use ed25519_dalek::SigningKey;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt; // oneshot

use attest_daemon::{routes, state};
use attest_protocol::{format_signed_block, ownership_phrase, sign_envelope};
use attest_schemas::Address;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn make_state() -> Arc<state::AppState> {
    Arc::new(state::AppState::new())
}

async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, Value) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).expect("body is not valid JSON")
    };
    (status, json)
}

async fn get(st: &Arc<state::AppState>, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    call(routes::build_router(st.clone()), req).await
}

async fn post(st: &Arc<state::AppState>, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap();
    call(routes::build_router(st.clone()), req).await
}

fn key() -> SigningKey {
    SigningKey::from_bytes(&[21u8; 32])
}

fn key_address() -> Address {
    Address::from_public_key(&key().verifying_key().to_bytes())
}

// ---------------------------------------------------------------------------
// health / status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_ok_true() {
    let st = make_state();
    let (status, json) = get(&st, "/v1/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "attest-daemon");
}

#[tokio::test]
async fn status_reports_backend_and_counts() {
    let st = make_state();
    post(&st, "/v1/orders", json!({"data": {"a": "1"}})).await;

    let (status, json) = get(&st, "/v1/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["backend"], "memory");
    assert_eq!(json["orders"]["pending"], 1);
    assert_eq!(json["orders"]["attested"], 0);
    assert_eq!(json["sessions"], 0);
}

// ---------------------------------------------------------------------------
// /v1/orders
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_then_duplicate_is_409_unless_allowed() {
    let st = make_state();
    let body = json!({"data": {"username": "alice", "userId": 42}});

    let (status, created) = post(&st, "/v1/orders", body.clone()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["created"], true);
    let id = created["id"].as_i64().unwrap();

    let (status, err) = post(&st, "/v1/orders", body.clone()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "ALREADY_EXISTS");
    assert_eq!(err["order_id"], id);

    let mut allowed = body;
    allowed["allow_duplicates"] = json!(true);
    let (status, again) = post(&st, "/v1/orders", allowed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["id"], id);
    assert_eq!(again["created"], false);
}

#[tokio::test]
async fn create_rejects_invalid_data_and_address() {
    let st = make_state();

    let (status, err) = post(&st, "/v1/orders", json!({"data": ["not", "an", "object"]})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "INVALID_DATA");

    let (status, err) = post(
        &st,
        "/v1/orders",
        json!({"data": {"a": "1", "b": "2", "c": "3", "d": "4", "e": "5"}}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "INVALID_DATA");

    let (status, err) = post(
        &st,
        "/v1/orders",
        json!({"data": {"a": "1"}, "address": "not-an-address"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "INVALID_ADDRESS");
}

#[tokio::test]
async fn get_unknown_order_is_404() {
    let st = make_state();
    let (status, err) = get(&st, "/v1/orders/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["code"], "ORDER_NOT_FOUND");
}

#[tokio::test]
async fn bind_unbind_and_set_device_round_trip() {
    let st = make_state();
    let (_, created) = post(&st, "/v1/orders", json!({"data": {"a": "1"}})).await;
    let id = created["id"].as_i64().unwrap();
    let addr = key_address();

    let (status, order) = post(
        &st,
        "/v1/orders/bind",
        json!({"id": id, "address": addr.as_str()}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "addressed");
    assert_eq!(order["wallet_address"], addr.as_str());

    // Data selectors resolve under the default provider.
    let (status, order) = post(&st, "/v1/orders/unbind", json!({"data": {"a": "1"}})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "pending");
    assert!(order["wallet_address"].is_null());

    let (status, order) = post(
        &st,
        &format!("/v1/orders/{id}/device"),
        json!({"device": "dev-9"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["device_address"], "dev-9");

    let (status, err) = post(&st, "/v1/orders/unbind", json!({"device": "dev-9"})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["code"], "ADDRESS_NOT_FOUND");

    let (status, err) = post(&st, "/v1/orders/unbind", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "INVALID_SELECTOR");
}

// ---------------------------------------------------------------------------
// /v1/inbound
// ---------------------------------------------------------------------------

#[tokio::test]
async fn inbound_signed_message_attests_order() {
    let st = make_state();
    let (_, created) = post(
        &st,
        "/v1/orders",
        json!({"data": {"username": "alice", "userId": "42"}, "device": "dev-1"}),
    )
    .await;
    let id = created["id"].as_i64().unwrap();

    let envelope = sign_envelope(
        &key(),
        json!({
            "message": ownership_phrase(&key_address()),
            "data": {"username": "alice", "userId": 42},
            "provider": "default",
        }),
    );
    let text = format!("here you go {}", format_signed_block(&envelope));

    let (status, resp) = post(&st, "/v1/inbound", json!({"device": "dev-1", "text": text})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resp["reply"]["kind"], "success");
    let unit = resp["reply"]["unit"].as_str().unwrap().to_string();
    assert!(unit.starts_with("paper:"));
    assert!(resp["text"].as_str().unwrap().contains(&unit));

    let (_, order) = get(&st, &format!("/v1/orders/{id}")).await;
    assert_eq!(order["status"], "attested");
    assert_eq!(order["unit"], unit.as_str());

    // Same proof again: already attested, unit echoed back.
    let (_, resp) = post(&st, "/v1/inbound", json!({"device": "dev-1", "text": text})).await;
    assert_eq!(resp["reply"]["kind"], "already_attested");
    assert_eq!(resp["reply"]["unit"], unit.as_str());

    let (_, status) = get(&st, "/v1/status").await;
    assert_eq!(status["orders"]["attested"], 1);
    assert_eq!(status["sessions"], 1);
}

#[tokio::test]
async fn inbound_bare_address_binds_open_order() {
    let st = make_state();
    let (_, created) = post(
        &st,
        "/v1/orders",
        json!({"data": {"a": "1"}, "device": "dev-2"}),
    )
    .await;
    let id = created["id"].as_i64().unwrap();

    let (_, resp) = post(
        &st,
        "/v1/inbound",
        json!({"device": "dev-2", "text": key_address().as_str()}),
    )
    .await;
    assert_eq!(resp["reply"]["kind"], "address_accepted");

    let (_, order) = get(&st, &format!("/v1/orders/{id}")).await;
    assert_eq!(order["status"], "addressed");

    let (_, resp) = post(&st, "/v1/inbound", json!({"device": "dev-2", "text": "hello"})).await;
    assert_eq!(resp["reply"]["kind"], "help");
}

#[tokio::test]
async fn inbound_rejects_blank_device() {
    let st = make_state();
    let (status, err) = post(&st, "/v1/inbound", json!({"device": "  ", "text": "hi"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "INVALID_DEVICE");
}

// ---------------------------------------------------------------------------
// outbox → bus
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dispatcher_publishes_notifications_on_the_bus() {
    let st = make_state();
    let mut rx = st.bus.subscribe();

    let (_, created) = post(&st, "/v1/orders", json!({"data": {"a": "1"}})).await;
    let id = created["id"].as_i64().unwrap();
    post(
        &st,
        "/v1/orders/bind",
        json!({"id": id, "address": key_address().as_str()}),
    )
    .await;

    let report = st.dispatcher(Vec::new()).run_once().await.unwrap();
    assert_eq!(report.delivered, 1);

    loop {
        match rx.try_recv().unwrap() {
            state::BusMsg::Notification { notification, .. } => {
                assert_eq!(notification.topic(), "address_bound");
                break;
            }
            _ => continue,
        }
    }
}
