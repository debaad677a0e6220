//! Requests that are answered before any database work happens.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use diesel_async::{
    AsyncPgConnection,
    pooled_connection::{AsyncDieselConnectionManager, bb8::Pool},
};
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use restaurant_orderservice::{
    app_state::AppState,
    auth::{Claims, JwtKeys, Role},
    bootstrap,
    notifications::{Broadcaster, LogNotifier},
};
use serde_json::{Value, json};
use tower::ServiceExt;

const SECRET: &str = "guard-test-secret";

fn state() -> AppState {
    let manager =
        AsyncDieselConnectionManager::<AsyncPgConnection>::new("postgres://localhost:1/unreachable");
    AppState {
        db_pool: Pool::builder().build_unchecked(manager),
        jwt_keys: JwtKeys::from_secret(SECRET),
        notifier: Arc::new(LogNotifier),
        broadcaster: Broadcaster::default(),
        transaction_timeout: Duration::from_secs(1),
    }
}

fn token(sub: i32, role: Role) -> String {
    let exp = (chrono::Utc::now().timestamp() + 600) as usize;
    encode(
        &Header::default(),
        &Claims { sub, role, exp },
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

async fn send(request: Request<Body>) -> (StatusCode, Value) {
    let response = bootstrap::app(state()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn post_json(uri: &str, bearer: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::AUTHORIZATION, format!("Bearer {bearer}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let (status, body) = send(Request::get("/orders").body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], 401);
    assert_eq!(body["message"], "Authentication required");
}

#[tokio::test]
async fn forged_token_is_unauthorized() {
    let forged = encode(
        &Header::default(),
        &Claims {
            sub: 1,
            role: Role::Admin,
            exp: (chrono::Utc::now().timestamp() + 600) as usize,
        },
        &EncodingKey::from_secret(b"someone-else"),
    )
    .unwrap();

    let request = Request::get("/orders")
        .header(header::AUTHORIZATION, format!("Bearer {forged}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn customers_cannot_create_vouchers() {
    let request = post_json(
        "/vouchers",
        &token(5, Role::Customer),
        json!({
            "code": "FREE",
            "discount_value": 10.0,
            "discount_type": "fixed",
            "valid_from": "2025-01-01T00:00:00Z",
            "valid_until": "2025-02-01T00:00:00Z",
            "min_order_value": 0.0,
            "usage_limit": 5
        }),
    );
    let (status, body) = send(request).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Admin access required");
}

#[tokio::test]
async fn merge_rejects_mixed_addressing() {
    let request = post_json(
        "/orders/merge",
        &token(2, Role::Staff),
        json!({ "source_table": 1, "target_table": 2, "source_order_id": 3, "target_order_id": 4 }),
    );
    let (status, body) = send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
}

#[tokio::test]
async fn merge_rejects_missing_addressing() {
    let (status, _) = send(post_json("/orders/merge", &token(2, Role::Staff), json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn split_needs_exactly_one_source() {
    let request = post_json(
        "/orders/split",
        &token(2, Role::Staff),
        json!({ "table_number": 4, "order_id": 9, "items": [] }),
    );
    let (status, _) = send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn availability_needs_a_valid_window() {
    let request = Request::get("/orders/available-tables?start=2025-01-01T12:00:00Z&end=2025-01-01T11:00:00Z")
        .header(header::AUTHORIZATION, format!("Bearer {}", token(5, Role::Customer)))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["data"], Value::Null);
}

#[tokio::test]
async fn live_feed_is_staff_only() {
    let request = Request::get("/events")
        .header(header::AUTHORIZATION, format!("Bearer {}", token(5, Role::Customer)))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
