#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use courier_api::{AppState, AppStateInner, AuthSettings};
use courier_db::Database;

pub const SECRET: &str = "integration-test-secret";

pub fn app() -> (Router, AppState) {
    app_with_buffer(64)
}

/// App whose sessions have an outbound queue of `buffer` frames.
pub fn app_with_buffer(buffer: usize) -> (Router, AppState) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let auth = AuthSettings {
        jwt_secret: SECRET.into(),
        token_ttl: chrono::Duration::hours(1),
        cookie_secure: false,
    };
    let state = AppStateInner::new(db, auth, buffer);
    (courier_api::router(state.clone()), state)
}

/// Send a request and decode the JSON body (`Null` for an empty body).
pub async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

pub fn login_request(email: &str, password: &str) -> Request<Body> {
    let form = format!(
        "username={}&password={}&grant_type=password",
        email.replace('@', "%40"),
        password.replace(' ', "+")
    );
    Request::builder()
        .method("POST")
        .uri("/login/")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form))
        .unwrap()
}

/// Register `name` and log in, returning `(user_id, access_token)`.
pub async fn signup(app: &Router, name: &str) -> (Uuid, String) {
    let email = format!("{}@example.com", name.to_lowercase());
    let (status, body) = send(
        app,
        json_request(
            "POST",
            "/register/",
            None,
            json!({
                "email": email,
                "name": name,
                "password": "correct horse",
                "password_check": "correct horse",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, body) = send(app, login_request(&email, "correct horse")).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let user_id = body["user_id"].as_str().unwrap().parse().unwrap();
    let token = body["access_token"].as_str().unwrap().to_string();
    (user_id, token)
}

/// Create a channel owned by the token's user, returning its id.
pub async fn create_channel(app: &Router, token: &str, name: &str, members: &[Uuid]) -> Uuid {
    let (status, body) = send(
        app,
        json_request(
            "POST",
            "/api/v1/channels",
            Some(token),
            json!({ "name": name, "member_ids": members }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["id"].as_str().unwrap().parse().unwrap()
}

pub async fn post_message(app: &Router, token: &str, channel_id: Uuid, text: &str) -> (StatusCode, Value) {
    send(
        app,
        json_request(
            "POST",
            "/api/v1/messages",
            Some(token),
            json!({ "channel_id": channel_id, "text": text }),
        ),
    )
    .await
}
