//! Test utilities and common setup.

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use sceneon::api::{self, AppState};
use sceneon::auth::{AuthConfig, AuthState};
use sceneon::db::Database;
use sceneon::ws::Hub;

/// A running test application over an in-memory database.
pub struct TestApp {
    pub router: Router,
    pub db: Database,
}

/// Create a test application with all services initialized.
pub async fn test_app() -> TestApp {
    let db = Database::in_memory().await.unwrap();

    let auth_config = AuthConfig {
        jwt_secret: Some("test-secret-for-integration-tests-minimum-32-chars".to_string()),
        ..AuthConfig::default()
    };
    let auth_state = AuthState::new(auth_config);

    let state = AppState::new(&db, Hub::spawn(), auth_state);
    TestApp {
        router: api::create_router(state),
        db,
    }
}

/// Issue a request and return status plus parsed JSON body.
pub async fn request(
    router: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().uri(uri).method(method);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();

    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    (status, json)
}

pub async fn get(router: &Router, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
    request(router, Method::GET, uri, token, None).await
}

pub async fn post(
    router: &Router,
    uri: &str,
    token: Option<&str>,
    body: Value,
) -> (StatusCode, Value) {
    request(router, Method::POST, uri, token, Some(body)).await
}

/// Run the full one-time-code login flow and return an access token.
pub async fn login(router: &Router, email: &str) -> String {
    let (status, body) = post(
        router,
        "/api/v1/auth/send-otp",
        None,
        json!({"email": email}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "send-otp failed: {body}");
    let code = body["code"].as_str().unwrap().to_string();

    let (status, body) = post(
        router,
        "/api/v1/auth/verify-otp",
        None,
        json!({"email": email, "code": code}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "verify-otp failed: {body}");

    body["access_token"].as_str().unwrap().to_string()
}

/// Log in, create a persona and start a scene; returns (token, scene_id).
pub async fn login_with_scene(
    router: &Router,
    email: &str,
    name: &str,
    latitude: f64,
    longitude: f64,
) -> (String, String) {
    let token = login(router, email).await;

    let (status, persona) = post(
        router,
        "/api/v1/personas",
        Some(&token),
        json!({"name": name}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "persona upsert failed: {persona}");
    let persona_id = persona["id"].as_str().unwrap().to_string();

    let (status, scene) = post(
        router,
        "/api/v1/scenes/start",
        Some(&token),
        json!({"persona_id": persona_id, "latitude": latitude, "longitude": longitude}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "scene start failed: {scene}");

    (token, scene["id"].as_str().unwrap().to_string())
}
