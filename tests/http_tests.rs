//! End-to-end tests over the `reqwest` transport against a mock server.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tokenwarden::{Credential, MemoryStore, Registration, RequestRuntime, RuntimeConfig, RuntimeError};

fn runtime_for(server: &MockServer) -> RequestRuntime {
    let config = RuntimeConfig {
        base_url: server.uri(),
        ..RuntimeConfig::default()
    };
    runtime_with(config)
}

fn runtime_with(config: RuntimeConfig) -> RequestRuntime {
    RequestRuntime::builder(config)
        .store(Arc::new(MemoryStore::new()))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_parallel_unauthorized_calls_refresh_once() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/data"))
        .and(header("authorization", "Bearer new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [1, 2, 3] })))
        .with_priority(1)
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/data"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(10)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({ "refresh_token": "r-1" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "new" }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let runtime = Arc::new(runtime_for(&server));
    runtime.set_credential(Credential::new("old", Some("r-1".to_string())));

    let calls = (0..3).map(|_| {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move { runtime.get("/api/data").await })
    });
    let responses = futures::future::join_all(calls).await;

    for response in responses {
        let response = response.unwrap().unwrap();
        assert_eq!(response.status, 200);
        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["items"], json!([1, 2, 3]));
    }
    assert_eq!(runtime.coordinator().refresh_calls(), 1);
}

#[tokio::test]
async fn test_login_attaches_returned_token() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({ "email": "ada@example.com", "password": "hunter2" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "token": "a-1", "refresh_token": "r-1" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/profile"))
        .and(header("authorization", "Bearer a-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ada"))
        .expect(1)
        .mount(&server)
        .await;

    let runtime = runtime_for(&server);
    runtime.login("ada@example.com", "hunter2").await.unwrap();

    let response = runtime.get("/api/profile").await.unwrap();
    assert_eq!(response.text(), "ada");
}

#[tokio::test]
async fn test_server_error_is_recorded_with_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let runtime = runtime_for(&server);
    let response = runtime.get("/api/missing").await.unwrap();

    assert_eq!(response.status, 404);
    let entry = &runtime.ledger().entries()[0];
    assert_eq!(entry.event.kind.status(), Some(404));
    assert_eq!(
        entry.event.origin.as_deref(),
        Some(format!("{}/api/missing", server.uri()).as_str())
    );
}

#[tokio::test]
async fn test_register_posts_account_and_signs_in() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/register"))
        .and(body_json(json!({
            "email": "ada@example.com",
            "password": "hunter2",
            "name": "Ada"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "access_token": "a-1",
            "refresh_token": "r-1",
            "user": { "id": 7, "name": "Ada" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/me"))
        .and(header("authorization", "Bearer a-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let runtime = runtime_for(&server);
    let registration = Registration::new("ada@example.com", "hunter2").with_name("Ada");

    assert!(runtime.register(&registration).await.unwrap());
    assert_eq!(runtime.current_user().unwrap()["id"], 7);
    assert_eq!(runtime.get("/api/me").await.unwrap().status, 200);
}

#[tokio::test]
async fn test_health_returns_server_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
        .expect(1)
        .mount(&server)
        .await;

    let status = runtime_for(&server).health().await.unwrap();
    assert_eq!(status["status"], "ok");
}

#[tokio::test]
async fn test_unhealthy_server_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = RuntimeConfig {
        base_url: server.uri(),
        ..RuntimeConfig::default()
    };
    config.retry.max_attempts = 0;

    let outcome = runtime_with(config).health().await;
    assert!(
        matches!(outcome, Err(RuntimeError::Unhealthy(503))),
        "unexpected outcome: {:?}",
        outcome
    );
}
