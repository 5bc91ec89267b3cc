use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use ekklesia_shared::Action;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use uuid::Uuid;

use crate::tests::fixtures::{TenantFixture, ANA_PHONE};
use crate::{app, AppState};

// Helper function to create the test app over a memory store
fn create_test_app(fixture: &TenantFixture) -> Router {
    let (runner, _outbox) = fixture.runner(Duration::ZERO);
    app(Arc::new(AppState {
        runner: Arc::new(runner),
        store: fixture.dyn_store(),
        shutdown: CancellationToken::new(),
    }))
}

async fn post_dispatch(app: Router, body: String) -> (StatusCode, Value) {
    let request = Request::builder()
        .uri("/api/v1/automations/dispatch")
        .method("POST")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_dispatch_runs_automation() {
    let fixture = TenantFixture::with_channel().await;
    let person = fixture.add_person(Some("Ana Souza"), Some(ANA_PHONE)).await;
    let automation = fixture
        .add_automation(vec![Action::send_message("Bem-vindo @nome"), Action::add_tag("vip")])
        .await;

    let body = json!({ "automation_id": automation.id, "person_id": person.id }).to_string();
    let (status, response) = post_dispatch(create_test_app(&fixture), body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["success"], true);
    assert_eq!(response["report"]["status"]["state"], "completed");
    assert_eq!(response["report"]["entries"][0]["status"], "succeeded");
    assert_eq!(response["report"]["entries"][1]["outcome"]["effect"], "tag_applied");
    assert_eq!(fixture.store.messages().await[0].content, "Bem-vindo Ana");
}

#[tokio::test]
async fn test_dispatch_succeeds_even_when_actions_fail() {
    let fixture = TenantFixture::without_channel();
    let person = fixture.add_person(Some("Ana Souza"), None).await;
    let automation = fixture.add_automation(vec![Action::send_message("Oi")]).await;

    let body = json!({ "automation_id": automation.id, "person_id": person.id }).to_string();
    let (status, response) = post_dispatch(create_test_app(&fixture), body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["success"], true);
    assert_eq!(response["report"]["entries"][0]["status"], "failed");
    assert_eq!(response["report"]["entries"][0]["code"], "no_channel_configured");
}

#[tokio::test]
async fn test_dispatch_unknown_automation_is_bad_request() {
    let fixture = TenantFixture::with_channel().await;
    let person = fixture.add_person(Some("Ana Souza"), Some(ANA_PHONE)).await;

    let body = json!({ "automation_id": Uuid::new_v4(), "person_id": person.id }).to_string();
    let (status, response) = post_dispatch(create_test_app(&fixture), body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["code"], "NOT_FOUND");
    assert!(response["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn test_dispatch_unknown_person_is_bad_request() {
    let fixture = TenantFixture::with_channel().await;
    let automation = fixture.add_automation(vec![Action::add_tag("vip")]).await;

    let body = json!({ "automation_id": automation.id, "person_id": Uuid::new_v4() }).to_string();
    let (status, response) = post_dispatch(create_test_app(&fixture), body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(response["error"].as_str().unwrap().starts_with("person"));
    assert!(fixture.store.person_tags().await.is_empty());
}

#[tokio::test]
async fn test_dispatch_rejects_malformed_bodies() {
    let fixture = TenantFixture::with_channel().await;

    let cases = [
        "{not json".to_string(),
        json!({ "automation_id": Uuid::new_v4() }).to_string(),
        json!({ "automation_id": Uuid::new_v4(), "person_id": "" }).to_string(),
        json!({ "automation_id": "abc", "person_id": Uuid::new_v4() }).to_string(),
    ];

    for body in cases {
        let (status, response) = post_dispatch(create_test_app(&fixture), body.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {}", body);
        assert!(response["error"].is_string(), "body: {}", body);
    }
}

#[tokio::test]
async fn test_dispatch_inactive_automation_is_ok() {
    let fixture = TenantFixture::with_channel().await;
    let person = fixture.add_person(Some("Ana Souza"), Some(ANA_PHONE)).await;
    let mut automation = fixture.add_automation(vec![Action::add_tag("vip")]).await;
    automation.is_active = false;
    fixture.store.insert_automation(automation.clone()).await;

    let body = json!({ "automation_id": automation.id, "person_id": person.id }).to_string();
    let (status, response) = post_dispatch(create_test_app(&fixture), body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["report"]["status"]["state"], "skipped_inactive");
}

#[tokio::test]
async fn test_health_endpoints() {
    let fixture = TenantFixture::without_channel();

    let response = create_test_app(&fixture)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = create_test_app(&fixture)
        .oneshot(Request::builder().uri("/health/detailed").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["executors"], json!(["add_tag", "send_message"]));
}
