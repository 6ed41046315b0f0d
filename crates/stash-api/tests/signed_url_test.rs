//! Signed download links: issue, consume, expire with the project.

mod helpers;

use chrono::{Duration, Utc};
use helpers::{setup_test_app, TestApp, TestUser, TEST_BASE_URL};
use serde_json::json;
use uuid::Uuid;

async fn share(app: &TestApp, user: &TestUser, file_id: &str, expires_in: Duration) -> axum_test::TestResponse {
    app.client()
        .post(&format!("/api/files/{}/share", file_id))
        .add_header("Authorization", user.bearer())
        .json(&json!({ "expires_at": (Utc::now() + expires_in).to_rfc3339() }))
        .await
}

fn token_of(download_url: &str) -> String {
    download_url
        .split_once("?token=")
        .map(|(_, token)| token.to_string())
        .expect("token in download url")
}

#[tokio::test]
async fn test_signed_link_downloads_without_credentials() {
    let app = setup_test_app();
    let alice = app.user("alice");
    let project_id = app.create_project(&alice, "alice-docs").await;
    let file = app.upload(&alice, project_id, "notes.txt", b"hello world").await;

    let response = share(&app, &alice, file["id"].as_str().unwrap(), Duration::hours(1)).await;
    assert_eq!(response.status_code(), 200);
    let shared: serde_json::Value = response.json();
    let url = shared["download_url"].as_str().unwrap();
    assert!(url.starts_with(&format!("{}/api/files/download-signed?token=", TEST_BASE_URL)));

    let response = app
        .client()
        .get("/api/files/download-signed")
        .add_query_param("token", token_of(url))
        .await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.header("content-type"), "text/plain; charset=utf-8");
    assert_eq!(response.as_bytes().as_ref(), b"hello world");
}

#[tokio::test]
async fn test_signed_link_token_is_not_a_session() {
    let app = setup_test_app();
    let alice = app.user("alice");
    let project_id = app.create_project(&alice, "alice-docs").await;
    let file = app.upload(&alice, project_id, "notes.txt", b"hello").await;
    let file_id = file["id"].as_str().unwrap();

    let shared: serde_json::Value = share(&app, &alice, file_id, Duration::hours(1)).await.json();
    let link_token = token_of(shared["download_url"].as_str().unwrap());

    for path in ["/api/files".to_string(), format!("/api/files/{}", file_id)] {
        let response = app
            .client()
            .get(&path)
            .add_header("Authorization", format!("Bearer {}", link_token))
            .await;
        assert_eq!(response.status_code(), 401, "{} accepted a link token", path);
    }
}

#[tokio::test]
async fn test_share_rules() {
    let app = setup_test_app();
    let alice = app.user("alice");
    let mallory = app.user("mallory");
    let project_id = app.create_project(&alice, "alice-docs").await;
    let file = app.upload(&alice, project_id, "notes.txt", b"hello").await;
    let file_id = file["id"].as_str().unwrap();

    let response = share(&app, &alice, file_id, Duration::minutes(2)).await;
    assert_eq!(response.status_code(), 422);

    let response = share(&app, &alice, file_id, Duration::minutes(-5)).await;
    assert_eq!(response.status_code(), 422);

    let response = share(&app, &mallory, file_id, Duration::hours(1)).await;
    assert_eq!(response.status_code(), 403);

    let response = share(&app, &alice, &Uuid::new_v4().to_string(), Duration::hours(1)).await;
    assert_eq!(response.status_code(), 404);
}

#[tokio::test]
async fn test_bad_tokens_are_rejected() {
    let app = setup_test_app();

    let response = app
        .client()
        .get("/api/files/download-signed")
        .add_query_param("token", "garbage")
        .await;
    assert_eq!(response.status_code(), 401);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "invalid download link");

    // A session token is signed with the same secret but lacks the bucket claim.
    let alice = app.user("alice");
    let response = app
        .client()
        .get("/api/files/download-signed")
        .add_query_param("token", &alice.token)
        .await;
    assert_eq!(response.status_code(), 401);

    let response = app
        .client()
        .get("/api/files/download-signed")
        .add_query_param("token", "")
        .await;
    assert_eq!(response.status_code(), 422);
}

#[tokio::test]
async fn test_link_dies_with_its_project() {
    let app = setup_test_app();
    let alice = app.user("alice");
    let project_id = app.create_project(&alice, "alice-docs").await;
    let file = app.upload(&alice, project_id, "notes.txt", b"hello").await;
    let response = share(&app, &alice, file["id"].as_str().unwrap(), Duration::hours(1)).await;
    let shared: serde_json::Value = response.json();
    let token = token_of(shared["download_url"].as_str().unwrap());

    let response = app
        .client()
        .delete(&format!("/api/projects/{}", project_id))
        .add_header("Authorization", alice.bearer())
        .await;
    assert_eq!(response.status_code(), 200);

    let response = app
        .client()
        .get("/api/files/download-signed")
        .add_query_param("token", &token)
        .await;
    assert_eq!(response.status_code(), 404);
}
