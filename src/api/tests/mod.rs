use super::*;
use crate::Config;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

mod collections;

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.blob_dir = dir.path().join("blobs");
    config.persistence.database_path = dir.path().join("bulkzip.db");
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();
    config
}

/// Helper to create a test service wrapped in Arc
async fn create_test_service() -> (Arc<BulkZip>, TempDir) {
    create_test_service_with(|_| {}).await
}

async fn create_test_service_with(
    customize: impl FnOnce(&mut Config),
) -> (Arc<BulkZip>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    customize(&mut config);
    let service = BulkZip::new(config).await.unwrap();
    (Arc::new(service), dir)
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn test_api_server_spawns_and_stops_on_shutdown() {
    let (service, _dir) = create_test_service().await;

    let api_handle = service.spawn_api_server();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!api_handle.is_finished(), "server should keep running");

    service.shutdown().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), api_handle)
        .await
        .expect("server should stop after shutdown")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_api_server_reports_bind_failure() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = occupied.local_addr().unwrap();

    let (service, _dir) = create_test_service_with(|c| c.api.bind_address = address).await;

    let result = start_api_server(service).await;
    assert!(matches!(result, Err(crate::Error::Io(_))));
}

#[tokio::test]
async fn test_cors_enabled() {
    let (service, _dir) = create_test_service_with(|c| {
        c.api.cors_enabled = true;
        c.api.cors_origins = vec!["*".to_string()];
    })
    .await;
    let app = create_router(service);

    let request = Request::builder()
        .uri("/api/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin"),
        "CORS header should be present when CORS is enabled"
    );
}

#[tokio::test]
async fn test_cors_specific_origin() {
    let (service, _dir) = create_test_service_with(|c| {
        c.api.cors_origins = vec!["https://share.example.com".to_string()];
    })
    .await;
    let app = create_router(service);

    let request = Request::builder()
        .uri("/api/health")
        .header("Origin", "https://share.example.com")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "https://share.example.com"
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let (service, _dir) = create_test_service_with(|c| c.api.cors_enabled = false).await;
    let app = create_router(service);

    let request = Request::builder()
        .uri("/api/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        !response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_swagger_ui_toggle() {
    for (enabled, expected) in [(true, StatusCode::OK), (false, StatusCode::NOT_FOUND)] {
        let (service, _dir) = create_test_service_with(|c| c.api.swagger_ui = enabled).await;
        let app = create_router(service);

        let request = Request::builder()
            .uri("/api-docs/openapi.json")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), expected, "swagger_ui = {enabled}");
    }
}
