use super::*;
use crate::types::ProgressEvent;
use futures::StreamExt;
use std::time::Duration;
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.blob_dir = dir.path().join("blobs");
    config.persistence.database_path = dir.path().join("bulkzip.db");
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();
    config
}

async fn create_test_service() -> (BulkZip, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let service = BulkZip::new(test_config(&dir)).await.unwrap();
    (service, dir)
}

#[tokio::test]
async fn new_creates_blob_dir_and_database() {
    let dir = tempfile::tempdir().unwrap();
    let _service = BulkZip::new(test_config(&dir)).await.unwrap();

    assert!(dir.path().join("blobs").is_dir());
    assert!(dir.path().join("bulkzip.db").exists());
}

#[tokio::test]
async fn new_rejects_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.archive.part_budget_bytes = 0;

    let result = BulkZip::new(config).await;
    assert!(matches!(result, Err(Error::Config { .. })));
}

#[tokio::test]
async fn register_links_keeps_http_links_in_order() {
    let (service, _dir) = create_test_service().await;
    let links = vec![
        "  https://cdn.example.com/clips/one.mp4?token=abc ".to_string(),
        "ftp://example.com/nope.mp4".to_string(),
        "".to_string(),
        "http://cdn.example.com/clips/".to_string(),
    ];

    let (id, count) = service.register_links(&links).await.unwrap();
    assert_eq!(count, 2);

    let collection = service.db.get_collection(&id).await.unwrap().unwrap();
    assert_eq!(
        collection.items,
        vec![
            Item::new("https://cdn.example.com/clips/one.mp4?token=abc", "one.mp4"),
            Item::new("http://cdn.example.com/clips/", "video_4.mp4"),
        ]
    );
}

#[tokio::test]
async fn register_links_without_valid_entries_is_rejected() {
    let (service, _dir) = create_test_service().await;
    let links = vec!["not a link".to_string(), "   ".to_string()];

    let result = service.register_links(&links).await;
    assert!(matches!(result, Err(Error::Validation(_))));

    let result = service.register_links(&[]).await;
    assert!(matches!(result, Err(Error::Validation(_))));
}

#[tokio::test]
async fn register_links_enforces_item_limit() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.api.max_collection_items = 2;
    let service = BulkZip::new(config).await.unwrap();

    let links: Vec<String> = (0..3)
        .map(|i| format!("https://cdn.example.com/{}.mp4", i))
        .collect();

    let result = service.register_links(&links).await;
    assert!(matches!(result, Err(Error::Validation(ref m)) if m.contains("too many")));
    assert!(service.register_links(&links[..2]).await.is_ok());
}

#[tokio::test]
async fn build_of_unknown_collection_yields_single_error() {
    let (service, _dir) = create_test_service().await;

    let events: Vec<ProgressEvent> = service
        .build(CollectionId::from("missing1"))
        .collect()
        .await;

    assert_eq!(
        events,
        vec![ProgressEvent::Error {
            message: "collection not found".to_string()
        }]
    );
}

#[tokio::test]
async fn shutdown_stops_background_tasks() {
    let (service, _dir) = create_test_service().await;
    service.start_background_tasks().await;
    assert_eq!(service.background_tasks.lock().await.len(), 2);

    tokio::time::timeout(Duration::from_secs(5), service.shutdown())
        .await
        .unwrap()
        .unwrap();

    assert!(service.shutdown_token().is_cancelled());
    assert!(service.background_tasks.lock().await.is_empty());
}
