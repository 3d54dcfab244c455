use super::*;
use crate::api::routes::CreateCollectionResponse;
use serde_json::json;

fn post_links(links: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/collections")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "links": links }).to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_create_collection_returns_created() {
    let (service, _dir) = create_test_service().await;
    let app = create_router(service.clone());

    let response = app
        .oneshot(post_links(json!([
            "https://cdn.example.com/a.mp4",
            "not a link",
            " https://cdn.example.com/b.mov?x=1 "
        ])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);

    let body: CreateCollectionResponse =
        serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body.count, 2);
    assert_eq!(body.url, format!("/d/{}", body.id));

    let stored = service.db.get_collection(&body.id).await.unwrap().unwrap();
    let filenames: Vec<&str> = stored.items.iter().map(|i| i.filename.as_str()).collect();
    assert_eq!(filenames, vec!["a.mp4", "b.mov"]);
}

#[tokio::test]
async fn test_create_collection_without_valid_links_is_400() {
    let (service, _dir) = create_test_service().await;
    let app = create_router(service);

    let response = app
        .oneshot(post_links(json!(["ftp://nope", ""])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "validation_error");
}

#[tokio::test]
async fn test_create_collection_over_limit_is_400() {
    let (service, _dir) = create_test_service_with(|c| c.api.max_collection_items = 1).await;
    let app = create_router(service);

    let response = app
        .oneshot(post_links(json!([
            "https://cdn.example.com/a.mp4",
            "https://cdn.example.com/b.mp4"
        ])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"]["message"].as_str().unwrap().contains("too many"));
}

#[tokio::test]
async fn test_create_collection_rejects_malformed_body() {
    let (service, _dir) = create_test_service().await;
    let app = create_router(service);

    let request = Request::builder()
        .method("POST")
        .uri("/api/collections")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"links": "https://cdn.example.com/a.mp4"}"#))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_get_collection_returns_items() {
    let (service, _dir) = create_test_service().await;
    let (id, _) = service
        .register_links(&["https://cdn.example.com/clip.mp4".to_string()])
        .await
        .unwrap();
    let app = create_router(service);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/collections/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["id"], id.as_str());
    assert_eq!(json["items"][0]["url"], "https://cdn.example.com/clip.mp4");
    assert_eq!(json["items"][0]["filename"], "clip.mp4");
    assert!(json["createdAt"].is_string());
}

#[tokio::test]
async fn test_get_unknown_collection_is_404() {
    let (service, _dir) = create_test_service().await;
    let app = create_router(service);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/collections/missing1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "collection_not_found");
    assert_eq!(json["error"]["details"]["collection_id"], "missing1");
}
