//! Build progress and archive retrieval handlers.

use crate::api::AppState;
use crate::types::{BlobId, CollectionId};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{Method, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use std::convert::Infallible;
use tokio_stream::StreamExt;

/// GET /zip-progress/:id - Build a collection and stream its progress
///
/// Each server-sent event carries one JSON-encoded progress event in its
/// `data` field. Closing the connection cancels the build.
#[utoipa::path(
    get,
    path = "/api/zip-progress/{id}",
    tag = "archives",
    params(
        ("id" = String, Path, description = "Collection ID")
    ),
    responses(
        (status = 200, description = "Progress events (text/event-stream), one JSON ProgressEvent per event",
            content_type = "text/event-stream", body = crate::types::ProgressEvent)
    )
)]
pub async fn zip_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let events = state.service.build(CollectionId::from(id));

    let sse_stream = events.filter_map(|event| match serde_json::to_string(&event) {
        Ok(json_data) => Some(Ok(SseEvent::default().data(json_data))),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize progress event to JSON");
            None
        }
    });

    Sse::new(sse_stream).keep_alive(KeepAlive::default())
}

/// GET /zip-download/:blob_id - Download a finished archive part
///
/// The part is deleted once the response body has been sent or abandoned,
/// so each part can be downloaded once. A HEAD request only reports the
/// headers and leaves the part in place.
#[utoipa::path(
    get,
    path = "/api/zip-download/{blob_id}",
    tag = "archives",
    params(
        ("blob_id" = String, Path, description = "Archive part ID, matching ^[A-Za-z0-9_]+$")
    ),
    responses(
        (status = 200, description = "ZIP archive bytes", content_type = "application/zip"),
        (status = 400, description = "Malformed archive ID", body = crate::error::ApiError),
        (status = 404, description = "Archive not found, expired or already downloaded", body = crate::error::ApiError)
    )
)]
pub async fn zip_download(
    State(state): State<AppState>,
    method: Method,
    Path(raw_id): Path<String>,
) -> Response {
    let blob_id = match BlobId::parse(&raw_id) {
        Ok(id) => id,
        Err(e) => return e.into_response(),
    };

    let blob = match state.service.store.resolve(&blob_id).await {
        Ok(blob) => blob,
        Err(e) => return e.into_response(),
    };

    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_string()),
        (header::CONTENT_LENGTH, blob.len().to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.zip\"", blob_id),
        ),
        (header::CACHE_CONTROL, "no-store".to_string()),
    ];

    if method == Method::HEAD {
        return (StatusCode::OK, headers, Body::empty()).into_response();
    }

    tracing::info!(blob_id = %blob_id, size_bytes = blob.len(), "serving archive");
    let body = Body::from_stream(blob.into_consuming_stream());
    (StatusCode::OK, headers, body).into_response()
}
