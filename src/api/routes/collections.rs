//! Collection handlers.

use super::{CreateCollectionRequest, CreateCollectionResponse};
use crate::api::AppState;
use crate::error::Error;
use crate::types::CollectionId;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// POST /collections - Register links as a new collection
#[utoipa::path(
    post,
    path = "/api/collections",
    tag = "collections",
    request_body = CreateCollectionRequest,
    responses(
        (status = 201, description = "Collection created", body = CreateCollectionResponse),
        (status = 400, description = "No valid links, or too many", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn create_collection(
    State(state): State<AppState>,
    Json(request): Json<CreateCollectionRequest>,
) -> Response {
    match state.service.register_links(&request.links).await {
        Ok((id, count)) => {
            let response = CreateCollectionResponse {
                url: format!("/d/{}", id),
                id,
                count,
            };
            (StatusCode::CREATED, Json(response)).into_response()
        }
        Err(e) => {
            if !matches!(e, Error::Validation(_)) {
                tracing::error!(error = %e, "Failed to register collection");
            }
            e.into_response()
        }
    }
}

/// GET /collections/:id - Get a registered collection
#[utoipa::path(
    get,
    path = "/api/collections/{id}",
    tag = "collections",
    params(
        ("id" = String, Path, description = "Collection ID")
    ),
    responses(
        (status = 200, description = "Collection with its items", body = crate::types::Collection),
        (status = 404, description = "Collection not found or expired", body = crate::error::ApiError),
        (status = 500, description = "Internal server error", body = crate::error::ApiError)
    )
)]
pub async fn get_collection(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.service.db.get_collection(&CollectionId::from(id.as_str())).await {
        Ok(Some(collection)) => (StatusCode::OK, Json(collection)).into_response(),
        Ok(None) => Error::CollectionNotFound(id).into_response(),
        Err(e) => {
            tracing::error!(collection_id = %id, error = %e, "Failed to load collection");
            e.into_response()
        }
    }
}
