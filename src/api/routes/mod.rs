//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - `collections`: Collection registration and lookup
//! - `archives`: Build progress stream and archive retrieval
//! - `system`: Health, OpenAPI

use crate::types::CollectionId;
use serde::{Deserialize, Serialize};

mod archives;
mod collections;
mod system;

// Re-export all handlers so `routes::function_name` works
pub use archives::*;
pub use collections::*;
pub use system::*;

/// Request body for POST /api/collections
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct CreateCollectionRequest {
    /// Links to collect; entries not starting with `http` are skipped
    pub links: Vec<String>,
}

/// Response for POST /api/collections
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct CreateCollectionResponse {
    /// New collection id
    pub id: CollectionId,
    /// Number of links kept
    pub count: usize,
    /// Share path of the collection page
    pub url: String,
}
