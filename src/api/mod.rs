//! REST API server module
//!
//! Exposes collection registration, the live build progress stream and
//! one-shot archive retrieval over HTTP.

use crate::{BulkZip, Result};
use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Collections
/// - `POST /api/collections` - Register a list of links
/// - `GET /api/collections/:id` - Get a registered collection
///
/// ## Archives
/// - `GET /api/zip-progress/:id` - Build a collection, streaming progress events (SSE)
/// - `GET /api/zip-download/:blob_id` - Download a finished part once
///
/// ## System
/// - `GET /api/health` - Health check
/// - `GET /api/openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Interactive Swagger UI documentation (if enabled)
pub fn create_router(service: Arc<BulkZip>) -> Router {
    let state = AppState::new(service);
    let config = state.config.clone();

    let api = Router::new()
        // Collections
        .route("/collections", post(routes::create_collection))
        .route("/collections/:id", get(routes::get_collection))
        // Archives
        .route("/zip-progress/:id", get(routes::zip_progress))
        .route("/zip-download/:blob_id", get(routes::zip_download))
        // System
        .route("/health", get(routes::health_check))
        .route("/openapi.json", get(routes::openapi_spec));

    let router = Router::new().nest("/api", api);

    // Swagger UI serves its own copy of the document so it cannot clash with /api/openapi.json
    let router = if config.api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    let router = router.with_state(state).layer(TraceLayer::new_for_http());

    if config.api.cors_enabled {
        router.layer(build_cors_layer(&config.api.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// `"*"` or an empty list allows any origin.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address.
///
/// Runs until the service's shutdown token is cancelled. In-flight progress
/// streams are cancelled by the same token, so graceful shutdown does not
/// wait on them.
///
/// # Example
///
/// ```no_run
/// use bulkzip::{BulkZip, Config};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let service = Arc::new(BulkZip::new(Config::default()).await?);
///
/// // Blocks until shutdown
/// bulkzip::api::start_api_server(service).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(service: Arc<BulkZip>) -> Result<()> {
    let bind_address = service.config.api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    serve(listener, service).await
}

/// Serve the API on an already bound listener until the service shuts down
pub async fn serve(listener: TcpListener, service: Arc<BulkZip>) -> Result<()> {
    let shutdown = service.shutdown_token();
    let app = create_router(service);

    tracing::info!(
        address = %listener.local_addr().map_err(crate::error::Error::Io)?,
        "API server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
