//! OpenAPI documentation and schema generation
//!
//! Defines the OpenAPI specification for the bulkzip REST API using utoipa
//! for compile-time spec generation.

use utoipa::OpenApi;

/// OpenAPI documentation for the bulkzip REST API
///
/// The spec can be accessed via:
/// - `/api/openapi.json` - JSON format OpenAPI specification
/// - `/swagger-ui` - Interactive Swagger UI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "bulkzip REST API",
        version = "0.1.0",
        description = "Collect remote files into size-bounded ZIP archives with live build progress",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:3000", description = "Local development server")
    ),
    paths(
        // Collections
        crate::api::routes::create_collection,
        crate::api::routes::get_collection,

        // Archives
        crate::api::routes::zip_progress,
        crate::api::routes::zip_download,

        // System
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
    ),
    components(schemas(
        crate::types::Item,
        crate::types::CollectionId,
        crate::types::Collection,
        crate::types::Phase,
        crate::types::PartSummary,
        crate::types::ProgressEvent,

        crate::api::routes::CreateCollectionRequest,
        crate::api::routes::CreateCollectionResponse,

        crate::error::ApiError,
        crate::error::ErrorDetail,
    )),
    tags(
        (name = "collections", description = "Collections - Register link lists and look them up"),
        (name = "archives", description = "Archives - Build progress stream and one-time archive download"),
        (name = "system", description = "System endpoints - Health checks, OpenAPI spec"),
    )
)]
pub struct ApiDoc;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_lists_every_route() {
        let spec = ApiDoc::openapi();
        let paths: Vec<&str> = spec.paths.paths.keys().map(String::as_str).collect();

        for expected in [
            "/api/collections",
            "/api/collections/{id}",
            "/api/zip-progress/{id}",
            "/api/zip-download/{blob_id}",
            "/api/health",
            "/api/openapi.json",
        ] {
            assert!(paths.contains(&expected), "missing path {expected}");
        }
    }

    #[test]
    fn test_openapi_spec_has_schemas_and_tags() {
        let spec = ApiDoc::openapi();

        let components = spec.components.expect("components should be defined");
        assert!(components.schemas.contains_key("ProgressEvent"));
        assert!(components.schemas.contains_key("ApiError"));

        let tags = spec.tags.expect("tags should be defined");
        let tag_names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tag_names, vec!["collections", "archives", "system"]);
    }

    #[test]
    fn test_openapi_spec_info() {
        let spec = ApiDoc::openapi();

        assert_eq!(spec.info.title, "bulkzip REST API");
        assert!(spec.info.description.is_some());
    }

    #[test]
    fn test_openapi_json_serialization() {
        let spec = ApiDoc::openapi();

        let json = serde_json::to_value(&spec).expect("Should serialize to JSON");
        let version = json.get("openapi").and_then(|v| v.as_str());
        assert!(
            version.is_some_and(|v| v.starts_with("3.")),
            "Should use OpenAPI 3.x version"
        );
    }
}
