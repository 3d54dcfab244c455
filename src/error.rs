//! Error types for bulkzip
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (fetch, pack, database)
//! - HTTP status code mapping for API integration
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for bulkzip operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bulkzip
///
/// Item-level problems travel as [`FetchError`] and are downgraded to warnings by
/// the build orchestrator. Storage problems travel as [`PackError`] and end the job.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "part_budget_bytes")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Collection id is unknown, expired, or has no items
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// A single remote item could not be fetched
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Writing or finalizing an archive part failed
    #[error("archive error: {0}")]
    Pack(#[from] PackError),

    /// Blob id is well formed but no blob exists for it
    #[error("archive not found or expired: {0}")]
    BlobNotFound(String),

    /// Blob id does not match `^[A-Za-z0-9_]+$`
    #[error("invalid archive id: {0}")]
    InvalidBlobId(String),

    /// Request payload failed validation
    #[error("validation error: {0}")]
    Validation(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Stored row could not be decoded
    #[error("corrupt record {id}: {reason}")]
    CorruptRecord {
        /// Primary key of the offending row
        id: String,
        /// What failed to decode
        reason: String,
    },
}

/// Failure to fetch one remote item
///
/// Recoverable at the job level: the orchestrator reports it as a `warning`
/// event and moves on to the next item.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Remote answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL
        url: String,
        /// HTTP status code received
        status: u16,
    },

    /// Connection, TLS, or body transfer failure
    #[error("request to {url} failed: {reason}")]
    Transport {
        /// Requested URL
        url: String,
        /// Underlying cause
        reason: String,
    },

    /// Request exceeded the configured timeout
    #[error("request to {url} timed out")]
    Timeout {
        /// Requested URL
        url: String,
    },

    /// URL could not be parsed or uses an unsupported scheme
    #[error("invalid url {url}: {reason}")]
    InvalidUrl {
        /// Offending URL
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// Body produced more bytes than its announced length
    #[error("{url} sent more than its declared {declared} bytes")]
    TooLong {
        /// Requested URL
        url: String,
        /// Announced length
        declared: u64,
    },

    /// Local spooling of a body failed
    #[error("failed to spool {url}: {reason}")]
    Spool {
        /// Requested URL
        url: String,
        /// Underlying cause
        reason: String,
    },
}

impl FetchError {
    /// URL of the item that failed
    pub fn url(&self) -> &str {
        match self {
            FetchError::Status { url, .. }
            | FetchError::Transport { url, .. }
            | FetchError::Timeout { url }
            | FetchError::InvalidUrl { url, .. }
            | FetchError::TooLong { url, .. }
            | FetchError::Spool { url, .. } => url,
        }
    }

    /// Classify a reqwest error for the given URL
    pub(crate) fn from_reqwest(url: &str, error: reqwest::Error) -> Self {
        if error.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = error.status() {
            FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            FetchError::Transport {
                url: url.to_string(),
                reason: error.to_string(),
            }
        }
    }
}

/// Failure while writing or finalizing an archive part
///
/// Always fatal to the build job: it means the local storage path is unusable.
#[derive(Debug, Error)]
pub enum PackError {
    /// Creating the staging file for a new part failed
    #[error("failed to create part {part_number} at {path}: {reason}")]
    CreateFailed {
        /// Part being opened
        part_number: u32,
        /// Staging path
        path: PathBuf,
        /// Underlying cause
        reason: String,
    },

    /// Writing entry data into the container failed
    #[error("failed to write entry {entry} into part {part_number}: {reason}")]
    WriteFailed {
        /// Part being written
        part_number: u32,
        /// Entry name inside the archive
        entry: String,
        /// Underlying cause
        reason: String,
    },

    /// Closing the container or publishing the blob failed
    #[error("failed to finalize part {part_number}: {reason}")]
    FinalizeFailed {
        /// Part being finalized
        part_number: u32,
        /// Underlying cause
        reason: String,
    },

    /// The blocking writer task went away unexpectedly
    #[error("archive writer for part {part_number} stopped unexpectedly")]
    WriterGone {
        /// Part the writer was serving
        part_number: u32,
    },

    /// Staging an entry body on local disk failed
    #[error("failed to stage {entry} on disk: {reason}")]
    SpoolFailed {
        /// Entry or URL being staged
        entry: String,
        /// Underlying cause
        reason: String,
    },
}

/// API error response format
///
/// This structure is returned by API endpoints when an error occurs.
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "blob_not_found",
///     "message": "archive not found or expired: abc_part1_0011aabb",
///     "details": { "blob_id": "abc_part1_0011aabb" }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "validation_error")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an API error with additional details
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    /// Create a "not found" error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new("not_found", format!("{} not found", resource.into()))
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }

    /// Create an "internal server error"
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - Client error (invalid input)
            Error::Config { .. } => 400,
            Error::InvalidBlobId(_) => 400,
            Error::Validation(_) => 400,

            // 404 Not Found
            Error::CollectionNotFound(_) => 404,
            Error::BlobNotFound(_) => 404,

            // 502 Bad Gateway - Remote origin failed
            Error::Fetch(FetchError::Timeout { .. }) => 504,
            Error::Fetch(FetchError::InvalidUrl { .. }) => 400,
            Error::Fetch(_) => 502,

            // 500 Internal Server Error - Server-side issues
            Error::Pack(_) => 500,
            Error::Database(_) => 500,
            Error::Sqlx(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::CollectionNotFound(_) => "collection_not_found",
            Error::Fetch(e) => match e {
                FetchError::Status { .. } => "fetch_status",
                FetchError::Transport { .. } => "fetch_failed",
                FetchError::Timeout { .. } => "fetch_timeout",
                FetchError::InvalidUrl { .. } => "invalid_url",
                FetchError::TooLong { .. } => "fetch_too_long",
                FetchError::Spool { .. } => "spool_failed",
            },
            Error::Pack(_) => "pack_write_failed",
            Error::BlobNotFound(_) => "blob_not_found",
            Error::InvalidBlobId(_) => "invalid_blob_id",
            Error::Validation(_) => "validation_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::CollectionNotFound(id) => Some(serde_json::json!({
                "collection_id": id,
            })),
            Error::BlobNotFound(id) | Error::InvalidBlobId(id) => Some(serde_json::json!({
                "blob_id": id,
            })),
            Error::Fetch(FetchError::Status { url, status }) => Some(serde_json::json!({
                "url": url,
                "status": status,
            })),
            Error::Fetch(e) => Some(serde_json::json!({
                "url": e.url(),
            })),
            Error::Pack(
                PackError::CreateFailed { part_number, .. }
                | PackError::WriteFailed { part_number, .. }
                | PackError::FinalizeFailed { part_number, .. }
                | PackError::WriterGone { part_number },
            ) => Some(serde_json::json!({
                "part_number": part_number,
            })),
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({
                "key": key,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
