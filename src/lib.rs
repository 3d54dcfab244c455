//! # bulkzip
//!
//! Collects batches of remote files into size-bounded ZIP archives, reporting
//! build progress live and serving each finished archive exactly once.
//!
//! ## Pipeline
//!
//! - A **collection** is an ordered list of `{url, filename}` items registered
//!   through the API and kept in SQLite for a limited time.
//! - A **build job** fetches every item in order, streams it into the current
//!   archive part and rotates to a new part before an item would push the part
//!   past its size budget. Each step is pushed to the client as a
//!   [`ProgressEvent`].
//! - Finished parts land in the **blob store**, are deleted as soon as they
//!   have been downloaded and are swept after a maximum age either way.
//!
//! ## Quick Start
//!
//! ```no_run
//! use bulkzip::{BulkZip, Config, run_with_shutdown};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = Arc::new(BulkZip::new(Config::default()).await?);
//!
//!     service.start_background_tasks().await;
//!     let server = service.spawn_api_server();
//!
//!     run_with_shutdown(&service).await?;
//!     server.await??;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Size-bounded multi-part ZIP packing
pub mod archive;
/// Ephemeral storage for finished archive parts
pub mod blob_store;
/// Build job orchestration and progress reporting
pub mod build;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Remote fetching of item bodies
pub mod fetch;
/// Service assembly and lifecycle
pub mod service;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use archive::{ArchivePacker, PackerSettings};
pub use blob_store::BlobStore;
pub use build::{BuildOrchestrator, BuildSettings, CollectionSource, JobOutcome, ProgressStream};
pub use config::Config;
pub use db::Database;
pub use error::{
    ApiError, DatabaseError, Error, ErrorDetail, FetchError, PackError, Result, ToHttpStatus,
};
pub use fetch::{FetchedBody, HttpFetcher, RemoteFetcher};
pub use service::BulkZip;
pub use types::{
    BlobId, Collection, CollectionId, Item, PartRecord, PartSummary, Phase, ProgressEvent,
};

/// Wait for a termination signal, then shut the service down.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Shutdown cancels in-flight build jobs, stops background maintenance and
/// makes a server started with [`BulkZip::spawn_api_server`] return.
pub async fn run_with_shutdown(service: &BulkZip) -> Result<()> {
    wait_for_signal().await;
    service.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
