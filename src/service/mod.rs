//! Service assembly
//!
//! [`BulkZip`] wires the collection registry, the blob store, the remote
//! fetcher and the build orchestrator together and owns the cancellation
//! token that stops background maintenance and in-flight build jobs.
//!
//! ## Submodules
//!
//! - `lifecycle`: background tasks, API server spawning and shutdown

use crate::blob_store::BlobStore;
use crate::build::{BuildOrchestrator, BuildSettings, ProgressStream};
use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::fetch::{HttpFetcher, RemoteFetcher};
use crate::types::{CollectionId, Item};
use crate::utils::filename_from_url;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

mod lifecycle;

/// A running bulkzip service
pub struct BulkZip {
    /// Configuration the service was built from
    pub config: Arc<Config>,
    /// Collection registry
    pub db: Arc<Database>,
    /// Storage for finalized archive parts
    pub store: Arc<BlobStore>,
    orchestrator: Arc<BuildOrchestrator>,
    shutdown_token: CancellationToken,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BulkZip {
    /// Create a service that fetches over HTTP
    ///
    /// Validates the configuration, creates the blob directory and opens
    /// (or creates) the collection database.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let fetcher = Arc::new(HttpFetcher::new(&config.fetch)?);
        Self::with_fetcher(config, fetcher).await
    }

    /// Create a service with a custom fetcher
    pub async fn with_fetcher(config: Config, fetcher: Arc<dyn RemoteFetcher>) -> Result<Self> {
        let store = Arc::new(
            BlobStore::open(
                config.storage.blob_dir.clone(),
                config.storage.max_blob_age,
            )
            .await?,
        );
        let db = Arc::new(Database::new(&config.persistence.database_path).await?);

        let orchestrator = Arc::new(BuildOrchestrator::new(
            db.clone(),
            fetcher,
            store.clone(),
            BuildSettings::from(&config.archive),
        ));

        tracing::info!(
            blob_dir = %config.storage.blob_dir.display(),
            database = %config.persistence.database_path.display(),
            part_budget_bytes = config.archive.part_budget_bytes,
            fetch_concurrency = config.archive.fetch_concurrency,
            "bulkzip initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            store,
            orchestrator,
            shutdown_token: CancellationToken::new(),
            background_tasks: Mutex::new(Vec::new()),
        })
    }

    /// Register submitted links as a new collection
    ///
    /// Keeps entries that start with `http` after trimming. Filenames come
    /// from the URL path, numbered by the link's position in `links` when the
    /// path has no last segment. Returns the new id and the number of items kept.
    pub async fn register_links(&self, links: &[String]) -> Result<(CollectionId, usize)> {
        let items: Vec<Item> = links
            .iter()
            .enumerate()
            .filter_map(|(index, link)| {
                let url = link.trim();
                url.starts_with("http")
                    .then(|| Item::new(url, filename_from_url(url, index + 1)))
            })
            .collect();

        if items.is_empty() {
            return Err(Error::Validation("no valid links submitted".to_string()));
        }

        let limit = self.config.api.max_collection_items;
        if items.len() > limit {
            return Err(Error::Validation(format!(
                "too many links: {} (maximum {})",
                items.len(),
                limit
            )));
        }

        let id = self.db.create_collection(&items).await?;
        tracing::info!(collection_id = %id, items = items.len(), "collection registered");
        Ok((id, items.len()))
    }

    /// Start a build job for a collection
    ///
    /// Dropping the returned stream cancels the job.
    pub fn build(&self, collection_id: CollectionId) -> ProgressStream {
        self.orchestrator.spawn(collection_id, &self.shutdown_token)
    }

    /// Token cancelled when the service shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
