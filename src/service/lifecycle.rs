//! Background maintenance, API server spawning and shutdown.

use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;

use super::BulkZip;

/// How long shutdown waits for background tasks to notice cancellation
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

impl BulkZip {
    /// Start the blob evictor and the collection cleanup task
    ///
    /// Both run until [`shutdown`](Self::shutdown) is called.
    pub async fn start_background_tasks(&self) {
        let mut tasks = self.background_tasks.lock().await;

        tasks.push(self.store.spawn_evictor(
            self.config.storage.eviction_interval,
            self.shutdown_token.child_token(),
        ));
        tasks.push(self.db.spawn_collection_cleanup(
            self.config.persistence.collection_max_age,
            self.config.persistence.collection_cleanup_interval,
            self.shutdown_token.child_token(),
        ));

        tracing::info!(
            eviction_interval_secs = self.config.storage.eviction_interval.as_secs(),
            max_blob_age_secs = self.config.storage.max_blob_age.as_secs(),
            collection_max_age_secs = self.config.persistence.collection_max_age.as_secs(),
            "background maintenance started"
        );
    }

    /// Spawn the REST API server in a background task
    ///
    /// The server stops accepting connections once the service shuts down.
    pub fn spawn_api_server(self: &Arc<Self>) -> tokio::task::JoinHandle<Result<()>> {
        let service = Arc::clone(self);
        tokio::spawn(async move { crate::api::start_api_server(service).await })
    }

    /// Gracefully shut down the service
    ///
    /// Cancels in-flight build jobs (their open parts are discarded), stops
    /// the background tasks and waits briefly for them to exit.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");
        self.shutdown_token.cancel();

        let tasks: Vec<_> = self.background_tasks.lock().await.drain(..).collect();
        for task in tasks {
            match tokio::time::timeout(TASK_SHUTDOWN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "background task panicked"),
                Err(_) => tracing::warn!("timed out waiting for background task to stop"),
            }
        }

        tracing::info!("Shutdown complete");
        Ok(())
    }
}
