//! Build orchestration
//!
//! A build job turns one collection into one or more archive parts while
//! reporting every state change as a [`ProgressEvent`]:
//!
//! ```text
//! start → (downloading → added | warning)* → saving_part* → finalizing → complete | complete_multipart
//! ```
//!
//! An unknown or empty collection yields a single `error` event instead.
//! Item fetch failures become `warning` events and the job moves on; any
//! failure to write an archive part ends the stream without a terminal event.
//!
//! Items are packed strictly in collection order. With `fetch_concurrency > 1`
//! up to that many items are downloaded ahead into spool files while the
//! single packer appends them in order, so event order and part contents are
//! the same as with sequential fetching.

use crate::archive::{AppendError, ArchivePacker, PackerSettings};
use crate::blob_store::BlobStore;
use crate::config::ArchiveConfig;
use crate::error::{FetchError, PackError, Result};
use crate::fetch::{FetchedBody, RemoteFetcher, spool};
use crate::types::{CollectionId, Item, PartRecord, PartSummary, Phase, ProgressEvent};
use crate::utils::{entry_name, format_size};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, info, warn};

/// Route prefix under which finalized parts are served
pub const DOWNLOAD_ROUTE: &str = "/api/zip-download";

/// Events buffered between a job and its client
const EVENT_BUFFER: usize = 64;

/// Read access to registered collections
#[async_trait]
pub trait CollectionSource: Send + Sync {
    /// Items of the collection in order, or `None` if it is unknown
    async fn get_items(&self, id: &CollectionId) -> Result<Option<Vec<Item>>>;
}

/// Settings shared by every build job
#[derive(Clone, Debug)]
pub struct BuildSettings {
    /// Part budget and compression
    pub packer: PackerSettings,
    /// Items fetched ahead of the packer
    pub fetch_concurrency: usize,
    /// Prefix of the single-part download filename
    pub archive_name_prefix: String,
}

impl From<&ArchiveConfig> for BuildSettings {
    fn from(config: &ArchiveConfig) -> Self {
        Self {
            packer: PackerSettings::from(config),
            fetch_concurrency: config.fetch_concurrency.max(1),
            archive_name_prefix: config.archive_name_prefix.clone(),
        }
    }
}

/// How a job ended
#[derive(Debug)]
pub enum JobOutcome {
    /// Terminal success event sent
    Completed {
        /// Finalized parts in order
        parts: Vec<PartRecord>,
    },
    /// Collection unknown or empty; `error` event sent
    Rejected,
    /// Archive storage failed; stream ended without a terminal event
    Aborted(PackError),
    /// Client stopped listening
    Disconnected,
    /// Shutdown requested
    Cancelled,
}

/// The event receiver went away
struct Disconnected;

enum JobError {
    Disconnected,
    Pack(PackError),
}

impl From<Disconnected> for JobError {
    fn from(_: Disconnected) -> Self {
        JobError::Disconnected
    }
}

impl From<PackError> for JobError {
    fn from(e: PackError) -> Self {
        JobError::Pack(e)
    }
}

/// Runs build jobs against injected collaborators
pub struct BuildOrchestrator {
    source: Arc<dyn CollectionSource>,
    fetcher: Arc<dyn RemoteFetcher>,
    store: Arc<BlobStore>,
    settings: BuildSettings,
}

impl BuildOrchestrator {
    /// Create an orchestrator
    pub fn new(
        source: Arc<dyn CollectionSource>,
        fetcher: Arc<dyn RemoteFetcher>,
        store: Arc<BlobStore>,
        settings: BuildSettings,
    ) -> Self {
        Self {
            source,
            fetcher,
            store,
            settings,
        }
    }

    /// Start a job in the background and return its event stream
    ///
    /// The job is tied to the stream: dropping the stream cancels the job and
    /// releases its fetches and open parts. `shutdown` cancels it as well.
    pub fn spawn(
        self: &Arc<Self>,
        collection_id: CollectionId,
        shutdown: &CancellationToken,
    ) -> ProgressStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let job_token = shutdown.child_token();
        let guard = job_token.clone().drop_guard();
        let orchestrator = Arc::clone(self);

        tokio::spawn(async move {
            let outcome = orchestrator.run(collection_id.clone(), tx, job_token).await;
            debug!(collection_id = %collection_id, ?outcome, "build job finished");
        });

        ProgressStream {
            inner: ReceiverStream::new(rx),
            _guard: guard,
        }
    }

    /// Run one job to completion, sending events to `events`
    ///
    /// Stops early when `cancel` fires or the receiver is dropped. Open parts
    /// are discarded in that case and never become retrievable.
    pub async fn run(
        &self,
        collection_id: CollectionId,
        events: mpsc::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> JobOutcome {
        let closed = events.clone();

        tokio::select! {
            outcome = self.drive(&collection_id, &events) => outcome,
            _ = cancel.cancelled() => {
                info!(collection_id = %collection_id, "build job cancelled");
                JobOutcome::Cancelled
            }
            _ = closed.closed() => {
                info!(collection_id = %collection_id, "client disconnected, stopping build job");
                JobOutcome::Disconnected
            }
        }
    }

    async fn drive(
        &self,
        collection_id: &CollectionId,
        events: &mpsc::Sender<ProgressEvent>,
    ) -> JobOutcome {
        let items = match self.source.get_items(collection_id).await {
            Ok(Some(items)) if !items.is_empty() => items,
            Ok(_) => {
                warn!(collection_id = %collection_id, "collection not found or empty");
                let _ = emit(
                    events,
                    ProgressEvent::Error {
                        message: "collection not found".to_string(),
                    },
                )
                .await;
                return JobOutcome::Rejected;
            }
            Err(e) => {
                error!(collection_id = %collection_id, error = %e, "failed to load collection");
                let _ = emit(
                    events,
                    ProgressEvent::Error {
                        message: "failed to load collection".to_string(),
                    },
                )
                .await;
                return JobOutcome::Rejected;
            }
        };

        let mut job = BuildJob {
            collection_id,
            total: items.len(),
            packer: ArchivePacker::new(
                Arc::clone(&self.store),
                self.settings.packer.clone(),
                collection_id.as_str(),
            ),
            events,
        };

        info!(
            collection_id = %collection_id,
            items = job.total,
            fetch_concurrency = self.settings.fetch_concurrency,
            "build job started"
        );

        match self.build(&mut job, items).await {
            Ok(()) => {}
            Err(JobError::Disconnected) => return JobOutcome::Disconnected,
            Err(JobError::Pack(e)) => {
                error!(
                    collection_id = %collection_id,
                    error = %e,
                    "archive write failed, aborting build job"
                );
                return JobOutcome::Aborted(e);
            }
        }

        match self.finish(job).await {
            Ok(parts) => JobOutcome::Completed { parts },
            Err(JobError::Disconnected) => JobOutcome::Disconnected,
            Err(JobError::Pack(e)) => {
                error!(collection_id = %collection_id, error = %e, "archive finalization failed");
                JobOutcome::Aborted(e)
            }
        }
    }

    async fn build(
        &self,
        job: &mut BuildJob<'_>,
        items: Vec<Item>,
    ) -> std::result::Result<(), JobError> {
        job.emit(ProgressEvent::Start { total: job.total }).await?;

        let concurrency = self.settings.fetch_concurrency;
        if concurrency <= 1 {
            for (index, item) in items.into_iter().enumerate() {
                let current = index + 1;
                job.downloading(current, &item).await?;
                let fetched =
                    fetch_sized(self.fetcher.as_ref(), self.store.dir(), &item.url, false).await;
                job.pack(current, &item, fetched).await?;
            }
            return Ok(());
        }

        // Each read-ahead fetch runs on its own task so downloads keep going
        // while the packer compresses; dropping the stream aborts them.
        let fetcher = Arc::clone(&self.fetcher);
        let spool_dir = self.store.dir().to_path_buf();
        let mut fetches = futures::stream::iter(items.into_iter().enumerate())
            .map(move |(index, item)| {
                let fetcher = Arc::clone(&fetcher);
                let spool_dir = spool_dir.clone();
                let url = item.url.clone();
                let task = AbortOnDropHandle::new(tokio::spawn(async move {
                    fetch_sized(fetcher.as_ref(), &spool_dir, &url, true).await
                }));
                async move {
                    let fetched = match task.await {
                        Ok(fetched) => fetched,
                        Err(e) => Err(FetchError::Transport {
                            url: item.url.clone(),
                            reason: e.to_string(),
                        }),
                    };
                    (index, item, fetched)
                }
            })
            .buffered(concurrency);

        while let Some((index, item, fetched)) = fetches.next().await {
            let current = index + 1;
            job.downloading(current, &item).await?;
            job.pack(current, &item, fetched).await?;
        }

        Ok(())
    }

    async fn finish(&self, job: BuildJob<'_>) -> std::result::Result<Vec<PartRecord>, JobError> {
        let BuildJob {
            collection_id,
            total,
            packer,
            events,
        } = job;

        emit(
            events,
            ProgressEvent::Progress {
                current: total,
                total,
                filename: None,
                phase: Phase::Finalizing,
                part_number: None,
            },
        )
        .await?;

        let parts = packer.finalize().await?;

        let terminal = match parts.as_slice() {
            [only] => ProgressEvent::Complete {
                download_url: download_url(only),
                filename: format!("{}_{}.zip", self.settings.archive_name_prefix, collection_id),
            },
            many => ProgressEvent::CompleteMultipart {
                parts: many
                    .iter()
                    .map(|part| PartSummary {
                        part_number: part.part_number,
                        url: download_url(part),
                        size: part.size_bytes,
                        size_formatted: format_size(part.size_bytes),
                    })
                    .collect(),
                total_parts: many.len(),
            },
        };

        info!(
            collection_id = %collection_id,
            parts = parts.len(),
            total_bytes = parts.iter().map(|p| p.size_bytes).sum::<u64>(),
            "build job complete"
        );

        emit(events, terminal).await?;
        Ok(parts)
    }
}

/// Per-job state
struct BuildJob<'a> {
    collection_id: &'a CollectionId,
    total: usize,
    packer: ArchivePacker,
    events: &'a mpsc::Sender<ProgressEvent>,
}

impl BuildJob<'_> {
    async fn emit(&self, event: ProgressEvent) -> std::result::Result<(), Disconnected> {
        emit(self.events, event).await
    }

    async fn downloading(
        &self,
        current: usize,
        item: &Item,
    ) -> std::result::Result<(), Disconnected> {
        self.emit(ProgressEvent::Progress {
            current,
            total: self.total,
            filename: Some(item.filename.clone()),
            phase: Phase::Downloading,
            part_number: None,
        })
        .await
    }

    async fn warning(
        &self,
        current: usize,
        item: &Item,
        reason: &str,
    ) -> std::result::Result<(), Disconnected> {
        warn!(
            collection_id = %self.collection_id,
            current,
            url = %item.url,
            error = reason,
            "item skipped"
        );
        self.emit(ProgressEvent::Warning {
            message: format!("{} could not be downloaded", item.filename),
            current,
            total: self.total,
        })
        .await
    }

    /// Append a fetched item, rotating first when it would overflow the part
    async fn pack(
        &mut self,
        current: usize,
        item: &Item,
        fetched: std::result::Result<(u64, FetchedBody), FetchError>,
    ) -> std::result::Result<(), JobError> {
        let (size, body) = match fetched {
            Ok(sized) => sized,
            Err(FetchError::Spool { url, reason }) => {
                return Err(JobError::Pack(PackError::SpoolFailed { entry: url, reason }));
            }
            Err(e) => {
                self.warning(current, item, &e.to_string()).await?;
                return Ok(());
            }
        };

        if let Some(part_number) = self.packer.would_rotate(size) {
            self.emit(ProgressEvent::Progress {
                current,
                total: self.total,
                filename: None,
                phase: Phase::SavingPart,
                part_number: Some(part_number),
            })
            .await?;
            self.packer.rotate_if_needed(size).await?;
        }

        let name = entry_name(current, &item.filename);
        match self.packer.append(&name, size, body).await {
            Ok(_) => {
                self.emit(ProgressEvent::Progress {
                    current,
                    total: self.total,
                    filename: Some(item.filename.clone()),
                    phase: Phase::Added,
                    part_number: None,
                })
                .await?;
            }
            Err(AppendError::Pack(e)) => return Err(JobError::Pack(e)),
            Err(item_error) => self.warning(current, item, &item_error.to_string()).await?,
        }

        Ok(())
    }
}

async fn emit(
    events: &mpsc::Sender<ProgressEvent>,
    event: ProgressEvent,
) -> std::result::Result<(), Disconnected> {
    events.send(event).await.map_err(|_| Disconnected)
}

fn download_url(part: &PartRecord) -> String {
    format!("{}/{}", DOWNLOAD_ROUTE, part.blob_id)
}

/// Open a body and learn its size, spooling to `spool_dir` when needed
///
/// With `always_spool` the whole body is downloaded before returning, so the
/// connection is not held open while the item waits for the packer.
async fn fetch_sized(
    fetcher: &dyn RemoteFetcher,
    spool_dir: &Path,
    url: &str,
    always_spool: bool,
) -> std::result::Result<(u64, FetchedBody), FetchError> {
    let body = fetcher.fetch(url).await?;

    let body = match body.content_length {
        Some(_) if !always_spool => body,
        declared => spool(url, body, spool_dir, declared).await?,
    };

    Ok((body.content_length.unwrap_or_default(), body))
}

/// Event stream of one running job
///
/// Dropping it cancels the job.
pub struct ProgressStream {
    inner: ReceiverStream<ProgressEvent>,
    _guard: DropGuard,
}

impl Stream for ProgressStream {
    type Item = ProgressEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}
