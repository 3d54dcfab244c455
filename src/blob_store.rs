//! Ephemeral blob storage for finalized archive parts
//!
//! Blobs are plain files in one directory. A part is written to
//! `<id>.zip.partial` through a [`StagedBlob`] and becomes visible as
//! `<id>.zip` only when [`StagedBlob::commit`] renames it, so a reader can
//! never resolve a container that is still being written.
//!
//! Two paths delete blobs: a retrieval deletes its blob once the bytes have
//! been streamed ([`BlobReader`]), and the periodic evictor removes anything
//! older than the configured max age. Both go through the same
//! delete-if-exists primitive, so whichever runs second is a no-op.

use crate::error::{Error, Result};
use crate::types::BlobId;
use crate::utils::sanitize_hint;
use bytes::Bytes;
use futures::Stream;
use rand::Rng;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const BLOB_EXTENSION: &str = "zip";
const STAGING_SUFFIX: &str = ".zip.partial";

/// Attempts at finding an unused id before giving up
const MAX_ID_ATTEMPTS: usize = 8;

/// Directory-backed store of time-limited archive parts
///
/// Cheap to share behind an `Arc`; all state lives on the filesystem.
#[derive(Debug)]
pub struct BlobStore {
    dir: PathBuf,
    max_age: Duration,
}

impl BlobStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub async fn open(dir: impl Into<PathBuf>, max_age: Duration) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), ?max_age, "blob store opened");
        Ok(Self { dir, max_age })
    }

    /// Directory holding the blobs
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Age after which blobs are evicted
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Start a new blob whose id embeds `hint`
    ///
    /// The returned sink writes to a staging file that cannot be resolved.
    /// Dropping it without calling [`StagedBlob::commit`] removes the file.
    /// This is blocking filesystem work; async callers should run it on a
    /// blocking thread.
    pub fn create(&self, hint: &str) -> io::Result<StagedBlob> {
        let hint = sanitize_hint(hint);

        for _ in 0..MAX_ID_ATTEMPTS {
            let id = BlobId::from_generated(format!("{}_{}", hint, random_suffix()));
            let final_path = self.blob_path(&id);
            let staging_path = self.staging_path(&id);

            if final_path.exists() {
                continue;
            }

            match OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&staging_path)
            {
                Ok(file) => {
                    return Ok(StagedBlob {
                        id,
                        file,
                        staging_path,
                        final_path,
                        committed: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "could not allocate an unused blob id",
        ))
    }

    /// Open a committed blob for reading
    pub async fn resolve(&self, id: &BlobId) -> Result<OpenBlob> {
        let path = self.blob_path(id);
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::BlobNotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();

        Ok(OpenBlob {
            id: id.clone(),
            path,
            file,
            len,
        })
    }

    /// Delete a blob if it exists
    ///
    /// Returns whether this call removed it. Deleting a missing or already
    /// deleted id is not an error.
    pub async fn delete(&self, id: &BlobId) -> Result<bool> {
        match tokio::fs::remove_file(self.blob_path(id)).await {
            Ok(()) => {
                debug!(blob_id = %id, "blob deleted");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every blob and staging file older than the max age
    ///
    /// Staging files of parts that are still being written are kept fresh by
    /// the writes themselves, so only abandoned ones age out.
    pub async fn evict_expired(&self) -> Result<usize> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let now = SystemTime::now();
        let mut removed = 0;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let is_blob = path.extension().is_some_and(|ext| ext == BLOB_EXTENSION);
            if !is_blob && !name.ends_with(STAGING_SUFFIX) {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();

            if age > self.max_age {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        debug!(file = name, age_secs = age.as_secs(), "evicted expired blob");
                        removed += 1;
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => warn!(file = name, error = %e, "failed to evict blob"),
                }
            }
        }

        Ok(removed)
    }

    /// Run [`evict_expired`](Self::evict_expired) every `interval` until `cancel_token` fires
    pub fn spawn_evictor(
        self: &Arc<Self>,
        interval: Duration,
        cancel_token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match store.evict_expired().await {
                            Ok(0) => {}
                            Ok(count) => info!(count, "evicted expired blobs"),
                            Err(e) => warn!(error = %e, "blob eviction sweep failed"),
                        }
                    }
                    _ = cancel_token.cancelled() => {
                        debug!("blob evictor stopped");
                        return;
                    }
                }
            }
        })
    }

    fn blob_path(&self, id: &BlobId) -> PathBuf {
        self.dir.join(format!("{}.{}", id, BLOB_EXTENSION))
    }

    fn staging_path(&self, id: &BlobId) -> PathBuf {
        self.dir.join(format!("{}{}", id, STAGING_SUFFIX))
    }
}

fn random_suffix() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// A blob being written
///
/// Implements `Write + Seek` so a ZIP writer can own it directly.
#[derive(Debug)]
pub struct StagedBlob {
    id: BlobId,
    file: File,
    staging_path: PathBuf,
    final_path: PathBuf,
    committed: bool,
}

impl StagedBlob {
    /// Id the blob will be published under
    pub fn id(&self) -> &BlobId {
        &self.id
    }

    /// Publish the blob
    ///
    /// Truncates the file at the current position, flushes it to disk and
    /// renames it into place. Returns the id and the final size in bytes.
    pub fn commit(mut self) -> io::Result<(BlobId, u64)> {
        let len = self.file.stream_position()?;
        self.file.set_len(len)?;
        self.file.sync_all()?;
        std::fs::rename(&self.staging_path, &self.final_path)?;
        self.committed = true;
        Ok((self.id.clone(), len))
    }
}

impl Write for StagedBlob {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for StagedBlob {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Drop for StagedBlob {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = remove_if_exists(&self.staging_path) {
                warn!(blob_id = %self.id, error = %e, "failed to remove abandoned staging file");
            }
        }
    }
}

/// A committed blob opened for reading
#[derive(Debug)]
pub struct OpenBlob {
    id: BlobId,
    path: PathBuf,
    file: tokio::fs::File,
    len: u64,
}

impl OpenBlob {
    /// Blob id
    pub fn id(&self) -> &BlobId {
        &self.id
    }

    /// Exact size in bytes
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the blob holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stream the content, deleting the blob once the stream is dropped
    ///
    /// The stream is dropped after the last chunk has been sent, or early if
    /// the client goes away; either way the blob is gone afterwards.
    pub fn into_consuming_stream(self) -> BlobReader {
        BlobReader {
            inner: ReaderStream::new(self.file),
            _guard: DeleteOnDrop {
                id: self.id,
                path: self.path,
            },
        }
    }
}

/// Byte stream of a blob that deletes the blob when dropped
pub struct BlobReader {
    inner: ReaderStream<tokio::fs::File>,
    _guard: DeleteOnDrop,
}

impl Stream for BlobReader {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

struct DeleteOnDrop {
    id: BlobId,
    path: PathBuf,
}

impl Drop for DeleteOnDrop {
    fn drop(&mut self) {
        match remove_if_exists(&self.path) {
            Ok(true) => debug!(blob_id = %self.id, "blob deleted after retrieval"),
            Ok(false) => {}
            Err(e) => warn!(blob_id = %self.id, error = %e, "failed to delete retrieved blob"),
        }
    }
}
