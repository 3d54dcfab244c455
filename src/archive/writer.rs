//! Blocking ZIP writer for one archive part
//!
//! `zip` is a synchronous crate, so each open part is owned by a dedicated
//! blocking thread. The async side drives it with [`WriterCommand`]s over a
//! bounded channel; chunk writes are fire-and-forget and any failure is
//! reported by the next command that expects a reply.

use crate::blob_store::{BlobStore, StagedBlob};
use crate::error::PackError;
use crate::types::BlobId;
use bytes::Bytes;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Chunks buffered between the fetch side and the disk
const COMMAND_BUFFER: usize = 16;

/// Entries at least this large need ZIP64 headers
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

type Reply<T> = oneshot::Sender<Result<T, String>>;

enum WriterCommand {
    StartEntry {
        name: String,
        large: bool,
        reply: Reply<()>,
    },
    Chunk(Bytes),
    FinishEntry {
        reply: Reply<()>,
    },
    Finish {
        reply: Reply<(BlobId, u64)>,
    },
}

/// Async handle to the writer thread of one part
pub(crate) struct PartWriter {
    part_number: u32,
    blob_id: BlobId,
    tx: mpsc::Sender<WriterCommand>,
    current_entry: Option<String>,
}

impl PartWriter {
    /// Create the staging blob and start the writer thread
    pub(crate) async fn open(
        store: Arc<BlobStore>,
        hint: String,
        part_number: u32,
        compression_level: i32,
    ) -> Result<Self, PackError> {
        let staged = tokio::task::spawn_blocking(move || {
            let result = store.create(&hint);
            (result, store)
        })
        .await
        .map_err(|_| PackError::WriterGone { part_number })?;

        let staged = match staged {
            (Ok(staged), _) => staged,
            (Err(e), store) => {
                return Err(PackError::CreateFailed {
                    part_number,
                    path: store.dir().to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };
        let blob_id = staged.id().clone();

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::task::spawn_blocking(move || run_writer(staged, compression_level, rx));

        debug!(part_number, blob_id = %blob_id, "archive part opened");

        Ok(Self {
            part_number,
            blob_id,
            tx,
            current_entry: None,
        })
    }

    pub(crate) fn part_number(&self) -> u32 {
        self.part_number
    }

    pub(crate) fn blob_id(&self) -> &BlobId {
        &self.blob_id
    }

    /// Begin a new entry; `size_hint` selects ZIP64 headers for huge entries
    pub(crate) async fn start_entry(
        &mut self,
        name: &str,
        size_hint: u64,
    ) -> Result<(), PackError> {
        let name = name.to_string();
        self.current_entry = Some(name.clone());
        self.request(|reply| WriterCommand::StartEntry {
            name,
            large: size_hint >= ZIP64_THRESHOLD,
            reply,
        })
        .await
    }

    /// Queue entry bytes
    pub(crate) async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), PackError> {
        self.tx
            .send(WriterCommand::Chunk(chunk))
            .await
            .map_err(|_| PackError::WriterGone {
                part_number: self.part_number,
            })
    }

    /// Close the current entry, surfacing any queued write failure
    pub(crate) async fn finish_entry(&mut self) -> Result<(), PackError> {
        let result = self
            .request(|reply| WriterCommand::FinishEntry { reply })
            .await;
        self.current_entry = None;
        result
    }

    /// Write the central directory and publish the blob
    pub(crate) async fn finish(self) -> Result<(BlobId, u64), PackError> {
        let part_number = self.part_number;
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WriterCommand::Finish { reply })
            .await
            .map_err(|_| PackError::WriterGone { part_number })?;

        match rx.await {
            Ok(Ok(published)) => Ok(published),
            Ok(Err(reason)) => Err(PackError::FinalizeFailed {
                part_number,
                reason,
            }),
            Err(_) => Err(PackError::WriterGone { part_number }),
        }
    }

    async fn request<F>(&mut self, make: F) -> Result<(), PackError>
    where
        F: FnOnce(Reply<()>) -> WriterCommand,
    {
        let part_number = self.part_number;
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| PackError::WriterGone { part_number })?;

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(PackError::WriteFailed {
                part_number,
                entry: self.current_entry.clone().unwrap_or_default(),
                reason,
            }),
            Err(_) => Err(PackError::WriterGone { part_number }),
        }
    }
}

fn run_writer(staged: StagedBlob, compression_level: i32, mut rx: mpsc::Receiver<WriterCommand>) {
    let blob_id = staged.id().clone();
    let mut zip = ZipWriter::new(staged);
    // First failure while streaming the current entry
    let mut chunk_error: Option<String> = None;

    while let Some(command) = rx.blocking_recv() {
        match command {
            WriterCommand::StartEntry { name, large, reply } => {
                chunk_error = None;
                let options = FileOptions::default()
                    .compression_method(CompressionMethod::Deflated)
                    .compression_level(Some(compression_level))
                    .large_file(large);
                let result = zip.start_file(name, options).map_err(|e| e.to_string());
                let _ = reply.send(result);
            }
            WriterCommand::Chunk(bytes) => {
                if chunk_error.is_none() {
                    if let Err(e) = zip.write_all(&bytes) {
                        chunk_error = Some(e.to_string());
                    }
                }
            }
            WriterCommand::FinishEntry { reply } => {
                let result = match chunk_error.take() {
                    Some(reason) => Err(reason),
                    None => zip.flush().map_err(|e| e.to_string()),
                };
                let _ = reply.send(result);
            }
            WriterCommand::Finish { reply } => {
                let result = zip
                    .finish()
                    .map_err(|e| e.to_string())
                    .and_then(|staged| staged.commit().map_err(|e| e.to_string()));
                let _ = reply.send(result);
                return;
            }
        }
    }

    // Handle dropped without finishing: the staging file is removed with the writer
    warn!(blob_id = %blob_id, "archive part abandoned before finalization");
}
