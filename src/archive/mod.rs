//! Size-bounded archive packing
//!
//! [`ArchivePacker`] appends entries to ZIP containers held in the
//! [`BlobStore`], starting a new container whenever the next entry would push
//! the current one past its uncompressed input budget. A single entry is never
//! split, so an entry larger than the budget gets a part to itself.
//!
//! Parts are opened lazily on the first append and become retrievable blobs
//! only once finalized.

mod writer;

use crate::blob_store::BlobStore;
use crate::error::{FetchError, PackError};
use crate::fetch::{FetchedBody, spool};
use crate::types::PartRecord;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info};
use writer::PartWriter;

/// Why an append did not produce an entry
#[derive(Debug, thiserror::Error)]
pub enum AppendError {
    /// The body failed while streaming; nothing was written to the part
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The body produced more bytes than announced; nothing was written to the part
    #[error("body exceeded its declared size of {declared} bytes")]
    Oversized {
        /// Size the entry was budgeted with
        declared: u64,
    },

    /// Local storage failed; the packer must not be used further
    #[error(transparent)]
    Pack(#[from] PackError),
}

/// Settings for one packer
#[derive(Clone, Debug)]
pub struct PackerSettings {
    /// Maximum uncompressed input bytes per part
    pub part_budget_bytes: u64,
    /// Deflate level, 0-9
    pub compression_level: i32,
}

impl From<&crate::config::ArchiveConfig> for PackerSettings {
    fn from(config: &crate::config::ArchiveConfig) -> Self {
        Self {
            part_budget_bytes: config.part_budget_bytes,
            compression_level: config.compression_level,
        }
    }
}

struct OpenPart {
    writer: PartWriter,
    input_bytes: u64,
    entries: usize,
}

/// Writes entries into one or more size-bounded ZIP parts
///
/// One packer serves one build job. Blob ids of its parts embed `hint`
/// (normally the collection id) and the part number.
pub struct ArchivePacker {
    store: Arc<BlobStore>,
    settings: PackerSettings,
    hint: String,
    current: Option<OpenPart>,
    next_part_number: u32,
    parts: Vec<PartRecord>,
}

impl ArchivePacker {
    /// Create a packer; no container is opened until the first append
    pub fn new(store: Arc<BlobStore>, settings: PackerSettings, hint: impl Into<String>) -> Self {
        Self {
            store,
            settings,
            hint: hint.into(),
            current: None,
            next_part_number: 1,
            parts: Vec::new(),
        }
    }

    /// Parts finalized so far
    pub fn parts(&self) -> &[PartRecord] {
        &self.parts
    }

    /// Input bytes accepted into the currently open part
    pub fn current_part_bytes(&self) -> u64 {
        self.current.as_ref().map_or(0, |part| part.input_bytes)
    }

    /// Number of the part the next entry would land in without rotation
    pub fn current_part_number(&self) -> u32 {
        self.current
            .as_ref()
            .map_or(self.next_part_number, |part| part.writer.part_number())
    }

    /// The part that appending `incoming_size` bytes would close, if any
    ///
    /// Rotation happens only when the open part already holds an entry and
    /// the new entry would take it past the budget.
    pub fn would_rotate(&self, incoming_size: u64) -> Option<u32> {
        let part = self.current.as_ref()?;
        let over_budget =
            part.input_bytes.saturating_add(incoming_size) > self.settings.part_budget_bytes;
        (part.entries > 0 && over_budget).then(|| part.writer.part_number())
    }

    /// Finalize the open part if `incoming_size` would not fit in it
    pub async fn rotate_if_needed(
        &mut self,
        incoming_size: u64,
    ) -> Result<Option<PartRecord>, PackError> {
        if self.would_rotate(incoming_size).is_none() {
            return Ok(None);
        }
        match self.current.take() {
            Some(part) => {
                let record = self.close_part(part).await?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Append one entry of `size` bytes read from `body`
    ///
    /// The body is drained to a local spool file before the entry is opened,
    /// so a body that fails or yields more bytes than `size` never touches the
    /// container and the packer stays usable. Rotates first when the exact
    /// length needs it. Returns the bytes written.
    pub async fn append(
        &mut self,
        name: &str,
        size: u64,
        body: FetchedBody,
    ) -> Result<u64, AppendError> {
        let body = match self.stage(name, size, body).await {
            Ok(body) => body,
            Err(error) => {
                debug!(entry = name, error = %error, "entry skipped before packing");
                return Err(error);
            }
        };
        let len = body.content_length.unwrap_or(size);

        self.rotate_if_needed(len).await?;
        let part_budget = self.settings.part_budget_bytes;
        let part = self.open_part().await?;
        let part_number = part.writer.part_number();

        part.writer.start_entry(name, len).await?;

        let mut stream = body.stream;
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| PackError::WriteFailed {
                part_number,
                entry: name.to_string(),
                reason: e.to_string(),
            })?;
            written += bytes.len() as u64;
            part.writer.write_chunk(bytes).await?;
        }
        drop(stream);

        part.writer.finish_entry().await?;
        part.input_bytes += written;
        part.entries += 1;

        debug!(
            entry = name,
            bytes = written,
            part_number,
            part_bytes = part.input_bytes,
            part_budget,
            "entry appended"
        );

        Ok(written)
    }

    /// Bring `body` onto local disk, holding it to its declared `size`
    async fn stage(
        &self,
        name: &str,
        size: u64,
        body: FetchedBody,
    ) -> Result<FetchedBody, AppendError> {
        if body.is_spooled() {
            return match body.content_length {
                Some(len) if len > size => Err(AppendError::Oversized { declared: size }),
                _ => Ok(body),
            };
        }

        spool(name, body, self.store.dir(), Some(size))
            .await
            .map_err(|e| match e {
                FetchError::TooLong { declared, .. } => AppendError::Oversized { declared },
                FetchError::Spool { url, reason } => {
                    AppendError::Pack(PackError::SpoolFailed { entry: url, reason })
                }
                other => AppendError::Fetch(other),
            })
    }

    /// Finalize the open part and return every part in order
    ///
    /// Always yields at least one part: a job whose entries all failed still
    /// gets an empty archive. A trailing part that ended up empty after an
    /// earlier rotation is discarded.
    pub async fn finalize(mut self) -> Result<Vec<PartRecord>, PackError> {
        let current = self.current.take();
        match current {
            Some(part) if part.entries == 0 && !self.parts.is_empty() => {
                debug!(
                    part_number = part.writer.part_number(),
                    "discarding empty trailing part"
                );
                drop(part);
            }
            Some(part) => {
                self.close_part(part).await?;
            }
            None if self.parts.is_empty() => {
                self.open_part().await?;
                if let Some(part) = self.current.take() {
                    self.close_part(part).await?;
                }
            }
            None => {}
        }

        Ok(self.parts)
    }

    async fn open_part(&mut self) -> Result<&mut OpenPart, PackError> {
        if self.current.is_none() {
            let part_number = self.next_part_number;
            let writer = PartWriter::open(
                Arc::clone(&self.store),
                format!("{}_part{}", self.hint, part_number),
                part_number,
                self.settings.compression_level,
            )
            .await?;
            self.next_part_number += 1;
            self.current = Some(OpenPart {
                writer,
                input_bytes: 0,
                entries: 0,
            });
        }

        self.current.as_mut().ok_or(PackError::WriterGone {
            part_number: self.next_part_number,
        })
    }

    async fn close_part(&mut self, part: OpenPart) -> Result<PartRecord, PackError> {
        let part_number = part.writer.part_number();
        let expected_id = part.writer.blob_id().clone();
        let (blob_id, size_bytes) = part.writer.finish().await?;
        debug_assert_eq!(blob_id, expected_id);

        info!(
            part_number,
            blob_id = %blob_id,
            entries = part.entries,
            input_bytes = part.input_bytes,
            size_bytes,
            "archive part finalized"
        );

        let record = PartRecord {
            part_number,
            blob_id,
            size_bytes,
        };
        self.parts.push(record.clone());
        Ok(record)
    }
}
