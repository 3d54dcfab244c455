//! Core types for bulkzip

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use utoipa::ToSchema;

#[allow(clippy::unwrap_used)]
static BLOB_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

/// One remote file to fetch and pack
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Item {
    /// Remote URL of the file
    pub url: String,
    /// Advisory filename used for the archive entry; need not be unique
    pub filename: String,
}

impl Item {
    /// Create a new item
    pub fn new(url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: filename.into(),
        }
    }
}

/// Opaque identifier of a collection
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct CollectionId(pub String);

impl CollectionId {
    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CollectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for CollectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for CollectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered set of items registered under one id
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    /// Collection id
    pub id: CollectionId,
    /// Items in submission order
    pub items: Vec<Item>,
    /// When the collection was registered
    pub created_at: DateTime<Utc>,
}

/// Identifier of a stored blob
///
/// Always matches `^[A-Za-z0-9_]+$`, so it can be used as a file stem and a
/// URL path segment without escaping.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobId(String);

impl BlobId {
    /// Validate an untrusted id
    pub fn parse(raw: &str) -> Result<Self> {
        if BLOB_ID_PATTERN.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(Error::InvalidBlobId(raw.to_string()))
        }
    }

    /// Wrap an id minted by the blob store, which only emits word characters
    pub(crate) fn from_generated(id: String) -> Self {
        debug_assert!(BLOB_ID_PATTERN.is_match(&id));
        Self(id)
    }

    /// Borrow the raw id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A finalized archive part
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartRecord {
    /// 1-based part number within the job
    pub part_number: u32,
    /// Blob holding the part
    pub blob_id: BlobId,
    /// Size of the ZIP file on disk
    pub size_bytes: u64,
}

/// Phase reported by `progress` events
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Item fetch started
    Downloading,
    /// Item appended to the current part
    Added,
    /// A full part is about to be finalized
    SavingPart,
    /// All items processed, closing the last part
    Finalizing,
}

/// One entry of a `complete_multipart` event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PartSummary {
    /// 1-based part number
    pub part_number: u32,
    /// Retrieval URL for the part
    pub url: String,
    /// Size in bytes
    pub size: u64,
    /// Human-readable size
    pub size_formatted: String,
}

/// Event pushed to the client while a build job runs
///
/// Serialized with a `type` discriminator; field names are camelCase on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Collection resolved, item count known
    Start {
        /// Number of items in the collection
        total: usize,
    },

    /// Pipeline state change
    #[serde(rename_all = "camelCase")]
    Progress {
        /// 1-based index of the item concerned
        current: usize,
        /// Number of items in the collection
        total: usize,
        /// Original filename of the item, when the phase concerns one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        /// What just happened
        phase: Phase,
        /// Part being saved (only for `saving_part`)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        part_number: Option<u32>,
    },

    /// A single item failed and was skipped
    Warning {
        /// Human-readable description
        message: String,
        /// 1-based index of the failed item
        current: usize,
        /// Number of items in the collection
        total: usize,
    },

    /// Job finished with exactly one part
    #[serde(rename_all = "camelCase")]
    Complete {
        /// Retrieval URL of the archive
        download_url: String,
        /// Suggested filename for the archive
        filename: String,
    },

    /// Job finished with several parts
    #[serde(rename_all = "camelCase")]
    CompleteMultipart {
        /// Parts in order
        parts: Vec<PartSummary>,
        /// Number of parts
        total_parts: usize,
    },

    /// Job could not start
    Error {
        /// Human-readable description
        message: String,
    },
}

impl ProgressEvent {
    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Complete { .. }
                | ProgressEvent::CompleteMultipart { .. }
                | ProgressEvent::Error { .. }
        )
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blob_id_accepts_word_characters_only() {
        assert!(BlobId::parse("abc123_part1_00ff").is_ok());
        for bad in ["", "../etc", "a-b", "a.zip", "a b", "a/b", "ä"] {
            assert!(
                matches!(BlobId::parse(bad), Err(Error::InvalidBlobId(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn start_event_wire_format() {
        let json = serde_json::to_value(ProgressEvent::Start { total: 3 }).unwrap();
        assert_eq!(json, json!({"type": "start", "total": 3}));
    }

    #[test]
    fn progress_event_omits_absent_optionals() {
        let event = ProgressEvent::Progress {
            current: 2,
            total: 3,
            filename: Some("clip.mp4".into()),
            phase: Phase::Downloading,
            part_number: None,
        };
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(
            json,
            json!({"type": "progress", "current": 2, "total": 3, "filename": "clip.mp4", "phase": "downloading"})
        );
    }

    #[test]
    fn saving_part_uses_camel_case_part_number() {
        let event = ProgressEvent::Progress {
            current: 4,
            total: 9,
            filename: None,
            phase: Phase::SavingPart,
            part_number: Some(2),
        };
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["phase"], "saving_part");
        assert_eq!(json["partNumber"], 2);
        assert!(json.get("filename").is_none());
    }

    #[test]
    fn complete_events_use_camel_case_fields() {
        let json = serde_json::to_value(ProgressEvent::Complete {
            download_url: "/api/zip-download/x".into(),
            filename: "videos_x.zip".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "complete");
        assert_eq!(json["downloadUrl"], "/api/zip-download/x");

        let json = serde_json::to_value(ProgressEvent::CompleteMultipart {
            parts: vec![PartSummary {
                part_number: 1,
                url: "/api/zip-download/p1".into(),
                size: 2048,
                size_formatted: "2.0 KB".into(),
            }],
            total_parts: 1,
        })
        .unwrap();
        assert_eq!(json["type"], "complete_multipart");
        assert_eq!(json["totalParts"], 1);
        assert_eq!(json["parts"][0]["partNumber"], 1);
        assert_eq!(json["parts"][0]["sizeFormatted"], "2.0 KB");
    }

    #[test]
    fn terminal_events_are_flagged() {
        assert!(ProgressEvent::Error { message: "x".into() }.is_terminal());
        assert!(!ProgressEvent::Start { total: 1 }.is_terminal());
        assert!(
            !ProgressEvent::Warning {
                message: "x".into(),
                current: 1,
                total: 1
            }
            .is_terminal()
        );
    }

    #[test]
    fn collection_serializes_created_at_in_camel_case() {
        let collection = Collection {
            id: "abc".into(),
            items: vec![Item::new("http://x/a.mp4", "a.mp4")],
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(collection).unwrap();
        assert!(json.get("createdAt").is_some());
        assert_eq!(json["id"], "abc");
    }
}
