//! Database layer for bulkzip
//!
//! Handles SQLite persistence for the collection registry.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - `migrations`: Database lifecycle, schema migrations
//! - `collections`: Collection registration, lookup and expiry

use crate::types::{Collection, CollectionId, Item};
use sqlx::{FromRow, sqlite::SqlitePool};

mod collections;
mod migrations;

/// Length of generated collection ids
pub const COLLECTION_ID_LEN: usize = 8;

/// Collection record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct CollectionRow {
    /// Collection id
    pub id: String,
    /// Items as a JSON array of `{url, filename}`
    pub items: String,
    /// Unix timestamp when the collection was registered
    pub created_at: i64,
}

impl CollectionRow {
    /// Decode the stored JSON into a [`Collection`]
    pub fn into_collection(self) -> crate::Result<Collection> {
        use chrono::{TimeZone, Utc};

        let items: Vec<Item> = serde_json::from_str(&self.items).map_err(|e| {
            crate::Error::Database(crate::error::DatabaseError::CorruptRecord {
                id: self.id.clone(),
                reason: format!("items are not valid JSON: {}", e),
            })
        })?;

        Ok(Collection {
            id: CollectionId(self.id),
            items,
            created_at: Utc
                .timestamp_opt(self.created_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }
}

/// Database handle for bulkzip
pub struct Database {
    pool: SqlitePool,
}
