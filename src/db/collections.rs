//! Collection registration, lookup and expiry.

use crate::build::CollectionSource;
use crate::error::DatabaseError;
use crate::types::{Collection, CollectionId, Item};
use crate::{Error, Result};
use async_trait::async_trait;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{COLLECTION_ID_LEN, CollectionRow, Database};

/// Attempts at inserting under a fresh id before giving up
const MAX_ID_ATTEMPTS: usize = 5;

impl Database {
    /// Register an ordered item list under a new random id
    pub async fn create_collection(&self, items: &[Item]) -> Result<CollectionId> {
        let payload = serde_json::to_string(items)?;
        let now = chrono::Utc::now().timestamp();

        for _ in 0..MAX_ID_ATTEMPTS {
            let id = generate_collection_id();
            let result = sqlx::query(
                r#"
                INSERT INTO collections (id, items, created_at)
                VALUES (?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&payload)
            .bind(now)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => {
                    tracing::debug!(collection_id = %id, items = items.len(), "collection created");
                    return Ok(CollectionId(id));
                }
                Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                    tracing::debug!(collection_id = %id, "collection id collision, retrying");
                    continue;
                }
                Err(e) => return Err(Error::Sqlx(e)),
            }
        }

        Err(Error::Database(DatabaseError::QueryFailed(
            "could not allocate an unused collection id".to_string(),
        )))
    }

    /// Get a collection by id
    pub async fn get_collection(&self, id: &CollectionId) -> Result<Option<Collection>> {
        let row = sqlx::query_as::<_, CollectionRow>(
            r#"
            SELECT id, items, created_at
            FROM collections
            WHERE id = ?
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Sqlx)?;

        row.map(CollectionRow::into_collection).transpose()
    }

    /// Delete collections registered more than `max_age` ago
    ///
    /// Returns the number of collections removed.
    pub async fn delete_collections_older_than(&self, max_age: Duration) -> Result<u64> {
        let cutoff = chrono::Utc::now().timestamp() - max_age.as_secs() as i64;

        let result = sqlx::query("DELETE FROM collections WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        Ok(result.rows_affected())
    }

    /// Delete expired collections every `interval` until `cancel_token` fires
    pub fn spawn_collection_cleanup(
        self: &Arc<Self>,
        max_age: Duration,
        interval: Duration,
        cancel_token: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let db = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match db.delete_collections_older_than(max_age).await {
                            Ok(0) => {}
                            Ok(count) => tracing::info!(count, "deleted expired collections"),
                            Err(e) => tracing::warn!(error = %e, "collection cleanup failed"),
                        }
                    }
                    _ = cancel_token.cancelled() => {
                        tracing::debug!("collection cleanup stopped");
                        return;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl CollectionSource for Database {
    async fn get_items(&self, id: &CollectionId) -> Result<Option<Vec<Item>>> {
        Ok(self.get_collection(id).await?.map(|c| c.items))
    }
}

fn generate_collection_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(COLLECTION_ID_LEN)
        .map(char::from)
        .collect()
}
