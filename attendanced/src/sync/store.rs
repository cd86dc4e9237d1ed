use std::path::{Path, PathBuf};

use attendance_core::timestamp::now_millis;
use attendance_core::{DayStatus, ModelError, Permission, Share, Tracker, TrackerType};
use rand::Rng;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction, migrate::Migrator};
use thiserror::Error;
use tracing::{debug, warn};

use super::backoff::RetryPolicy;
use super::entry::Entry;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const ENTRY_COLUMNS: &str = "id, tracker_id, date, status, is_advisory, last_modified, created_at, needs_sync, sync_error, retry_count";
const SHARE_COLUMNS: &str =
    "tracker_id, owner_id, shared_with_id, shared_with_email, permission, created_at";
const TRACKER_COLUMNS: &str = "id, owner_id, name, color, is_default, tracker_type";
const DEFAULT_TRACKER_NAME: &str = "Attendance";
const DEFAULT_TRACKER_COLOR: &str = "#4285F4";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error("corrupt row: {0}")]
    Model(#[from] ModelError),
    #[error("invalid record: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictRecord {
    pub id: i64,
    pub entry_id: String,
    pub local_status: DayStatus,
    pub remote_status: DayStatus,
    pub local_modified: i64,
    pub remote_modified: i64,
    pub resolved_at: i64,
}

/// The on-device store. Every mutating call is one SQLite transaction.
pub struct LocalRepository {
    pool: SqlitePool,
}

impl LocalRepository {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(database_url: &str, policy: &RetryPolicy) -> Result<Self, StoreError> {
        let outcome = policy
            .run(
                |attempt| async move {
                    debug!(attempt, database_url, "opening local store");
                    SqlitePool::connect(database_url).await
                },
                |err: &sqlx::Error| {
                    warn!(error = %err, "local store not ready yet");
                    true
                },
            )
            .await;
        let store = Self {
            pool: outcome.result?,
        };
        store.ensure_ready().await?;
        Ok(store)
    }

    pub async fn open_path(path: &Path, policy: &RetryPolicy) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let outcome = policy
            .run(
                |attempt| {
                    debug!(attempt, path = %path.display(), "opening local store");
                    SqlitePoolOptions::new().connect_with(options.clone())
                },
                |err: &sqlx::Error| {
                    warn!(error = %err, "local store not ready yet");
                    true
                },
            )
            .await;
        let store = Self {
            pool: outcome.result?,
        };
        store.ensure_ready().await?;
        Ok(store)
    }

    /// Applies pending migrations and checks that the database answers.
    pub async fn ensure_ready(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn create_or_update(&self, entry: &Entry) -> Result<Entry, StoreError> {
        entry.validate().map_err(StoreError::Validation)?;
        let mut tx = self.pool.begin().await?;
        upsert_entry(&mut tx, entry).await?;
        let stored = fetch_entry(&mut tx, &entry.tracker_id, &entry.date).await?;
        tx.commit().await?;
        stored.ok_or_else(|| StoreError::Validation(format!("entry {} vanished", entry.id)))
    }

    /// Writes a pulled copy unless the local row has a newer or equal timestamp.
    /// Returns whether the row was written.
    pub async fn apply_remote(&self, entry: &Entry) -> Result<bool, StoreError> {
        entry.validate().map_err(StoreError::Validation)?;
        let result = sqlx::query(
            "INSERT INTO entries (id, tracker_id, date, status, is_advisory, last_modified, created_at, needs_sync, sync_error, retry_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL, 0)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                is_advisory = excluded.is_advisory,
                last_modified = excluded.last_modified,
                created_at = excluded.created_at,
                needs_sync = 0,
                sync_error = NULL,
                retry_count = 0
             WHERE excluded.last_modified > entries.last_modified",
        )
        .bind(&entry.id)
        .bind(&entry.tracker_id)
        .bind(&entry.date)
        .bind(entry.status.as_str())
        .bind(entry.is_advisory)
        .bind(entry.last_modified)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_entry(&self, tracker_id: &str, date: &str) -> Result<Option<Entry>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE tracker_id = ?1 AND date = ?2"
        ))
        .bind(tracker_id)
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    pub async fn list_by_tracker(&self, tracker_id: &str) -> Result<Vec<Entry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE tracker_id = ?1 ORDER BY date ASC"
        ))
        .bind(tracker_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// Dirty entries in the order they were modified.
    pub async fn list_needing_sync(
        &self,
        tracker_id: Option<&str>,
    ) -> Result<Vec<Entry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             WHERE needs_sync = 1 AND (?1 IS NULL OR tracker_id = ?1)
             ORDER BY last_modified ASC, date ASC, id ASC"
        ))
        .bind(tracker_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    pub async fn count_needing_sync(&self, tracker_id: Option<&str>) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM entries WHERE needs_sync = 1 AND (?1 IS NULL OR tracker_id = ?1)",
        )
        .bind(tracker_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    /// Clears the dirty flag for entries acknowledged by the remote store.
    /// A row edited after it was read keeps its flag; returns the cleared count.
    pub async fn mark_synced(&self, entries: &[Entry]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut cleared = 0usize;
        for entry in entries {
            let result = sqlx::query(
                "UPDATE entries SET needs_sync = 0, retry_count = 0, sync_error = NULL
                 WHERE id = ?1 AND last_modified = ?2",
            )
            .bind(&entry.id)
            .bind(entry.last_modified)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 0 {
                debug!(entry_id = %entry.id, "entry changed or vanished during push; left as is");
            }
            cleared += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(cleared)
    }

    /// Keeps entries dirty and records why the push failed.
    pub async fn mark_sync_error(
        &self,
        entries: &[Entry],
        message: &str,
        failed_attempts: u32,
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut updated = 0usize;
        for entry in entries {
            let result = sqlx::query(
                "UPDATE entries SET needs_sync = 1, sync_error = ?1, retry_count = retry_count + ?2
                 WHERE id = ?3",
            )
            .bind(message)
            .bind(i64::from(failed_attempts))
            .bind(&entry.id)
            .execute(&mut *tx)
            .await?;
            updated += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(updated)
    }

    /// Returns `false` when no such entry exists.
    pub async fn mark_dirty(&self, tracker_id: &str, date: &str) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE entries SET needs_sync = 1 WHERE tracker_id = ?1 AND date = ?2")
                .bind(tracker_id)
                .bind(date)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Stores a tracker as known to the remote store.
    pub async fn upsert_tracker(&self, tracker: &Tracker) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        write_remote_tracker(&mut tx, tracker).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Creates a tracker; the owner's first tracker becomes the default.
    pub async fn create_tracker(
        &self,
        owner_id: &str,
        name: &str,
        color: &str,
        tracker_type: TrackerType,
    ) -> Result<Tracker, StoreError> {
        let mut tx = self.pool.begin().await?;
        let has_default: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM trackers WHERE owner_id = ?1 AND is_default = 1",
        )
        .bind(owner_id)
        .fetch_one(&mut *tx)
        .await?;
        let tracker = Tracker {
            id: generate_id(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            color: color.to_string(),
            is_default: has_default == 0,
            tracker_type,
        };
        sqlx::query(
            "INSERT INTO trackers (id, owner_id, name, color, is_default, tracker_type, created_at, needs_publish)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)",
        )
        .bind(&tracker.id)
        .bind(&tracker.owner_id)
        .bind(&tracker.name)
        .bind(&tracker.color)
        .bind(tracker.is_default)
        .bind(tracker.tracker_type.as_str())
        .bind(now_millis())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(tracker)
    }

    pub async fn ensure_default_tracker(&self, owner_id: &str) -> Result<Tracker, StoreError> {
        if let Some(tracker) = self.default_tracker(owner_id).await? {
            return Ok(tracker);
        }
        self.create_tracker(
            owner_id,
            DEFAULT_TRACKER_NAME,
            DEFAULT_TRACKER_COLOR,
            TrackerType::Attendance,
        )
        .await
    }

    /// Whether the tracker was created here and the remote store has not seen it yet.
    pub async fn tracker_needs_publish(&self, tracker_id: &str) -> Result<bool, StoreError> {
        let flag: Option<bool> =
            sqlx::query_scalar("SELECT needs_publish FROM trackers WHERE id = ?1")
                .bind(tracker_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(flag.unwrap_or(false))
    }

    pub async fn mark_tracker_published(&self, tracker_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE trackers SET needs_publish = 0 WHERE id = ?1")
            .bind(tracker_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Replaces the unpublished tracker `from_id` with `target`, a tracker the
    /// remote store already holds. Entries and cached shares move over; on a
    /// date both trackers have, the later edit wins. Returns the moved entry count.
    pub async fn adopt_tracker(&self, from_id: &str, target: &Tracker) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE tracker_id = ?1 ORDER BY date ASC"
        ))
        .bind(from_id)
        .fetch_all(&mut *tx)
        .await?;
        let entries = rows
            .iter()
            .map(entry_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        sqlx::query("DELETE FROM entries WHERE tracker_id = ?1")
            .bind(from_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM trackers WHERE id = ?1")
            .bind(from_id)
            .execute(&mut *tx)
            .await?;
        write_remote_tracker(&mut tx, target).await?;

        for entry in &entries {
            let moved = Entry {
                id: Entry::id_for(&target.id, &entry.date),
                tracker_id: target.id.clone(),
                ..entry.clone()
            };
            sqlx::query(
                "INSERT INTO entries (id, tracker_id, date, status, is_advisory, last_modified, created_at, needs_sync, sync_error, retry_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    is_advisory = excluded.is_advisory,
                    last_modified = excluded.last_modified,
                    needs_sync = excluded.needs_sync,
                    sync_error = excluded.sync_error,
                    retry_count = excluded.retry_count
                 WHERE excluded.last_modified > entries.last_modified",
            )
            .bind(&moved.id)
            .bind(&moved.tracker_id)
            .bind(&moved.date)
            .bind(moved.status.as_str())
            .bind(moved.is_advisory)
            .bind(moved.last_modified)
            .bind(moved.created_at)
            .bind(moved.needs_sync)
            .bind(&moved.sync_error)
            .bind(i64::from(moved.retry_count))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE OR IGNORE shares SET tracker_id = ?2 WHERE tracker_id = ?1")
            .bind(from_id)
            .bind(&target.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM shares WHERE tracker_id = ?1")
            .bind(from_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(entries.len())
    }

    pub async fn get_tracker(&self, tracker_id: &str) -> Result<Option<Tracker>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TRACKER_COLUMNS} FROM trackers WHERE id = ?1"
        ))
        .bind(tracker_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(tracker_from_row).transpose()
    }

    pub async fn default_tracker(&self, owner_id: &str) -> Result<Option<Tracker>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TRACKER_COLUMNS} FROM trackers WHERE owner_id = ?1 AND is_default = 1"
        ))
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(tracker_from_row).transpose()
    }

    pub async fn list_trackers(&self, owner_id: &str) -> Result<Vec<Tracker>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRACKER_COLUMNS} FROM trackers WHERE owner_id = ?1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(tracker_from_row).collect()
    }

    pub async fn upsert_share(&self, share: &Share) -> Result<(), StoreError> {
        validate_share(share)?;
        let mut tx = self.pool.begin().await?;
        insert_share(&mut tx, share).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn remove_share(
        &self,
        owner_id: &str,
        tracker_id: &str,
        shared_with_id: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "DELETE FROM shares WHERE owner_id = ?1 AND tracker_id = ?2 AND shared_with_id = ?3",
        )
        .bind(owner_id)
        .bind(tracker_id)
        .bind(shared_with_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_share(
        &self,
        owner_id: &str,
        tracker_id: &str,
        shared_with_id: &str,
    ) -> Result<Option<Share>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SHARE_COLUMNS} FROM shares
             WHERE owner_id = ?1 AND tracker_id = ?2 AND shared_with_id = ?3"
        ))
        .bind(owner_id)
        .bind(tracker_id)
        .bind(shared_with_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(share_from_row).transpose()
    }

    pub async fn list_shares_by_owner(&self, owner_id: &str) -> Result<Vec<Share>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SHARE_COLUMNS} FROM shares WHERE owner_id = ?1 ORDER BY created_at ASC, shared_with_id ASC"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(share_from_row).collect()
    }

    pub async fn list_shares_for_user(&self, user_id: &str) -> Result<Vec<Share>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SHARE_COLUMNS} FROM shares WHERE shared_with_id = ?1 ORDER BY created_at ASC, owner_id ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(share_from_row).collect()
    }

    /// Replaces the cached grants made to `user_id` with a fresh remote listing.
    pub async fn replace_shares_for_user(
        &self,
        user_id: &str,
        shares: &[Share],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM shares WHERE shared_with_id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        for share in shares.iter().filter(|share| share.shared_with_id == user_id) {
            validate_share(share)?;
            insert_share(&mut tx, share).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Replaces the cached grants made by `owner_id` with a fresh remote listing.
    pub async fn replace_shares_by_owner(
        &self,
        owner_id: &str,
        shares: &[Share],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM shares WHERE owner_id = ?1")
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;
        for share in shares.iter().filter(|share| share.owner_id == owner_id) {
            validate_share(share)?;
            insert_share(&mut tx, share).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn record_conflict(
        &self,
        local: &Entry,
        remote: &Entry,
        resolved_at: i64,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO conflicts (entry_id, local_status, remote_status, local_modified, remote_modified, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&local.id)
        .bind(local.status.as_str())
        .bind(remote.status.as_str())
        .bind(local.last_modified)
        .bind(remote.last_modified)
        .bind(resolved_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_conflicts(&self) -> Result<Vec<ConflictRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, entry_id, local_status, remote_status, local_modified, remote_modified, resolved_at
             FROM conflicts ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let local_status: String = row.try_get("local_status")?;
            let remote_status: String = row.try_get("remote_status")?;
            out.push(ConflictRecord {
                id: row.try_get("id")?,
                entry_id: row.try_get("entry_id")?,
                local_status: DayStatus::parse(&local_status)?,
                remote_status: DayStatus::parse(&remote_status)?,
                local_modified: row.try_get("local_modified")?,
                remote_modified: row.try_get("remote_modified")?,
                resolved_at: row.try_get("resolved_at")?,
            });
        }
        Ok(out)
    }

    pub async fn last_sync_time(&self) -> Result<Option<i64>, StoreError> {
        let value: Option<Option<i64>> =
            sqlx::query_scalar("SELECT last_sync_time FROM sync_meta WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.flatten())
    }

    pub async fn set_last_sync_time(&self, millis: i64) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sync_meta (id, last_sync_time) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET last_sync_time = excluded.last_sync_time",
        )
        .bind(millis)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub fn default_db_path() -> Result<PathBuf, StoreError> {
    let mut path = dirs::data_dir().ok_or(StoreError::MissingDataDir)?;
    path.push("attendance-sync");
    path.push("local.db");
    Ok(path)
}

async fn upsert_entry(tx: &mut Transaction<'_, Sqlite>, entry: &Entry) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO entries (id, tracker_id, date, status, is_advisory, last_modified, created_at, needs_sync, sync_error, retry_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            is_advisory = excluded.is_advisory,
            last_modified = excluded.last_modified,
            needs_sync = excluded.needs_sync,
            sync_error = excluded.sync_error,
            retry_count = excluded.retry_count",
    )
    .bind(&entry.id)
    .bind(&entry.tracker_id)
    .bind(&entry.date)
    .bind(entry.status.as_str())
    .bind(entry.is_advisory)
    .bind(entry.last_modified)
    .bind(entry.created_at)
    .bind(entry.needs_sync)
    .bind(&entry.sync_error)
    .bind(i64::from(entry.retry_count))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Writes a tracker the remote store holds, keeping one default per owner.
async fn write_remote_tracker(
    tx: &mut Transaction<'_, Sqlite>,
    tracker: &Tracker,
) -> Result<(), StoreError> {
    if tracker.is_default {
        sqlx::query("UPDATE trackers SET is_default = 0 WHERE owner_id = ?1 AND id <> ?2")
            .bind(&tracker.owner_id)
            .bind(&tracker.id)
            .execute(&mut **tx)
            .await?;
    }
    sqlx::query(
        "INSERT INTO trackers (id, owner_id, name, color, is_default, tracker_type, created_at, needs_publish)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)
         ON CONFLICT(id) DO UPDATE SET
            owner_id = excluded.owner_id,
            name = excluded.name,
            color = excluded.color,
            is_default = excluded.is_default,
            tracker_type = excluded.tracker_type,
            needs_publish = 0",
    )
    .bind(&tracker.id)
    .bind(&tracker.owner_id)
    .bind(&tracker.name)
    .bind(&tracker.color)
    .bind(tracker.is_default)
    .bind(tracker.tracker_type.as_str())
    .bind(now_millis())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn fetch_entry(
    tx: &mut Transaction<'_, Sqlite>,
    tracker_id: &str,
    date: &str,
) -> Result<Option<Entry>, StoreError> {
    let row = sqlx::query(&format!(
        "SELECT {ENTRY_COLUMNS} FROM entries WHERE tracker_id = ?1 AND date = ?2"
    ))
    .bind(tracker_id)
    .bind(date)
    .fetch_optional(&mut **tx)
    .await?;
    row.as_ref().map(entry_from_row).transpose()
}

async fn insert_share(tx: &mut Transaction<'_, Sqlite>, share: &Share) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO shares (tracker_id, owner_id, shared_with_id, shared_with_email, permission, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(tracker_id, owner_id, shared_with_id) DO UPDATE SET
            shared_with_email = excluded.shared_with_email,
            permission = excluded.permission",
    )
    .bind(&share.tracker_id)
    .bind(&share.owner_id)
    .bind(&share.shared_with_id)
    .bind(&share.shared_with_email)
    .bind(share.permission.as_str())
    .bind(share.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn validate_share(share: &Share) -> Result<(), StoreError> {
    if share.shared_with_id == share.owner_id {
        return Err(StoreError::Validation(format!(
            "tracker {} cannot be shared with its owner",
            share.tracker_id
        )));
    }
    Ok(())
}

fn entry_from_row(row: &SqliteRow) -> Result<Entry, StoreError> {
    let status: String = row.try_get("status")?;
    let retry_count: i64 = row.try_get("retry_count")?;
    Ok(Entry {
        id: row.try_get("id")?,
        tracker_id: row.try_get("tracker_id")?,
        date: row.try_get("date")?,
        status: DayStatus::parse(&status)?,
        is_advisory: row.try_get("is_advisory")?,
        last_modified: row.try_get("last_modified")?,
        created_at: row.try_get("created_at")?,
        needs_sync: row.try_get("needs_sync")?,
        sync_error: row.try_get("sync_error")?,
        retry_count: u32::try_from(retry_count).unwrap_or(0),
    })
}

fn tracker_from_row(row: &SqliteRow) -> Result<Tracker, StoreError> {
    let tracker_type: String = row.try_get("tracker_type")?;
    Ok(Tracker {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        color: row.try_get("color")?,
        is_default: row.try_get("is_default")?,
        tracker_type: TrackerType::parse(&tracker_type)?,
    })
}

fn share_from_row(row: &SqliteRow) -> Result<Share, StoreError> {
    let permission: String = row.try_get("permission")?;
    Ok(Share {
        tracker_id: row.try_get("tracker_id")?,
        owner_id: row.try_get("owner_id")?,
        shared_with_id: row.try_get("shared_with_id")?,
        shared_with_email: row.try_get("shared_with_email")?,
        permission: Permission::parse(&permission)?,
        created_at: row.try_get("created_at")?,
    })
}

fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..20)
        .map(|_| char::from_digit(rng.gen_range(0..36), 36).unwrap_or('0'))
        .collect()
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
