//! Persistent outbound queue table.
//!
//! The queue itself (single-flight drain, triggers) lives in the sync
//! crate; this module only provides the durable state so items survive
//! process restart.  Rows are keyed by `local_id` and ordered by enqueue
//! time for FIFO replay.

use chrono::Utc;
use palaver_shared::{LocalId, Message, QueueItem, QueueItemStatus};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Insert a queue item, or update it in place when the `local_id` is
    /// already queued (re-sends never duplicate).
    pub fn outbox_put(&self, item: &QueueItem) -> Result<()> {
        let payload = serde_json::to_string(&item.message)?;
        self.lock()?.execute(
            "INSERT INTO outbox (local_id, payload, status, attempt, enqueued_at, last_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(local_id) DO UPDATE SET
                 payload = excluded.payload,
                 status  = excluded.status",
            params![
                item.local_id.to_string(),
                payload,
                item.status.as_str(),
                item.attempt,
                item.enqueued_at.to_rfc3339(),
                item.last_error,
            ],
        )?;
        Ok(())
    }

    /// Pending items in enqueue order (FIFO).
    pub fn outbox_pending(&self) -> Result<Vec<QueueItem>> {
        let guard = self.lock()?;
        let mut stmt = guard.prepare(
            "SELECT local_id, payload, status, attempt, enqueued_at, last_error
             FROM outbox WHERE status = 'pending'
             ORDER BY enqueued_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map([], row_to_item)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Fetch one queue item.
    pub fn outbox_get(&self, local_id: &LocalId) -> Result<Option<QueueItem>> {
        Ok(self
            .lock()?
            .query_row(
                "SELECT local_id, payload, status, attempt, enqueued_at, last_error
                 FROM outbox WHERE local_id = ?1",
                params![local_id.to_string()],
                row_to_item,
            )
            .optional()?)
    }

    /// Flip an item to `sending` for the duration of one attempt.
    pub fn outbox_mark_sending(&self, local_id: &LocalId) -> Result<()> {
        self.lock()?.execute(
            "UPDATE outbox SET status = 'sending' WHERE local_id = ?1",
            params![local_id.to_string()],
        )?;
        Ok(())
    }

    /// Record a failed attempt: back to `pending`, attempt counter bumped,
    /// error text kept for diagnostics.  The item is never dropped here.
    pub fn outbox_mark_failed(&self, local_id: &LocalId, error: &str) -> Result<()> {
        self.lock()?.execute(
            "UPDATE outbox SET status = 'pending', attempt = attempt + 1, last_error = ?2
             WHERE local_id = ?1",
            params![local_id.to_string(), error],
        )?;
        Ok(())
    }

    /// Remove an item after confirmed remote persistence.
    pub fn outbox_remove(&self, local_id: &LocalId) -> Result<bool> {
        let affected = self.lock()?.execute(
            "DELETE FROM outbox WHERE local_id = ?1",
            params![local_id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Number of queued items (any status).
    pub fn outbox_len(&self) -> Result<u32> {
        let count: u32 =
            self.lock()?
                .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Reset any `sending` rows back to `pending`.
    ///
    /// Called once at session start: a crash mid-drain leaves rows marked
    /// `sending` that no drain owns anymore.
    pub fn outbox_recover_stuck(&self) -> Result<u32> {
        let affected = self.lock()?.execute(
            "UPDATE outbox SET status = 'pending' WHERE status = 'sending'",
            [],
        )?;
        Ok(affected as u32)
    }
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueItem> {
    let local_id_str: String = row.get(0)?;
    let payload: String = row.get(1)?;
    let status_str: String = row.get(2)?;
    let attempt: u32 = row.get(3)?;
    let enqueued_str: String = row.get(4)?;
    let last_error: Option<String> = row.get(5)?;

    let local_id = LocalId::parse(&local_id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let message: Message = serde_json::from_str(&payload).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let status = QueueItemStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown outbox status '{status_str}'").into(),
        )
    })?;

    let enqueued_at = crate::users::parse_ts(&enqueued_str, 4)?;

    Ok(QueueItem {
        local_id,
        message,
        status,
        attempt,
        enqueued_at,
        last_error,
    })
}

/// Build a fresh `Pending` queue item for `message`.
pub fn new_queue_item(message: Message) -> Result<QueueItem> {
    let local_id = message.local_id.clone().ok_or(StoreError::NotFound)?;
    Ok(QueueItem {
        local_id,
        message,
        status: QueueItemStatus::Pending,
        attempt: 0,
        enqueued_at: Utc::now(),
        last_error: None,
    })
}
