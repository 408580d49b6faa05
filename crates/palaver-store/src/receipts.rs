//! CRUD operations for per-recipient delivery receipts.
//!
//! Receipt writes bypass the main entity sync path (they arrive through
//! `mark_delivered` / `mark_read` calls), which is why the display status is
//! derived on read instead of stored.

use std::collections::HashMap;

use palaver_shared::{MessageId, ReceiptState, Uid};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Record a delivery acknowledgement from one recipient.
    pub fn mark_receipt_delivered(&self, message_id: &MessageId, uid: &Uid) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO message_receipts (message_id, user_id, delivered, read)
             VALUES (?1, ?2, 1, 0)
             ON CONFLICT(message_id, user_id) DO UPDATE SET delivered = 1",
            params![message_id.as_str(), uid.as_str()],
        )?;
        Ok(())
    }

    /// Record a read acknowledgement.  Read implies delivered.
    pub fn mark_receipt_read(&self, message_id: &MessageId, uid: &Uid) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO message_receipts (message_id, user_id, delivered, read)
             VALUES (?1, ?2, 1, 1)
             ON CONFLICT(message_id, user_id) DO UPDATE SET delivered = 1, read = 1",
            params![message_id.as_str(), uid.as_str()],
        )?;
        Ok(())
    }

    /// Overwrite the receipt rows for a message with the authoritative
    /// remote delivery state (remote wins, no merge).
    pub fn replace_receipts(
        &self,
        message_id: &MessageId,
        state: &HashMap<Uid, ReceiptState>,
    ) -> Result<()> {
        self.with_transaction(|tx| {
            tx.execute(
                "DELETE FROM message_receipts WHERE message_id = ?1",
                params![message_id.as_str()],
            )?;
            for (uid, receipt) in state {
                tx.execute(
                    "INSERT INTO message_receipts (message_id, user_id, delivered, read)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        message_id.as_str(),
                        uid.as_str(),
                        receipt.delivered || receipt.read,
                        receipt.read,
                    ],
                )?;
            }
            Ok(())
        })
    }

    /// Fetch the receipt map for a message.
    pub fn get_receipts(&self, message_id: &MessageId) -> Result<HashMap<Uid, ReceiptState>> {
        let guard = self.lock()?;
        let mut stmt = guard.prepare(
            "SELECT user_id, delivered, read FROM message_receipts WHERE message_id = ?1",
        )?;
        let rows = stmt.query_map(params![message_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, bool>(1)?,
                row.get::<_, bool>(2)?,
            ))
        })?;

        let mut receipts = HashMap::new();
        for row in rows {
            let (uid, delivered, read) = row.map_err(StoreError::Sqlite)?;
            receipts.insert(Uid::new(uid), ReceiptState { delivered, read });
        }
        Ok(receipts)
    }
}
