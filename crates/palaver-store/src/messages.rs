//! CRUD operations for [`Message`] records.
//!
//! Message writes are the FK-sensitive path: a row must never land before
//! its chat and sender exist locally.  Violations are reported as
//! [`StoreError::ConstraintViolation`] naming the absent parent so the sync
//! engine can backfill and retry.

use chrono::{DateTime, Utc};
use palaver_shared::{
    ChatId, ImageMetadata, LastMessage, LocalId, Message, MessageId, MessageType, Uid,
};
use rusqlite::{params, OptionalExtension, Transaction};

use crate::chats::{chat_exists_conn, is_fk_violation};
use crate::database::Database;
use crate::error::{FkTable, Result, StoreError};
use crate::users::parse_ts;

impl Database {
    /// Insert an optimistic local message (no remote id yet).
    ///
    /// Called by the outbound queue at enqueue time.  Re-enqueueing the same
    /// `local_id` overwrites the existing row instead of duplicating.
    pub fn insert_local_message(&self, message: &Message) -> Result<()> {
        let local_id = message
            .local_id
            .as_ref()
            .ok_or(StoreError::NotFound)?
            .to_string();
        let metadata = encode_metadata(message)?;

        self.with_transaction(|tx| {
            let inserted = tx.execute(
                "INSERT INTO messages (id, local_id, chat_id, sender_id, msg_type, content, timestamp, metadata)
                 VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(local_id) DO UPDATE SET
                     chat_id   = excluded.chat_id,
                     sender_id = excluded.sender_id,
                     msg_type  = excluded.msg_type,
                     content   = excluded.content,
                     timestamp = excluded.timestamp,
                     metadata  = excluded.metadata",
                params![
                    local_id,
                    message.chat_id.as_str(),
                    message.sender_id.as_str(),
                    message.msg_type.as_str(),
                    message.content,
                    message.timestamp.to_rfc3339(),
                    metadata,
                ],
            );
            map_message_insert_err(tx, message, inserted)?;
            bump_chat_preview(tx, message)?;
            Ok(())
        })
    }

    /// Insert or fully overwrite a message pulled from the remote store.
    ///
    /// A payload whose `local_id` matches an existing optimistic row updates
    /// that row in place (attaching the remote id) instead of inserting a
    /// duplicate.  Newly inserted rows bump the owning chat's last-message
    /// preview and the recipients' unread counters.
    pub fn upsert_message_from_remote(&self, message: &Message) -> Result<()> {
        let remote_id = message
            .id
            .as_ref()
            .ok_or(StoreError::NotFound)?
            .to_string();
        let local_id = message.local_id.as_ref().map(LocalId::to_string);
        let metadata = encode_metadata(message)?;

        self.with_transaction(|tx| {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT rowid FROM messages WHERE id = ?1
                     OR (?2 IS NOT NULL AND local_id = ?2)",
                    params![remote_id, local_id],
                    |row| row.get(0),
                )
                .optional()?;

            match existing {
                Some(rowid) => {
                    // Remote wins: overwrite every field of the known row.
                    tx.execute(
                        "UPDATE messages SET
                             id = ?1, local_id = COALESCE(?2, local_id),
                             chat_id = ?3, sender_id = ?4, msg_type = ?5,
                             content = ?6, timestamp = ?7, metadata = ?8
                         WHERE rowid = ?9",
                        params![
                            remote_id,
                            local_id,
                            message.chat_id.as_str(),
                            message.sender_id.as_str(),
                            message.msg_type.as_str(),
                            message.content,
                            message.timestamp.to_rfc3339(),
                            metadata,
                            rowid,
                        ],
                    )?;
                }
                None => {
                    let inserted = tx.execute(
                        "INSERT INTO messages (id, local_id, chat_id, sender_id, msg_type, content, timestamp, metadata)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            remote_id,
                            local_id,
                            message.chat_id.as_str(),
                            message.sender_id.as_str(),
                            message.msg_type.as_str(),
                            message.content,
                            message.timestamp.to_rfc3339(),
                            metadata,
                        ],
                    );
                    map_message_insert_err(tx, message, inserted)?;
                    bump_chat_preview(tx, message)?;
                    tx.execute(
                        "UPDATE chat_participants SET unread_count = unread_count + 1
                         WHERE chat_id = ?1 AND user_id != ?2",
                        params![message.chat_id.as_str(), message.sender_id.as_str()],
                    )?;
                }
            }

            replace_receipts_tx(tx, &remote_id, message)?;
            Ok(())
        })
    }

    /// Attach the remote-assigned id to an optimistic row after a confirmed
    /// send.  The derived status flips from `Sending` to `Sent` on the next
    /// read.
    pub fn attach_remote_id(&self, local_id: &LocalId, id: &MessageId) -> Result<()> {
        let changed = self.lock()?.execute(
            "UPDATE messages SET id = ?1 WHERE local_id = ?2",
            params![id.as_str(), local_id.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Fetch a message by remote id, receipts included.
    pub fn get_message(&self, id: &MessageId) -> Result<Message> {
        let guard = self.lock()?;
        let row = guard
            .query_row(
                "SELECT id, local_id, chat_id, sender_id, msg_type, content, timestamp, metadata
                 FROM messages WHERE id = ?1",
                params![id.as_str()],
                row_to_message,
            )
            .optional()?;
        let mut message = row.ok_or(StoreError::NotFound)?;
        hydrate_receipts(&guard, &mut message)?;
        Ok(message)
    }

    /// Fetch a message by client correlation id, receipts included.
    pub fn get_message_by_local_id(&self, local_id: &LocalId) -> Result<Message> {
        let guard = self.lock()?;
        let row = guard
            .query_row(
                "SELECT id, local_id, chat_id, sender_id, msg_type, content, timestamp, metadata
                 FROM messages WHERE local_id = ?1",
                params![local_id.to_string()],
                row_to_message,
            )
            .optional()?;
        let mut message = row.ok_or(StoreError::NotFound)?;
        hydrate_receipts(&guard, &mut message)?;
        Ok(message)
    }

    /// Page through a chat's messages, newest first.
    pub fn get_messages(&self, chat_id: &ChatId, limit: u32, offset: u32) -> Result<Vec<Message>> {
        let guard = self.lock()?;
        let mut stmt = guard.prepare(
            "SELECT id, local_id, chat_id, sender_id, msg_type, content, timestamp, metadata
             FROM messages
             WHERE chat_id = ?1
             ORDER BY timestamp DESC
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![chat_id.as_str(), limit, offset], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            let mut message = row?;
            hydrate_receipts(&guard, &mut message)?;
            messages.push(message);
        }
        Ok(messages)
    }
}

fn encode_metadata(message: &Message) -> Result<Option<String>> {
    Ok(message
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?)
}

/// Translate a failed message insert into an ordering-aware diagnostic by
/// probing which parent row is absent.
fn map_message_insert_err(
    tx: &Transaction<'_>,
    message: &Message,
    outcome: rusqlite::Result<usize>,
) -> Result<()> {
    match outcome {
        Ok(_) => Ok(()),
        Err(e) if is_fk_violation(&e) => {
            if !chat_exists_conn(tx, &message.chat_id)? {
                return Err(StoreError::ConstraintViolation {
                    table: "messages",
                    missing: FkTable::Chats,
                    key: message.chat_id.to_string(),
                });
            }
            Err(StoreError::ConstraintViolation {
                table: "messages",
                missing: FkTable::Users,
                key: message.sender_id.to_string(),
            })
        }
        Err(e) => Err(StoreError::Sqlite(e)),
    }
}

/// Refresh the owning chat's denormalized last-message preview, keeping the
/// newer of the stored preview and `message`.
fn bump_chat_preview(tx: &Transaction<'_>, message: &Message) -> Result<()> {
    let stored: Option<Option<String>> = tx
        .query_row(
            "SELECT last_message FROM chats WHERE id = ?1",
            params![message.chat_id.as_str()],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(existing_json) = stored.flatten() {
        let existing: LastMessage = serde_json::from_str(&existing_json)?;
        if existing.timestamp > message.timestamp {
            return Ok(());
        }
    }

    let preview = LastMessage {
        content: message.content.clone(),
        sender_id: message.sender_id.clone(),
        timestamp: message.timestamp,
        msg_type: message.msg_type,
    };
    tx.execute(
        "UPDATE chats SET last_message = ?1 WHERE id = ?2",
        params![serde_json::to_string(&preview)?, message.chat_id.as_str()],
    )?;
    Ok(())
}

/// Overwrite the receipt rows for `message` from its remote payload.
fn replace_receipts_tx(tx: &Transaction<'_>, remote_id: &str, message: &Message) -> Result<()> {
    tx.execute(
        "DELETE FROM message_receipts WHERE message_id = ?1",
        params![remote_id],
    )?;
    for uid in &message.delivered_to {
        tx.execute(
            "INSERT INTO message_receipts (message_id, user_id, delivered, read)
             VALUES (?1, ?2, 1, 0)
             ON CONFLICT(message_id, user_id) DO UPDATE SET delivered = 1",
            params![remote_id, uid.as_str()],
        )?;
    }
    for uid in &message.read_by {
        tx.execute(
            "INSERT INTO message_receipts (message_id, user_id, delivered, read)
             VALUES (?1, ?2, 1, 1)
             ON CONFLICT(message_id, user_id) DO UPDATE SET delivered = 1, read = 1",
            params![remote_id, uid.as_str()],
        )?;
    }
    Ok(())
}

fn hydrate_receipts(conn: &rusqlite::Connection, message: &mut Message) -> Result<()> {
    let Some(id) = message.id.as_ref() else {
        return Ok(());
    };
    let mut stmt = conn.prepare(
        "SELECT user_id, delivered, read FROM message_receipts
         WHERE message_id = ?1 ORDER BY user_id ASC",
    )?;
    let rows = stmt.query_map(params![id.as_str()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, bool>(1)?,
            row.get::<_, bool>(2)?,
        ))
    })?;

    message.delivered_to.clear();
    message.read_by.clear();
    for row in rows {
        let (uid, delivered, read) = row?;
        if delivered {
            message.delivered_to.push(Uid::new(uid.clone()));
        }
        if read {
            message.read_by.push(Uid::new(uid));
        }
    }
    Ok(())
}

/// Map a `rusqlite::Row` to a [`Message`] (receipts hydrated separately).
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: Option<String> = row.get(0)?;
    let local_id_str: Option<String> = row.get(1)?;
    let chat_id: String = row.get(2)?;
    let sender_id: String = row.get(3)?;
    let type_str: String = row.get(4)?;
    let content: String = row.get(5)?;
    let ts_str: String = row.get(6)?;
    let metadata_json: Option<String> = row.get(7)?;

    let local_id = local_id_str
        .map(|s| LocalId::parse(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let msg_type = MessageType::parse(&type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown msg_type '{type_str}'").into(),
        )
    })?;

    let timestamp: DateTime<Utc> = parse_ts(&ts_str, 6)?;

    let metadata: Option<ImageMetadata> = metadata_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id: id.map(MessageId::new),
        chat_id: ChatId::new(chat_id),
        sender_id: Uid::new(sender_id),
        msg_type,
        content,
        timestamp,
        local_id,
        delivered_to: Vec::new(),
        read_by: Vec::new(),
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use palaver_shared::{Chat, ChatType, User};
    use std::collections::HashMap;

    fn seeded_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        for uid in ["u1", "u2"] {
            db.upsert_user(&User {
                uid: Uid::new(uid),
                email: format!("{uid}@example.com"),
                display_name: uid.into(),
                created_at: Utc::now(),
                last_seen: Utc::now(),
                is_online: false,
                fcm_token: None,
            })
            .unwrap();
        }
        db.upsert_chat(&Chat {
            id: ChatId::new("c1"),
            chat_type: ChatType::Direct,
            participants: vec![Uid::new("u1"), Uid::new("u2")],
            name: None,
            created_at: Utc::now(),
            last_message: None,
            unread_counts: HashMap::new(),
        })
        .unwrap();
        db
    }

    fn remote_message(id: &str, content: &str) -> Message {
        Message {
            id: Some(MessageId::new(id)),
            chat_id: ChatId::new("c1"),
            sender_id: Uid::new("u2"),
            msg_type: MessageType::Text,
            content: content.into(),
            timestamp: Utc::now(),
            local_id: None,
            delivered_to: vec![],
            read_by: vec![],
            metadata: None,
        }
    }

    #[test]
    fn remote_upsert_is_idempotent() {
        let db = seeded_db();
        let msg = remote_message("m1", "hello");
        db.upsert_message_from_remote(&msg).unwrap();
        db.upsert_message_from_remote(&msg).unwrap();

        let got = db.get_messages(&ChatId::new("c1"), 10, 0).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].content, "hello");

        // Unread bumped exactly once for the recipient.
        let chat = db.get_chat(&ChatId::new("c1")).unwrap();
        assert_eq!(chat.unread_counts.get(&Uid::new("u1")), Some(&1));
        assert_eq!(chat.unread_counts.get(&Uid::new("u2")), None);
    }

    #[test]
    fn missing_chat_is_diagnosed() {
        let db = seeded_db();
        let mut msg = remote_message("m1", "hi");
        msg.chat_id = ChatId::new("unknown-chat");

        let err = db.upsert_message_from_remote(&msg).unwrap_err();
        assert_eq!(err.missing_dependency(), Some(FkTable::Chats));
    }

    #[test]
    fn missing_sender_is_diagnosed() {
        let db = seeded_db();
        let mut msg = remote_message("m1", "hi");
        msg.sender_id = Uid::new("stranger");

        let err = db.upsert_message_from_remote(&msg).unwrap_err();
        assert_eq!(err.missing_dependency(), Some(FkTable::Users));
    }

    #[test]
    fn remote_payload_reconciles_optimistic_row() {
        let db = seeded_db();
        let local_id = LocalId::generate();

        let mut optimistic = remote_message("ignored", "on my way");
        optimistic.id = None;
        optimistic.sender_id = Uid::new("u1");
        optimistic.local_id = Some(local_id.clone());
        db.insert_local_message(&optimistic).unwrap();

        // The same message comes back through the realtime feed.
        let mut confirmed = optimistic.clone();
        confirmed.id = Some(MessageId::new("m9"));
        db.upsert_message_from_remote(&confirmed).unwrap();

        let got = db.get_messages(&ChatId::new("c1"), 10, 0).unwrap();
        assert_eq!(got.len(), 1, "no duplicate row for the same local_id");
        assert_eq!(got[0].id, Some(MessageId::new("m9")));
    }

    #[test]
    fn attach_remote_id_flips_row() {
        let db = seeded_db();
        let local_id = LocalId::generate();

        let mut msg = remote_message("ignored", "queued");
        msg.id = None;
        msg.sender_id = Uid::new("u1");
        msg.local_id = Some(local_id.clone());
        db.insert_local_message(&msg).unwrap();

        db.attach_remote_id(&local_id, &MessageId::new("m42")).unwrap();
        let got = db.get_message_by_local_id(&local_id).unwrap();
        assert_eq!(got.id, Some(MessageId::new("m42")));
    }

    #[test]
    fn preview_keeps_newest_message() {
        let db = seeded_db();
        let mut newer = remote_message("m2", "newer");
        newer.timestamp = Utc::now();
        let mut older = remote_message("m1", "older");
        older.timestamp = newer.timestamp - Duration::minutes(5);

        db.upsert_message_from_remote(&newer).unwrap();
        db.upsert_message_from_remote(&older).unwrap();

        let chat = db.get_chat(&ChatId::new("c1")).unwrap();
        assert_eq!(chat.last_message.unwrap().content, "newer");
    }
}
