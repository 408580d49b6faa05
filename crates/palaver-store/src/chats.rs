//! CRUD operations for [`Chat`] records and their participant rows.
//!
//! A chat write always touches two tables (`chats` plus
//! `chat_participants`), so every mutation here runs inside
//! [`Database::with_transaction`].

use std::collections::HashMap;

use palaver_shared::{Chat, ChatId, ChatType, LastMessage, Uid};
use rusqlite::{params, Connection, OptionalExtension};

use crate::database::Database;
use crate::error::{FkTable, Result, StoreError};
use crate::users::parse_ts;

impl Database {
    /// Insert or fully overwrite a chat and its participant rows.
    ///
    /// Caller contract: every uid in `chat.participants` must already exist
    /// in the local `users` table (participant pre-sync).  A violation is
    /// reported as [`StoreError::ConstraintViolation`] naming the missing
    /// user so the sync engine can backfill it.
    pub fn upsert_chat(&self, chat: &Chat) -> Result<()> {
        let last_message = chat
            .last_message
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO chats (id, chat_type, name, created_at, last_message)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     chat_type    = excluded.chat_type,
                     name         = excluded.name,
                     created_at   = excluded.created_at,
                     last_message = excluded.last_message",
                params![
                    chat.id.as_str(),
                    chat.chat_type.as_str(),
                    chat.name,
                    chat.created_at.to_rfc3339(),
                    last_message,
                ],
            )?;

            // Remote wins: membership is replaced wholesale, not merged.
            tx.execute(
                "DELETE FROM chat_participants WHERE chat_id = ?1",
                params![chat.id.as_str()],
            )?;

            for (position, uid) in chat.participants.iter().enumerate() {
                let unread = chat.unread_counts.get(uid).copied().unwrap_or(0);
                let inserted = tx.execute(
                    "INSERT INTO chat_participants (chat_id, user_id, position, unread_count)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![chat.id.as_str(), uid.as_str(), position as i64, unread],
                );
                if let Err(e) = inserted {
                    if is_fk_violation(&e) {
                        return Err(StoreError::ConstraintViolation {
                            table: "chat_participants",
                            missing: FkTable::Users,
                            key: uid.to_string(),
                        });
                    }
                    return Err(StoreError::Sqlite(e));
                }
            }

            Ok(())
        })
    }

    /// Fetch a single chat with its ordered participant list.
    pub fn get_chat(&self, id: &ChatId) -> Result<Chat> {
        let guard = self.lock()?;
        get_chat_conn(&guard, id)?.ok_or(StoreError::NotFound)
    }

    /// Whether a chat row exists locally.
    pub fn chat_exists(&self, id: &ChatId) -> Result<bool> {
        let guard = self.lock()?;
        Ok(chat_exists_conn(&guard, id)?)
    }

    /// List every cached chat, newest first.
    pub fn list_chats(&self) -> Result<Vec<Chat>> {
        let ids: Vec<String> = {
            let guard = self.lock()?;
            let mut stmt =
                guard.prepare("SELECT id FROM chats ORDER BY created_at DESC")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        let mut chats = Vec::with_capacity(ids.len());
        for id in ids {
            chats.push(self.get_chat(&ChatId::new(id))?);
        }
        Ok(chats)
    }

    /// Zero the unread counter for one participant (the UI opened the chat).
    pub fn reset_unread(&self, chat_id: &ChatId, uid: &Uid) -> Result<()> {
        self.lock()?.execute(
            "UPDATE chat_participants SET unread_count = 0
             WHERE chat_id = ?1 AND user_id = ?2",
            params![chat_id.as_str(), uid.as_str()],
        )?;
        Ok(())
    }

    /// Display name for a chat: the stored name when present, otherwise the
    /// other participants' display names joined with ", ".
    pub fn chat_display_name(&self, chat_id: &ChatId, current_uid: &Uid) -> Result<String> {
        let guard = self.lock()?;

        let name: Option<String> = guard
            .query_row(
                "SELECT name FROM chats WHERE id = ?1",
                params![chat_id.as_str()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;

        if let Some(name) = name {
            return Ok(name);
        }

        let mut stmt = guard.prepare(
            "SELECT u.display_name
             FROM chat_participants p JOIN users u ON u.uid = p.user_id
             WHERE p.chat_id = ?1 AND p.user_id != ?2
             ORDER BY p.position ASC",
        )?;
        let rows = stmt.query_map(params![chat_id.as_str(), current_uid.as_str()], |row| {
            row.get::<_, String>(0)
        })?;
        let names = rows.collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(names.join(", "))
    }
}

/// Detect an SQLite foreign-key constraint failure specifically (other
/// constraint classes -- primary key, CHECK -- are not recoverable by
/// backfilling a dependency and must surface as-is).
pub(crate) fn is_fk_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

pub(crate) fn chat_exists_conn(conn: &Connection, id: &ChatId) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM chats WHERE id = ?1",
        params![id.as_str()],
        |_| Ok(()),
    )
    .optional()
    .map(|row| row.is_some())
}

pub(crate) fn get_chat_conn(conn: &Connection, id: &ChatId) -> Result<Option<Chat>> {
    let header = conn
        .query_row(
            "SELECT id, chat_type, name, created_at, last_message
             FROM chats WHERE id = ?1",
            params![id.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((id_str, type_str, name, created_str, last_json)) = header else {
        return Ok(None);
    };

    let chat_type = ChatType::parse(&type_str).ok_or_else(|| {
        StoreError::Migration(format!("unknown chat_type '{type_str}' in chats table"))
    })?;

    let last_message: Option<LastMessage> =
        last_json.as_deref().map(serde_json::from_str).transpose()?;

    let mut stmt = conn.prepare(
        "SELECT user_id, unread_count FROM chat_participants
         WHERE chat_id = ?1 ORDER BY position ASC",
    )?;
    let rows = stmt.query_map(params![id_str], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut participants = Vec::new();
    let mut unread_counts = HashMap::new();
    for row in rows {
        let (uid, unread) = row?;
        let uid = Uid::new(uid);
        if unread > 0 {
            unread_counts.insert(uid.clone(), unread as u32);
        }
        participants.push(uid);
    }

    Ok(Some(Chat {
        id: ChatId::new(id_str),
        chat_type,
        participants,
        name,
        created_at: parse_ts(&created_str, 3)?,
        last_message,
        unread_counts,
    }))
}
