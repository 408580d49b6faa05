//! CRUD operations for [`User`] records.

use chrono::{DateTime, Utc};
use palaver_shared::{Uid, User};
use rusqlite::params;

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Insert or fully overwrite a user row.
    ///
    /// The remote store is the source of truth, so conflicts replace every
    /// field ("last pulled remote write wins") rather than merging.
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.lock()?.execute(
            "INSERT INTO users (uid, email, display_name, created_at, last_seen, is_online, fcm_token)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(uid) DO UPDATE SET
                 email        = excluded.email,
                 display_name = excluded.display_name,
                 created_at   = excluded.created_at,
                 last_seen    = excluded.last_seen,
                 is_online    = excluded.is_online,
                 fcm_token    = excluded.fcm_token",
            params![
                user.uid.as_str(),
                user.email,
                user.display_name,
                user.created_at.to_rfc3339(),
                user.last_seen.to_rfc3339(),
                user.is_online,
                user.fcm_token,
            ],
        )?;
        Ok(())
    }

    /// Fetch a single user by uid.
    pub fn get_user(&self, uid: &Uid) -> Result<User> {
        self.lock()?
            .query_row(
                "SELECT uid, email, display_name, created_at, last_seen, is_online, fcm_token
                 FROM users WHERE uid = ?1",
                params![uid.as_str()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Whether a user row exists locally.
    pub fn user_exists(&self, uid: &Uid) -> Result<bool> {
        let exists = self.lock()?.query_row(
            "SELECT 1 FROM users WHERE uid = ?1",
            params![uid.as_str()],
            |_| Ok(()),
        );
        match exists {
            Ok(()) => Ok(true),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// List every cached user, ordered by display name.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let guard = self.lock()?;
        let mut stmt = guard.prepare(
            "SELECT uid, email, display_name, created_at, last_seen, is_online, fcm_token
             FROM users ORDER BY display_name ASC",
        )?;
        let rows = stmt.query_map([], row_to_user)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }
}

/// Map a `rusqlite::Row` to a [`User`].
pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let uid: String = row.get(0)?;
    let email: String = row.get(1)?;
    let display_name: String = row.get(2)?;
    let created_str: String = row.get(3)?;
    let last_seen_str: String = row.get(4)?;
    let is_online: bool = row.get(5)?;
    let fcm_token: Option<String> = row.get(6)?;

    let created_at = parse_ts(&created_str, 3)?;
    let last_seen = parse_ts(&last_seen_str, 4)?;

    Ok(User {
        uid: Uid::new(uid),
        email,
        display_name,
        created_at,
        last_seen,
        is_online,
        fcm_token,
    })
}

pub(crate) fn parse_ts(s: &str, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
        })
}
