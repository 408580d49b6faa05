//! # palaver-store
//!
//! Local relational cache for the Palaver messaging client, backed by
//! SQLite.
//!
//! The crate exposes a cloneable [`Database`] handle over a single shared
//! connection.  Schema creation runs through [`Database::init`], foreign
//! keys are enforced at the storage layer, and every multi-table write goes
//! through the transaction wrapper so concurrent async operations never
//! observe a partially-written chat.

pub mod chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod outbox;
pub mod receipts;
pub mod users;

mod error;

pub use database::Database;
pub use error::{FkTable, StoreError};
