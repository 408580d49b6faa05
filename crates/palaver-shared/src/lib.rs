//! # palaver-shared
//!
//! Domain types shared between the local store, the sync engine and the UI
//! layer: id newtypes, entity models, the delivery-status derivation and the
//! cross-layer error taxonomy.

pub mod error;
pub mod models;
pub mod status;
pub mod types;

pub use error::{NetworkError, RemoteError};
pub use models::*;
pub use status::delivery_status;
pub use types::{ChatId, LocalId, MessageId, Uid};
