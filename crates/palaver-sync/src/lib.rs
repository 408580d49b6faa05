//! # palaver-sync
//!
//! Bidirectional sync engine and offline outbound queue for the Palaver
//! messaging client.
//!
//! The crate keeps a local SQLite cache ([`palaver_store`]) in step with an
//! authoritative remote document store (the [`RemoteStore`] contract),
//! preserving the dependency order users -> chats -> messages on every
//! path, and persists outbound messages composed offline until they are
//! confirmed remotely.
//!
//! Consumers construct a [`Session`], which wires the pieces together:
//! initial sync at login, realtime fan-out of remote changes, and queue
//! draining on reconnect.  UI code reads only from the local store and
//! enqueues sends through the session.

pub mod connectivity;
pub mod engine;
pub mod queue;
pub mod receipts;
pub mod remote;
pub mod session;

mod error;

pub use connectivity::ConnectivityMonitor;
pub use engine::{InitialSyncReport, SyncEngine, SyncHandle};
pub use error::SyncError;
pub use queue::{DrainOutcome, OutboundQueue};
pub use receipts::ReceiptTracker;
pub use remote::{RemoteResult, RemoteStore, RemoteStoreError, Subscription};
pub use session::{Session, SessionConfig};
