//! Entity sync engine.
//!
//! Moves users, chats and messages between the remote store and the local
//! cache while preserving the dependency order **user before chat before
//! message** on every path: initial sync, realtime fan-out and the
//! queue-flush fallback.  Ordering is enforced by await sequencing, not
//! locks.
//!
//! Conflict policy: the remote is the source of truth.  Every local row
//! touched by a remote update is fully overwritten with the remote field
//! values; concurrent local edits are discarded once the remote version is
//! pulled.
//!
//! A failure syncing one entity never aborts its siblings: realtime loops
//! and `initial_sync` log the failure and keep going.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use palaver_shared::{Chat, ChatId, Message, MessageId, NetworkError, RemoteError, Uid, User};
use palaver_store::{Database, FkTable, StoreError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::receipts::ReceiptTracker;
use crate::remote::{RemoteResult, RemoteStore, Subscription};

/// Buffer size for subscription fan-out channels.
const CHANNEL_CAPACITY: usize = 16;

/// Handle for a running realtime sync loop.
///
/// Dropping (or [`cancel`](SyncHandle::cancel)ling) the handle detaches the
/// remote subscription and aborts the fan-out task, so no callback writes
/// to a torn-down store after logout.
pub struct SyncHandle {
    _subscription: Subscription,
    task: JoinHandle<()>,
}

impl SyncHandle {
    fn new(subscription: Subscription, task: JoinHandle<()>) -> Self {
        Self {
            _subscription: subscription,
            task,
        }
    }

    /// Stop the loop explicitly.  Equivalent to dropping the handle.
    pub fn cancel(self) {}
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Outcome counters for one `initial_sync` pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InitialSyncReport {
    pub synced: u32,
    pub failed: u32,
}

/// The sync core.  One instance per logged-in user, handles injected by the
/// session (never a hidden global, so tests run concurrent isolated
/// instances).
pub struct SyncEngine<R: RemoteStore> {
    store: Database,
    remote: Arc<R>,
    current_uid: Uid,
    remote_timeout: Duration,
}

impl<R: RemoteStore> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            remote: Arc::clone(&self.remote),
            current_uid: self.current_uid.clone(),
            remote_timeout: self.remote_timeout,
        }
    }
}

impl<R: RemoteStore> SyncEngine<R> {
    pub fn new(store: Database, remote: Arc<R>, current_uid: Uid, remote_timeout: Duration) -> Self {
        Self {
            store,
            remote,
            current_uid,
            remote_timeout,
        }
    }

    pub fn current_uid(&self) -> &Uid {
        &self.current_uid
    }

    /// Receipt tracker sharing this engine's handles.
    pub fn receipts(&self) -> ReceiptTracker<R> {
        ReceiptTracker::new(
            self.store.clone(),
            Arc::clone(&self.remote),
            self.current_uid.clone(),
        )
    }

    /// Bound a remote call so a hung request surfaces as a retryable
    /// network error instead of wedging its caller.
    async fn bounded<T>(&self, fut: impl Future<Output = RemoteResult<T>>) -> Result<T> {
        match tokio::time::timeout(self.remote_timeout, fut).await {
            Ok(outcome) => Ok(outcome?),
            Err(_) => Err(NetworkError::Timeout(self.remote_timeout.as_millis() as u64).into()),
        }
    }

    // -- leaf syncs --------------------------------------------------------

    /// Upsert one user row.  Idempotent, side effect only.
    pub fn sync_user_to_local(&self, user: &User) -> Result<()> {
        self.store.upsert_user(user)?;
        debug!(user = %user.uid, "user synced to local");
        Ok(())
    }

    /// Upsert one chat row plus its participant rows.
    ///
    /// Caller contract: every participant user row already exists locally.
    /// This function does not fetch participants itself; the callers below
    /// do the pre-sync.
    pub fn sync_chat_to_local(&self, chat: &Chat) -> Result<()> {
        self.store.upsert_chat(chat)?;
        debug!(chat = %chat.id, participants = chat.participants.len(), "chat synced to local");
        Ok(())
    }

    // -- composite syncs ---------------------------------------------------

    /// Sync every participant user, then the chat row.
    ///
    /// The current user is synced like any other participant: their own
    /// `chat_participants` row carries the same foreign key, so excluding
    /// self breaks the chat insert.  A participant whose user document no
    /// longer exists remotely is skipped and omitted from the local
    /// membership; the chat still syncs for the rest.
    pub async fn sync_chat_with_participants(&self, chat: &Chat) -> Result<()> {
        let mut missing: Vec<Uid> = Vec::new();

        for uid in &chat.participants {
            match self.bounded(self.remote.get_user(uid)).await {
                Ok(user) => self.sync_user_to_local(&user)?,
                Err(SyncError::Remote(RemoteError::NotFound)) => {
                    warn!(user = %uid, chat = %chat.id, "participant gone from remote; skipping");
                    missing.push(uid.clone());
                }
                Err(e) => return Err(e),
            }
        }

        if missing.is_empty() {
            return self.sync_chat_to_local(chat);
        }

        let mut trimmed = chat.clone();
        trimmed.participants.retain(|u| !missing.contains(u));
        trimmed.unread_counts.retain(|u, _| !missing.contains(u));
        self.sync_chat_to_local(&trimmed)
    }

    /// Login-time pull of every chat the user participates in.
    ///
    /// One corrupt chat must not block the rest: per-chat failures are
    /// logged and counted, never propagated.
    pub async fn initial_sync(&self) -> Result<InitialSyncReport> {
        let chats = self
            .bounded(self.remote.get_user_chats(&self.current_uid))
            .await?;

        let mut report = InitialSyncReport::default();
        for chat in &chats {
            match self.sync_chat_with_participants(chat).await {
                Ok(()) => report.synced += 1,
                Err(e) => {
                    warn!(chat = %chat.id, error = %e, "chat sync failed; continuing with remaining chats");
                    report.failed += 1;
                }
            }
        }

        info!(
            synced = report.synced,
            failed = report.failed,
            "initial sync complete"
        );
        Ok(report)
    }

    /// Subscribe to the remote chat list and fan each emission into local
    /// writes, participants first.
    pub async fn start_realtime_sync(&self) -> Result<SyncHandle> {
        let (tx, mut rx) = mpsc::channel::<Vec<Chat>>(CHANNEL_CAPACITY);
        let subscription = self
            .bounded(self.remote.subscribe_user_chats(&self.current_uid, tx))
            .await?;

        let engine = self.clone();
        let task = tokio::spawn(async move {
            while let Some(chats) = rx.recv().await {
                for chat in chats {
                    if let Err(e) = engine.sync_chat_with_participants(&chat).await {
                        warn!(chat = %chat.id, error = %e, "realtime chat sync failed");
                    }
                }
            }
        });

        Ok(SyncHandle::new(subscription, task))
    }

    /// Subscribe to one chat's message feed.
    ///
    /// Each incoming message is synced locally; messages addressed to the
    /// current user are acknowledged with a delivery receipt.
    pub async fn start_message_sync(&self, chat_id: &ChatId) -> Result<SyncHandle> {
        let (tx, mut rx) = mpsc::channel::<Message>(CHANNEL_CAPACITY);
        let subscription = self
            .bounded(self.remote.subscribe_messages(chat_id, tx))
            .await?;

        let engine = self.clone();
        let task = tokio::spawn(async move {
            let receipts = engine.receipts();
            while let Some(message) = rx.recv().await {
                if let Err(e) = engine.sync_message_to_local(&message).await {
                    warn!(chat = %message.chat_id, error = %e, "message sync failed");
                    continue;
                }
                let ours = message.sender_id == engine.current_uid;
                let already_acked = message.delivered_to.contains(&engine.current_uid);
                if let (false, false, Some(id)) = (ours, already_acked, &message.id) {
                    if let Err(e) = receipts.mark_delivered(id, &message.chat_id).await {
                        warn!(msg_id = %id, error = %e, "delivery receipt failed");
                    }
                }
            }
        });

        Ok(SyncHandle::new(subscription, task))
    }

    /// Subscribe to one user's document (presence, profile edits) and
    /// overwrite the local row on every emission.
    pub async fn start_user_sync(&self, uid: &Uid) -> Result<SyncHandle> {
        let (tx, mut rx) = mpsc::channel::<User>(CHANNEL_CAPACITY);
        let subscription = self.bounded(self.remote.subscribe_user(uid, tx)).await?;

        let engine = self.clone();
        let task = tokio::spawn(async move {
            while let Some(user) = rx.recv().await {
                if let Err(e) = engine.sync_user_to_local(&user) {
                    warn!(user = %user.uid, error = %e, "user sync failed");
                }
            }
        });

        Ok(SyncHandle::new(subscription, task))
    }

    /// Write a remote message into the local cache, lazily backfilling its
    /// chat and sender when they are not known yet.
    ///
    /// A message can arrive for a chat the client has never seen (new
    /// conversation started elsewhere), and its sender is not guaranteed to
    /// be a fetched participant on every path, so both dependencies are
    /// re-derived from remote on demand.  After a constraint failure the
    /// insert is retried exactly once; a second failure propagates to the
    /// caller, which logs it and moves on.
    pub async fn sync_message_to_local(&self, message: &Message) -> Result<()> {
        if !self.store.chat_exists(&message.chat_id)? {
            self.backfill_chat(&message.chat_id).await?;
            self.ensure_user(&message.sender_id).await?;
        }

        match self.store.upsert_message_from_remote(message) {
            Ok(()) => Ok(()),
            Err(e) => {
                let retry = match e.missing_dependency() {
                    Some(FkTable::Chats) => {
                        debug!(chat = %message.chat_id, "message beat its chat; backfilling");
                        self.backfill_chat(&message.chat_id).await?;
                        self.ensure_user(&message.sender_id).await?;
                        true
                    }
                    Some(FkTable::Users) => {
                        debug!(user = %message.sender_id, "message beat its sender; backfilling");
                        self.ensure_user(&message.sender_id).await?;
                        true
                    }
                    _ => false,
                };
                if !retry {
                    return Err(e.into());
                }
                self.store.upsert_message_from_remote(message)?;
                Ok(())
            }
        }
    }

    /// Send one outbound message and attach the confirmed remote id to the
    /// optimistic local row.  Used by the queue drain.
    pub async fn push_message(&self, message: &Message) -> Result<MessageId> {
        let id = self.bounded(self.remote.send_message(message)).await?;

        if let Some(local_id) = &message.local_id {
            match self.store.attach_remote_id(local_id, &id) {
                Ok(()) => {}
                Err(StoreError::NotFound) => {
                    // Confirmed remotely but the optimistic row is gone.
                    // Keep the confirmation; realtime sync restores the row.
                    warn!(local_id = %local_id, msg_id = %id, "optimistic row missing after send");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(id)
    }

    async fn backfill_chat(&self, chat_id: &ChatId) -> Result<()> {
        let chat = self.bounded(self.remote.get_chat(chat_id)).await?;
        self.sync_chat_with_participants(&chat).await
    }

    async fn ensure_user(&self, uid: &Uid) -> Result<()> {
        if self.store.user_exists(uid)? {
            return Ok(());
        }
        let user = self.bounded(self.remote.get_user(uid)).await?;
        self.sync_user_to_local(&user)
    }
}
