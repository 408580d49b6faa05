//! Remote store contract.
//!
//! The remote is an external collaborator: a document store offering
//! path-scoped CRUD plus change subscriptions, with field-level
//! last-write-wins semantics and no multi-path transactions.  Cross-entity
//! atomicity is therefore the sync engine's responsibility, never assumed
//! from the remote.
//!
//! Subscriptions follow the channel idiom used throughout the codebase:
//! the caller passes the sender half of an mpsc channel and receives a
//! [`Subscription`] disposer.  Dropping (or cancelling) the disposer
//! detaches the feed; callers must do so on logout so no callback writes to
//! a torn-down store.

use std::collections::HashMap;

use async_trait::async_trait;
use palaver_shared::{
    Chat, ChatId, Message, MessageId, NetworkError, ReceiptState, RemoteError, Uid, User,
};
use thiserror::Error;
use tokio::sync::mpsc;

/// Failure of a remote store call: either the transport or the store
/// itself.
#[derive(Error, Debug, Clone)]
pub enum RemoteStoreError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

pub type RemoteResult<T> = std::result::Result<T, RemoteStoreError>;

/// Disposer handle for an active subscription.
///
/// The feed stays attached until the handle is dropped or
/// [`cancel`](Subscription::cancel)led.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription that needs no teardown.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Detach the feed explicitly.  Equivalent to dropping the handle.
    pub fn cancel(mut self) {
        if let Some(f) = self.cancel.take() {
            f();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.cancel.take() {
            f();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Contract implemented by the authoritative remote store.
///
/// All writes are field-level last-write-wins.  `send_message` must be
/// idempotent on the payload's `local_id`: replaying a send whose response
/// was lost returns the previously assigned id instead of storing a
/// duplicate.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    // -- users -------------------------------------------------------------

    async fn get_user(&self, uid: &Uid) -> RemoteResult<User>;

    async fn put_user(&self, user: &User) -> RemoteResult<()>;

    /// Subscribe to one user's document (presence, profile edits).
    async fn subscribe_user(
        &self,
        uid: &Uid,
        feed: mpsc::Sender<User>,
    ) -> RemoteResult<Subscription>;

    // -- chats -------------------------------------------------------------

    async fn get_chat(&self, chat_id: &ChatId) -> RemoteResult<Chat>;

    /// Create a chat document.
    async fn put_chat(&self, chat: &Chat) -> RemoteResult<()>;

    /// Field-level update of an existing chat document (last-write-wins per
    /// field on the remote side).
    async fn update_chat(&self, chat: &Chat) -> RemoteResult<()>;

    /// All chats the user participates in.
    async fn get_user_chats(&self, uid: &Uid) -> RemoteResult<Vec<Chat>>;

    /// Subscribe to the user's chat list.  Each emission carries the full
    /// current list.
    async fn subscribe_user_chats(
        &self,
        uid: &Uid,
        feed: mpsc::Sender<Vec<Chat>>,
    ) -> RemoteResult<Subscription>;

    // -- messages ----------------------------------------------------------

    /// Persist an outbound message and return its remote-assigned id.
    async fn send_message(&self, message: &Message) -> RemoteResult<MessageId>;

    /// Subscribe to new and updated messages in one chat.
    async fn subscribe_messages(
        &self,
        chat_id: &ChatId,
        feed: mpsc::Sender<Message>,
    ) -> RemoteResult<Subscription>;

    // -- delivery receipts -------------------------------------------------

    async fn mark_delivered(
        &self,
        message_id: &MessageId,
        chat_id: &ChatId,
        uid: &Uid,
    ) -> RemoteResult<()>;

    async fn mark_read(
        &self,
        message_id: &MessageId,
        chat_id: &ChatId,
        uid: &Uid,
    ) -> RemoteResult<()>;

    /// Authoritative per-recipient delivery state for one message.
    async fn get_delivery_state(
        &self,
        message_id: &MessageId,
        chat_id: &ChatId,
    ) -> RemoteResult<HashMap<Uid, ReceiptState>>;
}
