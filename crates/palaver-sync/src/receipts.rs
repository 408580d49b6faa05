//! Delivery and read marking.
//!
//! Receipt writes go remote-first, then mirror into the local
//! `message_receipts` table.  They bypass the entity sync path entirely,
//! which is why the display status is derived on read
//! ([`palaver_shared::delivery_status`]) and never cached.

use std::sync::Arc;

use palaver_shared::{ChatId, MessageId, Uid};
use palaver_store::Database;
use tracing::debug;

use crate::error::Result;
use crate::remote::RemoteStore;

/// Marks messages delivered/read on behalf of the current user and keeps
/// the local receipt rows in step with the remote delivery state.
pub struct ReceiptTracker<R: RemoteStore> {
    store: Database,
    remote: Arc<R>,
    current_uid: Uid,
}

impl<R: RemoteStore> Clone for ReceiptTracker<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            remote: Arc::clone(&self.remote),
            current_uid: self.current_uid.clone(),
        }
    }
}

impl<R: RemoteStore> ReceiptTracker<R> {
    pub fn new(store: Database, remote: Arc<R>, current_uid: Uid) -> Self {
        Self {
            store,
            remote,
            current_uid,
        }
    }

    /// Acknowledge delivery of `message_id` as the current user.
    pub async fn mark_delivered(&self, message_id: &MessageId, chat_id: &ChatId) -> Result<()> {
        self.remote
            .mark_delivered(message_id, chat_id, &self.current_uid)
            .await?;
        self.store
            .mark_receipt_delivered(message_id, &self.current_uid)?;
        debug!(msg_id = %message_id, "marked delivered");
        Ok(())
    }

    /// Mark `message_id` read by the current user.  Read implies delivered.
    pub async fn mark_read(&self, message_id: &MessageId, chat_id: &ChatId) -> Result<()> {
        self.remote
            .mark_read(message_id, chat_id, &self.current_uid)
            .await?;
        self.store.mark_receipt_read(message_id, &self.current_uid)?;
        debug!(msg_id = %message_id, "marked read");
        Ok(())
    }

    /// Pull the authoritative delivery state for one message and overwrite
    /// the local receipt rows with it (remote wins, no merge).
    pub async fn refresh(&self, message_id: &MessageId, chat_id: &ChatId) -> Result<()> {
        let state = self.remote.get_delivery_state(message_id, chat_id).await?;
        self.store.replace_receipts(message_id, &state)?;
        Ok(())
    }
}
