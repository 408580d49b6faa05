//! Offline outbound queue.
//!
//! Outbound messages that could not be confirmed immediately live in the
//! persistent `outbox` table and are replayed in enqueue order when a drain
//! trigger fires: app start while online, the offline->online transition,
//! or a fresh enqueue while online.
//!
//! There is no backoff loop inside a drain pass.  A failed item stays
//! pending with its attempt counter bumped, and the *next trigger* retries
//! it; this keeps the UI responsive and leaves retry cadence to the
//! connectivity monitor.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use palaver_shared::{LocalId, Message};
use palaver_store::{outbox::new_queue_item, Database};
use tracing::{debug, info, warn};

use crate::connectivity::ConnectivityMonitor;
use crate::engine::SyncEngine;
use crate::error::Result;
use crate::remote::RemoteStore;

/// Result of one [`OutboundQueue::drain`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Another drain pass was already running; this call was a no-op.
    AlreadyDraining,
    /// Every pending item was attempted.
    Drained { sent: u32, failed: u32 },
    /// Stopped early: connectivity was lost or a send hit a network error.
    /// Remaining items stay pending for the next trigger.
    Interrupted { sent: u32, failed: u32 },
}

/// Persistent FIFO of not-yet-confirmed outbound messages.
pub struct OutboundQueue<R: RemoteStore> {
    store: Database,
    engine: SyncEngine<R>,
    connectivity: ConnectivityMonitor,
    draining: Arc<AtomicBool>,
}

impl<R: RemoteStore> Clone for OutboundQueue<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            engine: self.engine.clone(),
            connectivity: self.connectivity.clone(),
            draining: Arc::clone(&self.draining),
        }
    }
}

/// Resets the single-flight flag when a drain pass ends, on every exit
/// path including errors.
struct DrainGuard(Arc<AtomicBool>);

impl Drop for DrainGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<R: RemoteStore> OutboundQueue<R> {
    pub fn new(store: Database, engine: SyncEngine<R>, connectivity: ConnectivityMonitor) -> Self {
        Self {
            store,
            engine,
            connectivity,
            draining: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Queue an outbound message and write its optimistic local row.
    ///
    /// `local_id` is the idempotency key: enqueueing the same message twice
    /// updates the stored item in place.  When currently online, a drain is
    /// attempted immediately so a transient single-message failure does not
    /// wait for the next reconnect.
    pub async fn enqueue(&self, message: Message) -> Result<()> {
        let item = new_queue_item(message.clone())?;

        self.store.insert_local_message(&message)?;
        self.store.outbox_put(&item)?;
        info!(local_id = %item.local_id, chat = %message.chat_id, "message enqueued");

        if self.connectivity.is_online() {
            self.drain().await?;
        }
        Ok(())
    }

    /// Replay pending items in enqueue order.
    ///
    /// Single-flight: the flag is swapped before the first await, so of any
    /// number of concurrent callers exactly one runs the pass and the rest
    /// return [`DrainOutcome::AlreadyDraining`] immediately.
    pub async fn drain(&self) -> Result<DrainOutcome> {
        if self.draining.swap(true, Ordering::AcqRel) {
            debug!("drain already in progress; skipping");
            return Ok(DrainOutcome::AlreadyDraining);
        }
        let _guard = DrainGuard(Arc::clone(&self.draining));

        // No other drain is running, so any row still marked `sending` is a
        // leftover from an earlier aborted pass; give it back to this one.
        self.store.outbox_recover_stuck()?;

        let mut sent = 0u32;
        let mut failed = 0u32;
        // Items attempted during this pass.  Keeps the refetch loop (which
        // picks up messages enqueued mid-drain) from re-sending an item
        // that already failed this pass.
        let mut attempted: HashSet<LocalId> = HashSet::new();

        loop {
            if !self.connectivity.is_online() {
                info!(sent, failed, "offline; stopping drain");
                return Ok(DrainOutcome::Interrupted { sent, failed });
            }

            let pending: Vec<_> = self
                .store
                .outbox_pending()?
                .into_iter()
                .filter(|item| !attempted.contains(&item.local_id))
                .collect();
            if pending.is_empty() {
                break;
            }

            for item in pending {
                if !self.connectivity.is_online() {
                    info!(sent, failed, "connectivity lost mid-drain; stopping");
                    return Ok(DrainOutcome::Interrupted { sent, failed });
                }

                attempted.insert(item.local_id.clone());
                self.store.outbox_mark_sending(&item.local_id)?;

                match self.engine.push_message(&item.message).await {
                    Ok(id) => {
                        self.store.outbox_remove(&item.local_id)?;
                        sent += 1;
                        debug!(
                            local_id = %item.local_id,
                            msg_id = %id,
                            attempt = item.attempt + 1,
                            "queued message confirmed"
                        );
                    }
                    Err(e) if e.is_network() => {
                        // Transport is gone; nothing later in the queue can
                        // succeed either.  Leave everything pending for the
                        // next trigger.
                        self.store.outbox_mark_failed(&item.local_id, &e.to_string())?;
                        info!(local_id = %item.local_id, error = %e, "network failure mid-drain; will retry on next trigger");
                        return Ok(DrainOutcome::Interrupted { sent, failed: failed + 1 });
                    }
                    Err(e) => {
                        // The remote rejected this particular message.  Keep
                        // it queued (never dropped automatically) but do not
                        // let it wedge the items behind it.
                        self.store.outbox_mark_failed(&item.local_id, &e.to_string())?;
                        failed += 1;
                        warn!(local_id = %item.local_id, error = %e, "send rejected; leaving item queued");
                    }
                }
            }
        }

        if sent > 0 || failed > 0 {
            info!(sent, failed, "drain complete");
        }
        Ok(DrainOutcome::Drained { sent, failed })
    }

    /// Number of items still queued (any status).
    pub fn len(&self) -> Result<u32> {
        Ok(self.store.outbox_len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
