//! Session wiring.
//!
//! A [`Session`] is the embedding application's entry point: it owns the
//! composed engine, queue, connectivity monitor and receipt tracker for one
//! logged-in user, wires the three drain triggers, and tears every
//! subscription down on shutdown so no callback writes to a closed store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use palaver_shared::{ChatId, ImageMetadata, LocalId, Message, MessageType, Uid};
use palaver_store::Database;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::connectivity::ConnectivityMonitor;
use crate::engine::{SyncEngine, SyncHandle};
use crate::error::Result;
use crate::queue::OutboundQueue;
use crate::receipts::ReceiptTracker;
use crate::remote::{RemoteStore, Subscription};

/// Tunables for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound on any single remote call.  A hung request becomes a
    /// retryable network error instead of a stuck queue item.
    pub remote_timeout: Duration,
    /// Window a reachability transition must hold before it is reported.
    pub connectivity_debounce: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            remote_timeout: Duration::from_secs(10),
            connectivity_debounce: Duration::from_millis(500),
        }
    }
}

/// One logged-in user's sync runtime.
pub struct Session<R: RemoteStore> {
    store: Database,
    engine: SyncEngine<R>,
    queue: OutboundQueue<R>,
    connectivity: ConnectivityMonitor,
    receipts: ReceiptTracker<R>,
    handles: Mutex<Vec<SyncHandle>>,
    connectivity_sub: Mutex<Option<Subscription>>,
}

impl<R: RemoteStore> Session<R> {
    /// Initialize the store, pull the login-time snapshot, start realtime
    /// sync and wire the queue drain triggers.
    ///
    /// An offline login is not fatal: the cache serves reads and the outbox
    /// holds writes until reconnect.
    pub async fn start(
        config: SessionConfig,
        store: Database,
        remote: Arc<R>,
        reachability: watch::Receiver<bool>,
        current_uid: Uid,
    ) -> Result<Arc<Self>> {
        store.init()?;
        let rescued = store.outbox_recover_stuck()?;
        if rescued > 0 {
            info!(rescued, "recovered interrupted sends from previous session");
        }

        let connectivity = ConnectivityMonitor::new(reachability, config.connectivity_debounce);
        let engine = SyncEngine::new(
            store.clone(),
            remote,
            current_uid,
            config.remote_timeout,
        );
        let queue = OutboundQueue::new(store.clone(), engine.clone(), connectivity.clone());
        let receipts = engine.receipts();

        let session = Arc::new(Self {
            store,
            engine,
            queue,
            connectivity,
            receipts,
            handles: Mutex::new(Vec::new()),
            connectivity_sub: Mutex::new(None),
        });

        match session.engine.initial_sync().await {
            Ok(report) => info!(
                synced = report.synced,
                failed = report.failed,
                "login sync finished"
            ),
            Err(e) if e.is_network() => {
                warn!(error = %e, "initial sync deferred; starting offline")
            }
            Err(e) => return Err(e),
        }

        match session.engine.start_realtime_sync().await {
            Ok(handle) => session.handles.lock().push(handle),
            Err(e) if e.is_network() => {
                warn!(error = %e, "realtime sync unavailable; will rely on next login")
            }
            Err(e) => return Err(e),
        }

        // Drain triggers.  `subscribe` fires immediately with the current
        // state, which doubles as the app-start trigger: items persisted by
        // a previous session drain as soon as we are online.
        let sub = {
            let queue = session.queue.clone();
            session.connectivity.subscribe(move |online| {
                if online {
                    spawn_drain(queue.clone());
                }
            })
        };
        *session.connectivity_sub.lock() = Some(sub);

        Ok(session)
    }

    /// Build and enqueue an outbound message.
    ///
    /// Returns the client correlation id; the optimistic row is readable
    /// from the local store immediately, with derived status `Sending`
    /// until the send is confirmed.
    pub async fn send_message(
        &self,
        chat_id: ChatId,
        msg_type: MessageType,
        content: String,
        metadata: Option<ImageMetadata>,
    ) -> Result<LocalId> {
        let local_id = LocalId::generate();
        let message = Message {
            id: None,
            chat_id,
            sender_id: self.engine.current_uid().clone(),
            msg_type,
            content,
            timestamp: Utc::now(),
            local_id: Some(local_id.clone()),
            delivered_to: Vec::new(),
            read_by: Vec::new(),
            metadata,
        };
        self.queue.enqueue(message).await?;
        Ok(local_id)
    }

    /// Start the realtime message feed for one chat (the UI opened it).
    pub async fn watch_chat(&self, chat_id: &ChatId) -> Result<()> {
        let handle = self.engine.start_message_sync(chat_id).await?;
        self.handles.lock().push(handle);
        Ok(())
    }

    /// Start the presence/profile feed for one user.
    pub async fn watch_user(&self, uid: &Uid) -> Result<()> {
        let handle = self.engine.start_user_sync(uid).await?;
        self.handles.lock().push(handle);
        Ok(())
    }

    /// Zero the unread counter for the current user in `chat_id`.
    pub fn mark_chat_opened(&self, chat_id: &ChatId) -> Result<()> {
        self.store
            .reset_unread(chat_id, self.engine.current_uid())?;
        Ok(())
    }

    /// Local store handle.  UI code reads exclusively from here.
    pub fn store(&self) -> &Database {
        &self.store
    }

    pub fn engine(&self) -> &SyncEngine<R> {
        &self.engine
    }

    pub fn queue(&self) -> &OutboundQueue<R> {
        &self.queue
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn receipts(&self) -> &ReceiptTracker<R> {
        &self.receipts
    }

    /// Cancel every subscription and background loop.
    ///
    /// Idempotent; also runs on drop.  After shutdown no remote callback
    /// can reach the local store.
    pub fn shutdown(&self) {
        if let Some(sub) = self.connectivity_sub.lock().take() {
            sub.cancel();
        }
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            handle.cancel();
        }
        info!("session shut down");
    }
}

impl<R: RemoteStore> Drop for Session<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_drain<R: RemoteStore>(queue: OutboundQueue<R>) {
    tokio::spawn(async move {
        if let Err(e) = queue.drain().await {
            warn!(error = %e, "queue drain failed");
        }
    });
}
