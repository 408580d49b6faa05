//! Connectivity monitor.
//!
//! Wraps the platform's push-based reachability signal (surfaced to this
//! crate as a `watch::Receiver<bool>`) into a single subscribable boolean
//! with debounced transition callbacks.  No polling: a dedicated task owns
//! the debounce loop and fans transitions out to registered listeners.
//!
//! The point-in-time check fails open: once the platform side of the
//! channel is gone, `is_online` reports `true` so a dead reachability
//! feed never blocks sends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::remote::Subscription;

type Listener = Arc<dyn Fn(bool) + Send + Sync>;
type ListenerMap = Arc<Mutex<HashMap<u64, Listener>>>;

/// Cheaply cloneable handle over the reachability state.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

struct Inner {
    debounced: watch::Receiver<bool>,
    source_closed: Arc<AtomicBool>,
    listeners: ListenerMap,
    next_listener: AtomicU64,
    task: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl ConnectivityMonitor {
    /// Wrap a platform reachability feed.
    ///
    /// `debounce` is the window a transition must hold before it is
    /// reported; a flap shorter than the window emits nothing.
    pub fn new(source: watch::Receiver<bool>, debounce: Duration) -> Self {
        let initial = *source.borrow();
        let (tx, rx) = watch::channel(initial);
        let listeners: ListenerMap = Arc::new(Mutex::new(HashMap::new()));
        let source_closed = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(debounce_loop(
            source,
            tx,
            Arc::clone(&listeners),
            Arc::clone(&source_closed),
            debounce,
        ));

        Self {
            inner: Arc::new(Inner {
                debounced: rx,
                source_closed,
                listeners,
                next_listener: AtomicU64::new(0),
                task,
            }),
        }
    }

    /// Point-in-time reachability check.
    ///
    /// Fails open: a closed platform feed reads as online, so a broken
    /// reachability integration can delay receipts but never block sends.
    pub fn is_online(&self) -> bool {
        if self.inner.source_closed.load(Ordering::Acquire) {
            return true;
        }
        *self.inner.debounced.borrow()
    }

    /// Register a transition callback.
    ///
    /// Fires synchronously with the current state on registration, then on
    /// every debounced transition.  The returned [`Subscription`] detaches
    /// the callback when dropped.
    pub fn subscribe(&self, cb: impl Fn(bool) + Send + Sync + 'static) -> Subscription {
        let cb: Listener = Arc::new(cb);
        cb(self.is_online());

        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(id, cb);

        let listeners = Arc::clone(&self.inner.listeners);
        Subscription::new(move || {
            listeners.lock().remove(&id);
        })
    }

    /// Resolve as soon as the monitor reports online.
    ///
    /// Returns immediately when already online (or when the feed is gone,
    /// per the fail-open rule), otherwise waits for the next debounced
    /// online transition.
    pub async fn wait_for_online(&self) {
        let mut rx = self.inner.debounced.clone();
        loop {
            if self.is_online() || *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Debounce task gone; nothing left to wait on.
                return;
            }
        }
    }
}

async fn debounce_loop(
    mut source: watch::Receiver<bool>,
    tx: watch::Sender<bool>,
    listeners: ListenerMap,
    source_closed: Arc<AtomicBool>,
    window: Duration,
) {
    let mut current = *source.borrow();

    loop {
        if source.changed().await.is_err() {
            source_closed.store(true, Ordering::Release);
            return;
        }
        let mut candidate = *source.borrow_and_update();
        if candidate == current {
            continue;
        }

        // Let the signal settle: restart the window on every flap.
        loop {
            tokio::select! {
                _ = tokio::time::sleep(window) => break,
                changed = source.changed() => {
                    if changed.is_err() {
                        source_closed.store(true, Ordering::Release);
                        return;
                    }
                    candidate = *source.borrow_and_update();
                }
            }
        }

        if candidate == current {
            continue;
        }
        current = candidate;
        let _ = tx.send(current);
        debug!(online = current, "connectivity transition");

        let callbacks: Vec<Listener> = listeners.lock().values().cloned().collect();
        for cb in callbacks {
            cb(current);
        }
    }
}
