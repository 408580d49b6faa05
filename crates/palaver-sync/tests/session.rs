//! End-to-end session tests: login sync, reconnect-driven drain and
//! subscription teardown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use palaver_shared::{ChatId, MessageType, Uid};
use palaver_sync::{Session, SessionConfig};
use tokio::sync::watch;

use common::{chat, mem_db, user, wait_until, InMemoryRemote};

fn test_config() -> SessionConfig {
    SessionConfig {
        remote_timeout: Duration::from_secs(5),
        connectivity_debounce: Duration::ZERO,
    }
}

fn seeded_remote() -> Arc<InMemoryRemote> {
    let remote = InMemoryRemote::new();
    remote.seed_user(user("u1"));
    remote.seed_user(user("u2"));
    remote.seed_chat(chat("c1", &["u1", "u2"]));
    remote
}

#[tokio::test]
async fn login_populates_local_cache_and_starts_realtime() {
    let remote = seeded_remote();
    let (_reach_tx, reach_rx) = watch::channel(true);

    let session = Session::start(
        test_config(),
        mem_db(),
        Arc::clone(&remote),
        reach_rx,
        Uid::new("u1"),
    )
    .await
    .unwrap();

    let db = session.store();
    assert!(db.user_exists(&Uid::new("u1")).unwrap());
    assert!(db.user_exists(&Uid::new("u2")).unwrap());
    assert!(db.chat_exists(&ChatId::new("c1")).unwrap());
    assert_eq!(remote.chat_subscriber_count(), 1);

    // A chat created remotely after login lands through the feed.
    remote.seed_user(user("u3"));
    remote.seed_chat(chat("c2", &["u1", "u3"]));
    remote.emit_chats(&Uid::new("u1"));

    let db_probe = db.clone();
    wait_until(move || db_probe.chat_exists(&ChatId::new("c2")).unwrap()).await;
}

#[tokio::test]
async fn reconnect_drains_messages_composed_offline() {
    let remote = seeded_remote();
    let (reach_tx, reach_rx) = watch::channel(true);

    let session = Session::start(
        test_config(),
        mem_db(),
        Arc::clone(&remote),
        reach_rx,
        Uid::new("u1"),
    )
    .await
    .unwrap();

    // The device drops offline; both sends queue up instead of failing.
    reach_tx.send(false).unwrap();
    let monitor = session.connectivity().clone();
    wait_until(move || !monitor.is_online()).await;

    session
        .send_message(ChatId::new("c1"), MessageType::Text, "hi".into(), None)
        .await
        .unwrap();
    session
        .send_message(ChatId::new("c1"), MessageType::Text, "there".into(), None)
        .await
        .unwrap();
    assert!(remote.sent_messages().is_empty());
    assert_eq!(session.queue().len().unwrap(), 2);

    // Back online: the transition trigger drains the queue in compose
    // order and empties it.
    reach_tx.send(true).unwrap();
    let remote_probe = Arc::clone(&remote);
    wait_until(move || remote_probe.sent_messages().len() == 2).await;

    assert_eq!(remote.sent_contents(), vec!["hi", "there"]);
    let queue_probe = session.queue().clone();
    wait_until(move || queue_probe.len().unwrap() == 0).await;
}

#[tokio::test]
async fn app_start_drains_items_from_previous_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("palaver.db");

    // Previous session: queue a message offline, then "crash".
    {
        let db = palaver_store::Database::open_at(&path).unwrap();
        let (_reach_tx, reach_rx) = watch::channel(false);
        let session = Session::start(
            test_config(),
            db,
            seeded_remote(),
            reach_rx,
            Uid::new("u1"),
        )
        .await
        .unwrap();
        session
            .send_message(ChatId::new("c1"), MessageType::Text, "leftover".into(), None)
            .await
            .unwrap();
    }

    // Fresh start, already online: the immediate connectivity callback
    // doubles as the app-start trigger.
    let remote = seeded_remote();
    let db = palaver_store::Database::open_at(&path).unwrap();
    let (_reach_tx, reach_rx) = watch::channel(true);
    let session = Session::start(test_config(), db, Arc::clone(&remote), reach_rx, Uid::new("u1"))
        .await
        .unwrap();

    let remote_probe = Arc::clone(&remote);
    wait_until(move || remote_probe.sent_contents() == vec!["leftover"]).await;
    let queue_probe = session.queue().clone();
    wait_until(move || queue_probe.len().unwrap() == 0).await;
}

#[tokio::test]
async fn watched_chat_receives_messages_and_marks_chat_unread() {
    let remote = seeded_remote();
    let (_reach_tx, reach_rx) = watch::channel(true);

    let session = Session::start(
        test_config(),
        mem_db(),
        Arc::clone(&remote),
        reach_rx,
        Uid::new("u1"),
    )
    .await
    .unwrap();

    session.watch_chat(&ChatId::new("c1")).await.unwrap();
    remote.emit_message(common::remote_message("m1", "c1", "u2", "knock knock"));

    let db_probe = session.store().clone();
    wait_until(move || {
        db_probe
            .get_messages(&ChatId::new("c1"), 10, 0)
            .unwrap()
            .len()
            == 1
    })
    .await;

    // The arrival bumped our unread counter; opening the chat clears it.
    let chat = session.store().get_chat(&ChatId::new("c1")).unwrap();
    assert_eq!(chat.unread_counts.get(&Uid::new("u1")), Some(&1));
    session.mark_chat_opened(&ChatId::new("c1")).unwrap();
    let chat = session.store().get_chat(&ChatId::new("c1")).unwrap();
    assert_eq!(chat.unread_counts.get(&Uid::new("u1")), None);
}

#[tokio::test]
async fn shutdown_detaches_every_feed() {
    let remote = seeded_remote();
    let (_reach_tx, reach_rx) = watch::channel(true);

    let session = Session::start(
        test_config(),
        mem_db(),
        Arc::clone(&remote),
        reach_rx,
        Uid::new("u1"),
    )
    .await
    .unwrap();
    session.watch_chat(&ChatId::new("c1")).await.unwrap();
    assert_eq!(remote.chat_subscriber_count(), 1);

    session.shutdown();
    assert_eq!(remote.chat_subscriber_count(), 0);

    // Events after shutdown never reach the store.
    remote.seed_user(user("u3"));
    remote.seed_chat(chat("c9", &["u1", "u3"]));
    remote.emit_chats(&Uid::new("u1"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!session.store().chat_exists(&ChatId::new("c9")).unwrap());
}
