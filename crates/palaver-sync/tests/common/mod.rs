//! Scripted in-memory remote store shared by the integration suites.
//!
//! Implements the full [`RemoteStore`] contract over a mutex-guarded map,
//! with failure injection (unreachable transport, N failing sends, gated
//! sends that block until released) and manual emission of subscription
//! events.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Semaphore};

use palaver_shared::{
    Chat, ChatId, ChatType, LocalId, Message, MessageId, MessageType, NetworkError, ReceiptState,
    RemoteError, Uid, User,
};
use palaver_store::Database;
use palaver_sync::{RemoteResult, RemoteStore, Subscription};

#[derive(Default)]
struct State {
    users: HashMap<Uid, User>,
    chats: HashMap<ChatId, Chat>,
    /// Confirmed messages in arrival order.
    messages: Vec<Message>,
    /// Idempotent send ledger: local_id -> assigned id.
    by_local_id: HashMap<LocalId, MessageId>,
    receipts: HashMap<MessageId, HashMap<Uid, ReceiptState>>,
    next_id: u64,
    next_sub: u64,
    /// Fail the next N send_message calls with `Unreachable`.
    failing_sends: u32,
    /// Fail every call with `Unreachable`.
    unreachable: bool,
    /// get_user calls for these uids fail with `RemoteError::Unknown`.
    broken_users: HashSet<Uid>,
    chat_subs: HashMap<u64, (Uid, mpsc::Sender<Vec<Chat>>)>,
    msg_subs: HashMap<u64, (ChatId, mpsc::Sender<Message>)>,
    user_subs: HashMap<u64, (Uid, mpsc::Sender<User>)>,
}

pub struct InMemoryRemote {
    state: Arc<Mutex<State>>,
    /// When set, send_message blocks on a permit before completing.
    send_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl InMemoryRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(State::default())),
            send_gate: Mutex::new(None),
        })
    }

    // -- seeding -----------------------------------------------------------

    pub fn seed_user(&self, user: User) {
        self.state.lock().users.insert(user.uid.clone(), user);
    }

    pub fn seed_chat(&self, chat: Chat) {
        self.state.lock().chats.insert(chat.id.clone(), chat);
    }

    pub fn remove_user(&self, uid: &Uid) {
        self.state.lock().users.remove(uid);
    }

    // -- failure injection -------------------------------------------------

    pub fn fail_next_sends(&self, n: u32) {
        self.state.lock().failing_sends = n;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Make `get_user(uid)` fail with a non-NotFound remote error.
    pub fn break_user(&self, uid: &Uid) {
        self.state.lock().broken_users.insert(uid.clone());
    }

    /// Gate sends on a semaphore.  With zero permits a send hangs until
    /// [`release_sends`](Self::release_sends) is called.
    pub fn gate_sends(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.send_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub fn release_sends(&self) {
        *self.send_gate.lock() = None;
    }

    // -- inspection --------------------------------------------------------

    pub fn sent_messages(&self) -> Vec<Message> {
        self.state.lock().messages.clone()
    }

    pub fn sent_contents(&self) -> Vec<String> {
        self.state
            .lock()
            .messages
            .iter()
            .map(|m| m.content.clone())
            .collect()
    }

    pub fn receipts_for(&self, id: &MessageId) -> HashMap<Uid, ReceiptState> {
        self.state
            .lock()
            .receipts
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    // -- event emission ----------------------------------------------------

    /// Push the current chat list of `uid` to its chat-list subscribers.
    pub fn emit_chats(&self, uid: &Uid) {
        let (list, senders) = {
            let state = self.state.lock();
            let list: Vec<Chat> = state
                .chats
                .values()
                .filter(|c| c.participants.contains(uid))
                .cloned()
                .collect();
            let senders: Vec<_> = state
                .chat_subs
                .values()
                .filter(|(u, _)| u == uid)
                .map(|(_, tx)| tx.clone())
                .collect();
            (list, senders)
        };
        for tx in senders {
            let _ = tx.try_send(list.clone());
        }
    }

    /// Push one message to the subscribers of its chat.
    pub fn emit_message(&self, message: Message) {
        let senders: Vec<_> = {
            let state = self.state.lock();
            state
                .msg_subs
                .values()
                .filter(|(c, _)| *c == message.chat_id)
                .map(|(_, tx)| tx.clone())
                .collect()
        };
        for tx in senders {
            let _ = tx.try_send(message.clone());
        }
    }

    /// Push a user document to its subscribers.
    pub fn emit_user(&self, user: User) {
        let senders: Vec<_> = {
            let state = self.state.lock();
            state
                .user_subs
                .values()
                .filter(|(u, _)| *u == user.uid)
                .map(|(_, tx)| tx.clone())
                .collect()
        };
        for tx in senders {
            let _ = tx.try_send(user.clone());
        }
    }

    pub fn chat_subscriber_count(&self) -> usize {
        self.state.lock().chat_subs.len()
    }

    fn check_reachable(&self) -> RemoteResult<()> {
        if self.state.lock().unreachable {
            return Err(NetworkError::Unreachable.into());
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn get_user(&self, uid: &Uid) -> RemoteResult<User> {
        self.check_reachable()?;
        let state = self.state.lock();
        if state.broken_users.contains(uid) {
            return Err(RemoteError::Unknown("storage layer failure".into()).into());
        }
        state
            .users
            .get(uid)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound.into())
    }

    async fn put_user(&self, user: &User) -> RemoteResult<()> {
        self.check_reachable()?;
        self.seed_user(user.clone());
        Ok(())
    }

    async fn subscribe_user(
        &self,
        uid: &Uid,
        feed: mpsc::Sender<User>,
    ) -> RemoteResult<Subscription> {
        self.check_reachable()?;
        let id = {
            let mut state = self.state.lock();
            let id = state.next_sub;
            state.next_sub += 1;
            state.user_subs.insert(id, (uid.clone(), feed));
            id
        };
        let state = Arc::clone(&self.state);
        Ok(Subscription::new(move || {
            state.lock().user_subs.remove(&id);
        }))
    }

    async fn get_chat(&self, chat_id: &ChatId) -> RemoteResult<Chat> {
        self.check_reachable()?;
        self.state
            .lock()
            .chats
            .get(chat_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound.into())
    }

    async fn put_chat(&self, chat: &Chat) -> RemoteResult<()> {
        self.check_reachable()?;
        self.seed_chat(chat.clone());
        Ok(())
    }

    async fn update_chat(&self, chat: &Chat) -> RemoteResult<()> {
        self.check_reachable()?;
        let mut state = self.state.lock();
        if !state.chats.contains_key(&chat.id) {
            return Err(RemoteError::NotFound.into());
        }
        state.chats.insert(chat.id.clone(), chat.clone());
        Ok(())
    }

    async fn get_user_chats(&self, uid: &Uid) -> RemoteResult<Vec<Chat>> {
        self.check_reachable()?;
        Ok(self
            .state
            .lock()
            .chats
            .values()
            .filter(|c| c.participants.contains(uid))
            .cloned()
            .collect())
    }

    async fn subscribe_user_chats(
        &self,
        uid: &Uid,
        feed: mpsc::Sender<Vec<Chat>>,
    ) -> RemoteResult<Subscription> {
        self.check_reachable()?;
        let id = {
            let mut state = self.state.lock();
            let id = state.next_sub;
            state.next_sub += 1;
            state.chat_subs.insert(id, (uid.clone(), feed));
            id
        };
        let state = Arc::clone(&self.state);
        Ok(Subscription::new(move || {
            state.lock().chat_subs.remove(&id);
        }))
    }

    async fn send_message(&self, message: &Message) -> RemoteResult<MessageId> {
        self.check_reachable()?;
        {
            let mut state = self.state.lock();
            if state.failing_sends > 0 {
                state.failing_sends -= 1;
                return Err(NetworkError::Unreachable.into());
            }
        }

        let gate = self.send_gate.lock().clone();
        if let Some(gate) = gate {
            let permit = gate.acquire().await.map_err(|_| NetworkError::Unreachable)?;
            permit.forget();
        }

        let mut state = self.state.lock();
        if let Some(local_id) = &message.local_id {
            // Idempotent replay: same local_id, same assigned id.
            if let Some(existing) = state.by_local_id.get(local_id) {
                return Ok(existing.clone());
            }
        }

        state.next_id += 1;
        let id = MessageId::new(format!("m{}", state.next_id));
        let mut stored = message.clone();
        stored.id = Some(id.clone());
        state.messages.push(stored);
        if let Some(local_id) = &message.local_id {
            state.by_local_id.insert(local_id.clone(), id.clone());
        }
        Ok(id)
    }

    async fn subscribe_messages(
        &self,
        chat_id: &ChatId,
        feed: mpsc::Sender<Message>,
    ) -> RemoteResult<Subscription> {
        self.check_reachable()?;
        let id = {
            let mut state = self.state.lock();
            let id = state.next_sub;
            state.next_sub += 1;
            state.msg_subs.insert(id, (chat_id.clone(), feed));
            id
        };
        let state = Arc::clone(&self.state);
        Ok(Subscription::new(move || {
            state.lock().msg_subs.remove(&id);
        }))
    }

    async fn mark_delivered(
        &self,
        message_id: &MessageId,
        _chat_id: &ChatId,
        uid: &Uid,
    ) -> RemoteResult<()> {
        self.check_reachable()?;
        let mut state = self.state.lock();
        let entry = state
            .receipts
            .entry(message_id.clone())
            .or_default()
            .entry(uid.clone())
            .or_default();
        entry.delivered = true;
        Ok(())
    }

    async fn mark_read(
        &self,
        message_id: &MessageId,
        _chat_id: &ChatId,
        uid: &Uid,
    ) -> RemoteResult<()> {
        self.check_reachable()?;
        let mut state = self.state.lock();
        let entry = state
            .receipts
            .entry(message_id.clone())
            .or_default()
            .entry(uid.clone())
            .or_default();
        entry.delivered = true;
        entry.read = true;
        Ok(())
    }

    async fn get_delivery_state(
        &self,
        message_id: &MessageId,
        _chat_id: &ChatId,
    ) -> RemoteResult<HashMap<Uid, ReceiptState>> {
        self.check_reachable()?;
        Ok(self.receipts_for(message_id))
    }
}

// ---------------------------------------------------------------------------
// Fixture helpers
// ---------------------------------------------------------------------------

pub fn user(uid: &str) -> User {
    User {
        uid: Uid::new(uid),
        email: format!("{uid}@example.com"),
        display_name: uid.to_uppercase(),
        created_at: Utc::now(),
        last_seen: Utc::now(),
        is_online: false,
        fcm_token: None,
    }
}

pub fn chat(id: &str, participants: &[&str]) -> Chat {
    Chat {
        id: ChatId::new(id),
        chat_type: if participants.len() > 2 {
            ChatType::Group
        } else {
            ChatType::Direct
        },
        participants: participants.iter().map(|p| Uid::new(*p)).collect(),
        name: None,
        created_at: Utc::now(),
        last_message: None,
        unread_counts: HashMap::new(),
    }
}

pub fn remote_message(id: &str, chat_id: &str, sender: &str, content: &str) -> Message {
    Message {
        id: Some(MessageId::new(id)),
        chat_id: ChatId::new(chat_id),
        sender_id: Uid::new(sender),
        msg_type: MessageType::Text,
        content: content.into(),
        timestamp: Utc::now(),
        local_id: None,
        delivered_to: Vec::new(),
        read_by: Vec::new(),
        metadata: None,
    }
}

/// Route engine/queue logs through the test harness (RUST_LOG to enable).
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn mem_db() -> Database {
    init_tracing();
    let db = Database::open_in_memory().unwrap();
    db.init().unwrap();
    db
}

/// Poll until `cond` holds, yielding to the runtime between checks.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
