//! Domain model structs shared by the remote contract and the local cache.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the UI layer over IPC and persisted as JSON payloads where
//! the schema calls for it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChatId, LocalId, MessageId, Uid};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A user profile.  The remote store is the source of truth; the local row
/// is a cache copy keyed by [`Uid`] and fully overwritten on every pull.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub uid: Uid,
    pub email: String,
    pub display_name: String,
    /// Timestamp of account creation.
    pub created_at: DateTime<Utc>,
    /// Last presence heartbeat observed by the remote store.
    pub last_seen: DateTime<Utc>,
    pub is_online: bool,
    /// Push-notification token, absent until the device registers one.
    pub fcm_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    /// One-to-one conversation.
    Direct,
    /// Group conversation (participant count validated at creation time by
    /// the chat-creation flow, not by the sync engine).
    Group,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatType::Direct => "direct",
            ChatType::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(ChatType::Direct),
            "group" => Some(ChatType::Group),
            _ => None,
        }
    }
}

/// Denormalized preview of the most recent message, kept on the chat row so
/// the conversation list renders without a per-chat message query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastMessage {
    pub content: String,
    pub sender_id: Uid,
    pub timestamp: DateTime<Utc>,
    pub msg_type: MessageType,
}

/// A conversation.
///
/// Invariant: every uid in `participants` references a user row that exists
/// locally before the chat row is written.  `participants` is canonically an
/// ordered list; map-shaped remote payloads are converted at the remote
/// adapter boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub chat_type: ChatType,
    pub participants: Vec<Uid>,
    /// Display name.  `None` for direct chats, which derive a fallback from
    /// the other participants' display names.
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_message: Option<LastMessage>,
    /// Per-participant unread counters as reported by the remote store.
    #[serde(default)]
    pub unread_counts: HashMap<Uid, u32>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageType::Text),
            "image" => Some(MessageType::Image),
            _ => None,
        }
    }
}

/// Pixel dimensions and byte size of an image attachment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
}

/// A single chat message.
///
/// `id` is remote-assigned and absent while the message only exists locally;
/// `local_id` is the client-generated correlation key.  The display status
/// is never stored -- it is derived on every read by
/// [`delivery_status`](crate::status::delivery_status) from `id`,
/// `delivered_to` and `read_by`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Option<MessageId>,
    pub chat_id: ChatId,
    pub sender_id: Uid,
    pub msg_type: MessageType,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub local_id: Option<LocalId>,
    /// Recipients that acknowledged delivery.
    #[serde(default)]
    pub delivered_to: Vec<Uid>,
    /// Recipients that opened the chat after this message arrived.
    #[serde(default)]
    pub read_by: Vec<Uid>,
    pub metadata: Option<ImageMetadata>,
}

/// Display status derived from a message's receipt data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Not yet confirmed by the remote store.
    Sending,
    Sent,
    Delivered,
    Read,
}

// ---------------------------------------------------------------------------
// Queue item
// ---------------------------------------------------------------------------

/// Lifecycle state of an outbound queue entry.  `Sent` has no variant: a
/// confirmed item is removed from the queue rather than marked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Sending,
}

impl QueueItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemStatus::Pending => "pending",
            QueueItemStatus::Sending => "sending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueItemStatus::Pending),
            "sending" => Some(QueueItemStatus::Sending),
            _ => None,
        }
    }
}

/// An outbound message awaiting confirmed remote persistence.
///
/// Persisted in the `outbox` table so messages composed while the app was
/// killed are not lost.  Keyed by `local_id`; re-enqueueing the same message
/// updates in place rather than duplicating.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueItem {
    pub local_id: LocalId,
    pub message: Message,
    pub status: QueueItemStatus,
    /// Number of completed send attempts (successful or not).
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Per-recipient receipt flags for one message, as reported by the remote
/// store's delivery-state lookup.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiptState {
    pub delivered: bool,
    pub read: bool,
}
