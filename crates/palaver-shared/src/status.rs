//! Delivery-status derivation.
//!
//! The display status of a message is never stored.  `delivered_to` and
//! `read_by` mutate independently of the main sync path (receipt writes
//! bypass it entirely), so the status must be recomputed on every read.

use crate::models::{DeliveryStatus, Message};
use crate::types::Uid;

/// Derive the display status of `message` from the viewer's perspective.
///
/// For a message someone else sent, the model does not distinguish beyond
/// `Sent`.  For the viewer's own messages the ladder is: no remote id yet
/// means `Sending`, any read receipt wins over any delivery receipt, and a
/// confirmed message with no receipts is `Sent`.
pub fn delivery_status(message: &Message, current_uid: &Uid) -> DeliveryStatus {
    if message.sender_id != *current_uid {
        return DeliveryStatus::Sent;
    }
    if message.id.is_none() {
        return DeliveryStatus::Sending;
    }
    if !message.read_by.is_empty() {
        return DeliveryStatus::Read;
    }
    if !message.delivered_to.is_empty() {
        return DeliveryStatus::Delivered;
    }
    DeliveryStatus::Sent
}
