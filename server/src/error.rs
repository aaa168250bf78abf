//! Error taxonomy for the connection registry and router.
//!
//! Only `InvalidUsername` stops an action outright (the connection is never
//! registered). Everything else is recovered where it happens and logged.

use crate::store::StoreError;
use crate::ws::connection::SendError;

#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    /// Blank or missing identity at connect time.
    #[error("username must not be blank")]
    InvalidUsername,

    /// Inbound payload could not be decoded into a chat message.
    #[error("malformed payload: {0}")]
    Decode(String),

    /// Outbound payload could not be serialized.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// Message addressed to a room that does not exist.
    #[error("room {0} not found")]
    RoomNotFound(String),

    /// One target connection refused a frame.
    #[error("delivery to {username} failed: {reason}")]
    Delivery { username: String, reason: SendError },

    /// Storage collaborator failed.
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
}
