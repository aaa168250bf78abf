//! Message routing: persistence hand-off, target resolution and fan-out.

use axum::extract::ws::Message;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::chat::message::ChatMessage;
use crate::chat::presence::PresenceNotifier;
use crate::error::CourierError;
use crate::store::{self, MessageStore, RoomDirectory, RoomSnapshot};
use crate::ws::connection::Connection;
use crate::ws::protocol::{decode_inbound, encode_frame};
use crate::ws::registry::{ConnectionRegistry, Presence};

/// How a message was addressed. First matching rule wins: room, then
/// broadcast, then direct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMode {
    Room(String),
    Broadcast,
    Direct { receiver: String },
}

impl RouteMode {
    pub fn for_message(message: &ChatMessage) -> Self {
        if let Some(room_id) = message.room() {
            RouteMode::Room(room_id.to_string())
        } else if message.is_broadcast() {
            RouteMode::Broadcast
        } else {
            RouteMode::Direct {
                receiver: message.receiver.clone().unwrap_or_default(),
            }
        }
    }
}

/// Result of routing one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOutcome {
    pub mode: RouteMode,
    /// Usernames with at least one connection that accepted the frame.
    pub delivered: BTreeSet<String>,
    /// Number of frames queued across all connections.
    pub frames: usize,
}

/// Routes inbound chat messages to their targets and drives presence on
/// connect and disconnect.
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    presence: Arc<PresenceNotifier>,
    messages: Arc<dyn MessageStore>,
    rooms: Arc<dyn RoomDirectory>,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        presence: Arc<PresenceNotifier>,
        messages: Arc<dyn MessageStore>,
        rooms: Arc<dyn RoomDirectory>,
    ) -> Self {
        Self {
            registry,
            presence,
            messages,
            rooms,
        }
    }

    /// Register a freshly upgraded connection and update presence.
    ///
    /// A user's first connection is announced to everyone; additional
    /// connections for an already-online user only receive the snapshot.
    pub fn connect(&self, username: &str, connection: Connection) -> Result<(), CourierError> {
        let presence = match self.registry.add(username, connection.clone()) {
            Ok(presence) => presence,
            Err(e) => {
                tracing::warn!(username = %username, error = %e, "Rejecting connection");
                return Err(e);
            }
        };

        if presence == Presence::CameOnline {
            self.presence.announce();
        } else {
            self.presence.send_snapshot(&connection);
        }
        Ok(())
    }

    /// Tear down a connection. Safe to call more than once.
    pub fn disconnect(&self, username: &str, connection: &Connection) {
        connection.close();
        if self.registry.remove(username, connection.id()) == Presence::WentOffline {
            self.presence.announce();
        }
    }

    /// Decode and route one inbound payload. Malformed payloads are logged
    /// and dropped; nothing here can fail the calling connection.
    pub async fn handle_payload(&self, username: &str, raw: &[u8]) {
        let message = match decode_inbound(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(username = %username, error = %e, "Dropping inbound payload");
                return;
            }
        };

        match self.route(message).await {
            Ok(outcome) => {
                tracing::debug!(
                    username = %username,
                    mode = ?outcome.mode,
                    delivered = outcome.delivered.len(),
                    frames = outcome.frames,
                    "Message routed"
                );
            }
            Err(CourierError::RoomNotFound(room_id)) => {
                tracing::debug!(username = %username, room_id = %room_id, "Room not found, message dropped");
            }
            Err(e) => {
                tracing::warn!(username = %username, error = %e, "Message not routed");
            }
        }
    }

    /// Persist, resolve targets and deliver a message.
    ///
    /// Storage failures are logged and delivery continues with the message as
    /// decoded. A room that cannot be resolved drops the message.
    pub async fn route(&self, message: ChatMessage) -> Result<RouteOutcome, CourierError> {
        let message = self.persist(message).await;
        let mode = RouteMode::for_message(&message);
        let frame = encode_frame(&message)?;

        let targets: Vec<String> = match &mode {
            RouteMode::Room(room_id) => self.resolve_room(room_id).await?.members,
            RouteMode::Broadcast => self.registry.snapshot_usernames().into_iter().collect(),
            // Receiver first, then the sender's own sessions.
            RouteMode::Direct { receiver } => vec![receiver.clone(), message.sender.clone()],
        };

        let (delivered, frames) = self.fan_out(&targets, &frame);
        Ok(RouteOutcome {
            mode,
            delivered,
            frames,
        })
    }

    async fn persist(&self, message: ChatMessage) -> ChatMessage {
        let messages = self.messages.clone();
        let pending = message.clone();
        match store::blocking(move || messages.persist(pending)).await {
            Ok(stored) => stored,
            Err(e) => {
                let err = CourierError::from(e);
                tracing::warn!(sender = %message.sender, error = %err, "Delivering unpersisted message");
                message
            }
        }
    }

    async fn resolve_room(&self, room_id: &str) -> Result<RoomSnapshot, CourierError> {
        let rooms = self.rooms.clone();
        let id = room_id.to_string();
        match store::blocking(move || rooms.lookup_room(&id)).await {
            Ok(Some(room)) => Ok(room),
            Ok(None) => Err(CourierError::RoomNotFound(room_id.to_string())),
            Err(e) => {
                tracing::warn!(room_id = %room_id, error = %e, "Room lookup failed");
                Err(CourierError::RoomNotFound(room_id.to_string()))
            }
        }
    }

    /// Queue `frame` on every connection of every target. Each connection is
    /// sent to at most once even if its user appears twice. Failing
    /// connections are pruned without affecting the rest.
    fn fan_out(&self, targets: &[String], frame: &Message) -> (BTreeSet<String>, usize) {
        let mut seen = HashSet::new();
        let mut delivered = BTreeSet::new();
        let mut frames = 0usize;
        let mut went_offline = false;

        for username in targets {
            for connection in self.registry.connections_for(username) {
                if !seen.insert(connection.id()) {
                    continue;
                }
                match connection.send(frame.clone()) {
                    Ok(()) => {
                        frames += 1;
                        delivered.insert(username.clone());
                    }
                    Err(reason) => {
                        let err = CourierError::Delivery {
                            username: username.clone(),
                            reason,
                        };
                        tracing::warn!(
                            connection_id = %connection.id(),
                            error = %err,
                            "Pruning stale connection"
                        );
                        went_offline |=
                            self.registry.prune(username, &connection) == Presence::WentOffline;
                    }
                }
            }
        }

        if went_offline {
            self.presence.announce();
        }
        (delivered, frames)
    }
}
