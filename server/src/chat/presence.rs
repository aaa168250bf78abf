//! Presence announcements.
//!
//! Every membership change in the connection registry rebuilds the full list
//! of online usernames and pushes it to every open connection. The payload is
//! never patched incrementally.

use axum::{extract::State, Json};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::state::AppState;
use crate::ws::connection::Connection;
use crate::ws::protocol::encode_frame;
use crate::ws::registry::{ConnectionRegistry, Presence};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PresenceKind {
    Presence,
}

/// `{ "type": "PRESENCE", "online": [...] }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    #[serde(rename = "type")]
    pub kind: PresenceKind,
    pub online: Vec<String>,
}

impl PresencePayload {
    pub fn new(online: BTreeSet<String>) -> Self {
        Self {
            kind: PresenceKind::Presence,
            online: online.into_iter().collect(),
        }
    }
}

/// Fans presence snapshots out to every open connection.
pub struct PresenceNotifier {
    registry: Arc<ConnectionRegistry>,
    /// Serializes announcements; holds the count of announcements sent.
    sequence: Mutex<u64>,
}

impl PresenceNotifier {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            sequence: Mutex::new(0),
        }
    }

    /// Current presence payload.
    pub fn snapshot(&self) -> PresencePayload {
        PresencePayload::new(self.registry.snapshot_usernames())
    }

    /// Send the current online set to every open connection.
    ///
    /// Announcements are serialized, and each one snapshots the registry
    /// while holding the lock, so a peer never receives an older snapshot
    /// after a newer one. Connections that refuse the frame are pruned; if
    /// that takes a user offline, the new state is announced too.
    pub fn announce(&self) {
        while self.announce_once() {}
    }

    /// Send the current snapshot to a single connection.
    pub fn send_snapshot(&self, connection: &Connection) {
        let _sequence = self.sequence.lock();
        match encode_frame(&self.snapshot()) {
            Ok(frame) => {
                if let Err(e) = connection.send(frame) {
                    tracing::debug!(
                        connection_id = %connection.id(),
                        error = %e,
                        "Presence snapshot not delivered"
                    );
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode presence payload"),
        }
    }

    /// Returns true if pruning took someone offline and another round is due.
    fn announce_once(&self) -> bool {
        let mut sequence = self.sequence.lock();
        let payload = self.snapshot();
        let frame = match encode_frame(&payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode presence payload");
                return false;
            }
        };
        *sequence += 1;

        let mut went_offline = false;
        let mut recipients = 0usize;
        for (username, connection) in self.registry.all_connections() {
            match connection.send(frame.clone()) {
                Ok(()) => recipients += 1,
                Err(e) => {
                    tracing::warn!(
                        username = %username,
                        connection_id = %connection.id(),
                        error = %e,
                        "Presence delivery failed, pruning connection"
                    );
                    went_offline |= self.registry.prune(&username, &connection) == Presence::WentOffline;
                }
            }
        }

        tracing::debug!(
            sequence = *sequence,
            online = payload.online.len(),
            recipients = recipients,
            "Presence announced"
        );
        went_offline
    }
}

/// GET /api/presence: current online usernames in the same shape as the
/// WebSocket presence frame.
pub async fn get_presence(State(state): State<AppState>) -> Json<PresencePayload> {
    Json(state.presence.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    fn connect(registry: &ConnectionRegistry, username: &str) -> (Connection, mpsc::Receiver<Message>) {
        let (conn, rx) = Connection::new(8);
        registry.add(username, conn.clone()).unwrap();
        (conn, rx)
    }

    fn last_presence(rx: &mut mpsc::Receiver<Message>) -> Option<PresencePayload> {
        let mut last = None;
        while let Ok(frame) = rx.try_recv() {
            if let Message::Text(text) = frame {
                last = serde_json::from_str(text.as_str()).ok();
            }
        }
        last
    }

    #[test]
    fn test_payload_wire_shape() {
        let payload = PresencePayload::new(BTreeSet::from(["bob".to_string(), "alice".to_string()]));
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "PRESENCE");
        assert_eq!(json["online"], serde_json::json!(["alice", "bob"]));
    }

    #[test]
    fn test_announce_reaches_every_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let notifier = PresenceNotifier::new(registry.clone());
        let (_a1, mut a1_rx) = connect(&registry, "alice");
        let (_a2, mut a2_rx) = connect(&registry, "alice");
        let (_b1, mut b1_rx) = connect(&registry, "bob");

        notifier.announce();

        for rx in [&mut a1_rx, &mut a2_rx, &mut b1_rx] {
            let payload = last_presence(rx).expect("presence frame");
            assert_eq!(payload.online, vec!["alice".to_string(), "bob".to_string()]);
        }
    }

    #[test]
    fn test_announce_after_close_excludes_user() {
        let registry = Arc::new(ConnectionRegistry::new());
        let notifier = PresenceNotifier::new(registry.clone());
        let (alice, _alice_rx) = connect(&registry, "alice");
        let (_bob, mut bob_rx) = connect(&registry, "bob");

        notifier.announce();
        assert!(last_presence(&mut bob_rx).unwrap().online.contains(&"alice".to_string()));

        registry.remove("alice", alice.id());
        notifier.announce();
        let payload = last_presence(&mut bob_rx).unwrap();
        assert!(!payload.online.contains(&"alice".to_string()));
        assert_eq!(payload.online, vec!["bob".to_string()]);
    }

    #[test]
    fn test_dead_connection_pruned_and_reannounced() {
        let registry = Arc::new(ConnectionRegistry::new());
        let notifier = PresenceNotifier::new(registry.clone());
        let (_alice, alice_rx) = connect(&registry, "alice");
        let (_bob, mut bob_rx) = connect(&registry, "bob");
        drop(alice_rx);

        notifier.announce();

        assert!(!registry.is_online("alice"));
        // Bob's latest view no longer lists the dead peer.
        assert_eq!(last_presence(&mut bob_rx).unwrap().online, vec!["bob".to_string()]);
    }

    #[test]
    fn test_send_snapshot_targets_one_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let notifier = PresenceNotifier::new(registry.clone());
        let (a1, mut a1_rx) = connect(&registry, "alice");
        let (_a2, mut a2_rx) = connect(&registry, "alice");

        notifier.send_snapshot(&a1);
        assert_eq!(last_presence(&mut a1_rx).unwrap().online, vec!["alice".to_string()]);
        assert!(last_presence(&mut a2_rx).is_none());
    }
}
