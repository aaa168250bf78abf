use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

use crate::error::CourierError;
use crate::ws::connection::{Connection, ConnectionId};

/// Membership transition caused by an add or remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// First connection for the user: absent -> present.
    CameOnline,
    /// Last connection for the user went away: present -> absent.
    WentOffline,
    Unchanged,
}

impl Presence {
    pub fn changed(self) -> bool {
        !matches!(self, Presence::Unchanged)
    }
}

/// Tracks every live connection per username.
///
/// A username key exists if and only if its connection set is non-empty.
/// Per-user entries are guarded by the map's shard locks. The `online` set
/// mirrors the key set and is only written while the owning shard lock is
/// held, which makes `snapshot_usernames` a single point-in-time view
/// without locking every shard.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, HashMap<ConnectionId, Connection>>,
    online: RwLock<BTreeSet<String>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under `username`.
    pub fn add(&self, username: &str, connection: Connection) -> Result<Presence, CourierError> {
        if username.trim().is_empty() {
            return Err(CourierError::InvalidUsername);
        }

        let connection_id = connection.id();
        let presence = match self.connections.entry(username.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().insert(connection_id, connection);
                Presence::Unchanged
            }
            Entry::Vacant(entry) => {
                self.online.write().insert(username.to_string());
                entry.insert(HashMap::from([(connection_id, connection)]));
                Presence::CameOnline
            }
        };

        tracing::debug!(
            username = %username,
            connection_id = %connection_id,
            came_online = presence.changed(),
            "Connection registered"
        );
        Ok(presence)
    }

    /// Unregister one connection. Removing an absent connection is a no-op.
    pub fn remove(&self, username: &str, connection_id: ConnectionId) -> Presence {
        let presence = match self.connections.entry(username.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get_mut().remove(&connection_id).is_none() {
                    Presence::Unchanged
                } else if entry.get().is_empty() {
                    entry.remove();
                    self.online.write().remove(username);
                    Presence::WentOffline
                } else {
                    Presence::Unchanged
                }
            }
            Entry::Vacant(_) => Presence::Unchanged,
        };

        tracing::debug!(
            username = %username,
            connection_id = %connection_id,
            went_offline = presence.changed(),
            "Connection unregistered"
        );
        presence
    }

    /// Close a connection that failed a send and drop it from the registry.
    pub fn prune(&self, username: &str, connection: &Connection) -> Presence {
        connection.close();
        self.remove(username, connection.id())
    }

    /// Point-in-time set of every username with at least one connection.
    pub fn snapshot_usernames(&self) -> BTreeSet<String> {
        self.online.read().clone()
    }

    /// Current connections for `username`, empty if the user is offline.
    pub fn connections_for(&self, username: &str) -> Vec<Connection> {
        self.connections
            .get(username)
            .map(|set| set.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every registered connection paired with its username.
    pub fn all_connections(&self) -> Vec<(String, Connection)> {
        self.connections
            .iter()
            .flat_map(|entry| {
                let username = entry.key().clone();
                entry
                    .value()
                    .values()
                    .cloned()
                    .map(move |conn| (username.clone(), conn))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn is_online(&self, username: &str) -> bool {
        self.connections.contains_key(username)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.iter().map(|entry| entry.value().len()).sum()
    }
}
