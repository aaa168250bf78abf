use std::sync::Arc;

use crate::chat::presence::PresenceNotifier;
use crate::config::DeliveryConfig;
use crate::store::{MessageStore, RoomDirectory};
use crate::ws::router::MessageRouter;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Live WebSocket connections per username
    pub connections: Arc<ConnectionRegistry>,
    /// Presence fan-out over `connections`
    pub presence: Arc<PresenceNotifier>,
    /// Inbound message routing
    pub router: Arc<MessageRouter>,
    /// Per-connection queue and keepalive settings
    pub delivery: DeliveryConfig,
}

impl AppState {
    /// Wire a fresh registry, notifier and router around the given storage collaborators.
    pub fn new(
        messages: Arc<dyn MessageStore>,
        rooms: Arc<dyn RoomDirectory>,
        delivery: DeliveryConfig,
    ) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        let presence = Arc::new(PresenceNotifier::new(connections.clone()));
        let router = Arc::new(MessageRouter::new(
            connections.clone(),
            presence.clone(),
            messages,
            rooms,
        ));
        Self {
            connections,
            presence,
            router,
            delivery,
        }
    }
}
