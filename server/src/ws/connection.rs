use axum::extract::ws::Message;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Unique id for one live transport. Set semantics in the registry are keyed on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a frame could not be queued on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("connection closed")]
    Closed,
    #[error("outbound queue full")]
    QueueFull,
}

/// Handle to one live WebSocket.
///
/// Cloning is cheap; every clone refers to the same transport. Frames are
/// pushed onto a bounded queue drained in order by the connection's writer
/// task, so a slow peer fills its own queue instead of stalling the sender.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<Message>,
    open: Arc<watch::Sender<bool>>,
}

impl Connection {
    /// Create a connection with an outbound queue of `capacity` frames.
    /// The receiver half belongs to the writer task.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (open, _) = watch::channel(true);
        let connection = Self {
            id: ConnectionId::new(),
            tx,
            open: Arc::new(open),
        };
        (connection, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        *self.open.borrow() && !self.tx.is_closed()
    }

    /// Queue a frame without waiting.
    pub fn send(&self, message: Message) -> Result<(), SendError> {
        if !*self.open.borrow() {
            return Err(SendError::Closed);
        }
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(SendError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.close();
                Err(SendError::Closed)
            }
        }
    }

    /// Flip the open flag. Returns true only for the call that actually closed it.
    pub fn close(&self) -> bool {
        self.open.send_if_modified(|open| {
            if *open {
                *open = false;
                true
            } else {
                false
            }
        })
    }

    /// Resolves once the connection has been closed by anyone holding a clone.
    pub async fn closed(&self) {
        let mut rx = self.open.subscribe();
        // The sender lives in `self`, so wait_for only fails if that invariant breaks.
        let _ = rx.wait_for(|open| !*open).await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}
