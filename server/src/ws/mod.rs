pub mod actor;
pub mod connection;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod router;

pub use connection::{Connection, ConnectionId};
pub use registry::{ConnectionRegistry, Presence};
