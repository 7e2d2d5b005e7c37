//! Mesh Core: multi-hop message routing and request/response on top of
//! point-to-point links between home-automation hosts.
//!
//! Layers, bottom up:
//! - [`codec`] binary wire format of a mesh message
//! - [`peer_connections`] many transport connections seen as one
//! - [`route_resolver`] routes learned from observed traffic
//! - [`router`] hop-by-hop send, deliver and forward
//! - [`network_logic`] request/response correlation and URI handlers
//! - [`host`] the actor task that owns all of the above

pub mod codec;
pub mod config;
pub mod connection;
pub mod constants;
pub mod error;
pub mod events;
pub mod host;
pub mod memory;
pub mod network_logic;
pub mod peer_connections;
pub mod route_resolver;
pub mod router;

pub use codec::NetworkMessage;
pub use config::HostConfig;
pub use connection::Connection;
pub use error::{MeshError, Result};
pub use host::{HostStatus, MeshHost};
pub use memory::{memory_link, MemoryConnection};
pub use network_logic::BoxError;
