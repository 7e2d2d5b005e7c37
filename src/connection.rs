//! The capability every transport adapter provides to the mesh.
//!
//! WebSocket, serial, I2C and Modbus adapters live outside this crate; the
//! mesh only ever talks to them through [`Connection`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::events::ListenerId;

/// `(peer_id, port, payload)` of a frame received from a directly connected peer.
pub type IncomeMessageHandler = dyn Fn(&str, u8, &Bytes) + Send + Sync;

/// Called with the id of a peer that appeared or went away.
pub type PeerStatusHandler = dyn Fn(&str) + Send + Sync;

/// One physical link serving any number of directly reachable peers.
///
/// Listener registrations of all three kinds share one id space, so any
/// returned [`ListenerId`] can be handed to [`Connection::remove_listener`].
/// Listeners may be called from any thread.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send a frame to a peer on the given port without waiting for any answer.
    async fn send(&self, peer_id: &str, port: u8, payload: Bytes) -> Result<()>;

    fn is_connected(&self) -> bool;

    fn on_income_message(&self, cb: Arc<IncomeMessageHandler>) -> ListenerId;
    fn on_connect(&self, cb: Arc<PeerStatusHandler>) -> ListenerId;
    fn on_disconnect(&self, cb: Arc<PeerStatusHandler>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);
}

/// Listener of any kind, for adapters keeping a single registry.
#[derive(Clone)]
pub enum ConnectionListener {
    Message(Arc<IncomeMessageHandler>),
    Connect(Arc<PeerStatusHandler>),
    Disconnect(Arc<PeerStatusHandler>),
}
