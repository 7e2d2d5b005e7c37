// =============================================================================
// MESH CORE: memory.rs
// In-process point-to-point link
// =============================================================================
//
// Two `MemoryConnection` ends share one `LinkState`. A frame sent from one end
// is handed synchronously to the income listeners of the other end. Used by
// the demo binary and by multi-host tests in place of a real transport.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;

use crate::connection::{Connection, ConnectionListener, IncomeMessageHandler, PeerStatusHandler};
use crate::error::{MeshError, Result};
use crate::events::{IndexedEvents, ListenerId};

struct LinkState {
    connected: AtomicBool,
    ends: [Mutex<IndexedEvents<ConnectionListener>>; 2],
    /// Peer id under which each end is known to the opposite end.
    peer_ids: [String; 2],
}

impl LinkState {
    fn listeners(&self, side: usize) -> Vec<Arc<ConnectionListener>> {
        self.ends[side]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners()
    }

    fn emit_status(&self, side: usize, connected: bool) {
        let peer_id = &self.peer_ids[1 - side];
        for listener in self.listeners(side) {
            match (listener.as_ref(), connected) {
                (ConnectionListener::Connect(cb), true) => cb(peer_id.as_str()),
                (ConnectionListener::Disconnect(cb), false) => cb(peer_id.as_str()),
                _ => {}
            }
        }
    }
}

/// Create a link between a peer known as `a_peer_id` and one known as `b_peer_id`.
/// The link starts disconnected.
pub fn memory_link(a_peer_id: &str, b_peer_id: &str) -> (MemoryConnection, MemoryConnection) {
    let state = Arc::new(LinkState {
        connected: AtomicBool::new(false),
        ends: [
            Mutex::new(IndexedEvents::new()),
            Mutex::new(IndexedEvents::new()),
        ],
        peer_ids: [a_peer_id.to_string(), b_peer_id.to_string()],
    });
    (
        MemoryConnection { side: 0, state: Arc::clone(&state) },
        MemoryConnection { side: 1, state },
    )
}

#[derive(Clone)]
pub struct MemoryConnection {
    side: usize,
    state: Arc<LinkState>,
}

impl MemoryConnection {
    /// Peer id of the opposite end, as seen from this end.
    pub fn remote_peer_id(&self) -> &str {
        &self.state.peer_ids[1 - self.side]
    }

    /// Bring the link up; both ends report the opposite peer as connected.
    pub fn connect(&self) {
        if self.state.connected.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.emit_status(0, true);
        self.state.emit_status(1, true);
    }

    pub fn disconnect(&self) {
        if !self.state.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.state.emit_status(0, false);
        self.state.emit_status(1, false);
    }

    fn add(&self, listener: ConnectionListener) -> ListenerId {
        self.state.ends[self.side]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add_listener(Arc::new(listener))
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&self, peer_id: &str, port: u8, payload: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(MeshError::Transport(format!(
                "memory link to \"{}\" is down",
                self.remote_peer_id()
            )));
        }
        if peer_id != self.remote_peer_id() {
            return Err(MeshError::PeerNotConnected(peer_id.to_string()));
        }

        let remote = 1 - self.side;
        let sender_id = self.state.peer_ids[self.side].as_str();
        for listener in self.state.listeners(remote) {
            if let ConnectionListener::Message(cb) = listener.as_ref() {
                cb(sender_id, port, &payload);
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    fn on_income_message(&self, cb: Arc<IncomeMessageHandler>) -> ListenerId {
        self.add(ConnectionListener::Message(cb))
    }

    fn on_connect(&self, cb: Arc<PeerStatusHandler>) -> ListenerId {
        self.add(ConnectionListener::Connect(cb))
    }

    fn on_disconnect(&self, cb: Arc<PeerStatusHandler>) -> ListenerId {
        self.add(ConnectionListener::Disconnect(cb))
    }

    fn remove_listener(&self, id: ListenerId) {
        self.state.ends[self.side]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove_listener(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_cross_the_link() {
        let (a, b) = memory_link("peer-a", "peer-b");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        b.on_income_message(Arc::new(move |peer: &str, port: u8, payload: &Bytes| {
            sink.lock().unwrap().push((peer.to_string(), port, payload.clone()));
        }));

        assert!(a.send("peer-b", 7, Bytes::from_static(b"x")).await.is_err());
        a.connect();
        a.send("peer-b", 7, Bytes::from_static(b"x")).await.unwrap();
        assert!(matches!(
            a.send("peer-z", 7, Bytes::new()).await,
            Err(MeshError::PeerNotConnected(_))
        ));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], ("peer-a".to_string(), 7, Bytes::from_static(b"x")));
    }

    #[test]
    fn test_connect_and_disconnect_are_reported_once() {
        let (a, b) = memory_link("peer-a", "peer-b");
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = Arc::clone(&log);
        a.on_connect(Arc::new(move |p: &str| l.lock().unwrap().push(format!("a+{}", p))));
        let l = Arc::clone(&log);
        b.on_connect(Arc::new(move |p: &str| l.lock().unwrap().push(format!("b+{}", p))));
        let l = Arc::clone(&log);
        let id = b.on_disconnect(Arc::new(move |p: &str| l.lock().unwrap().push(format!("b-{}", p))));

        a.connect();
        b.connect();
        assert!(a.is_connected() && b.is_connected());
        b.remove_listener(id);
        a.disconnect();
        a.disconnect();

        assert_eq!(*log.lock().unwrap(), vec!["a+peer-b", "b+peer-a"]);
        assert!(!b.is_connected());
    }
}
