// =============================================================================
// MESH CORE: peer_connections.rs
// Many transport connections presented as one peer-addressable connection
// =============================================================================
//
// Each sub-connection reports its own directly reachable peers. The first
// activity of a peer on a connection records that connection as the owner;
// the same peer showing up on another connection before a disconnect is a
// consistency error and is never silently reassigned.
//
// Transport callbacks only push raw `PeerEvent`s into a channel. The owner of
// `PeerConnections` drains that channel and passes every event through
// `handle_link_event`, which keeps the ownership table and yields the merged
// stream.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::connection::Connection;
use crate::error::{MeshError, Result};
use crate::events::ListenerId;

/// Event of one peer on one named connection.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Message {
        connection: String,
        peer_id: String,
        port: u8,
        payload: Bytes,
    },
    Connected {
        connection: String,
        peer_id: String,
    },
    Disconnected {
        connection: String,
        peer_id: String,
    },
}

impl PeerEvent {
    pub fn peer_id(&self) -> &str {
        match self {
            PeerEvent::Message { peer_id, .. }
            | PeerEvent::Connected { peer_id, .. }
            | PeerEvent::Disconnected { peer_id, .. } => peer_id,
        }
    }

    pub fn connection(&self) -> &str {
        match self {
            PeerEvent::Message { connection, .. }
            | PeerEvent::Connected { connection, .. }
            | PeerEvent::Disconnected { connection, .. } => connection,
        }
    }
}

struct NamedConnection {
    name: String,
    connection: Arc<dyn Connection>,
    listener_ids: Vec<ListenerId>,
}

pub struct PeerConnections {
    connections: Vec<NamedConnection>,
    /// peerId → name of the owning connection
    active_peers: HashMap<String, String>,
}

impl PeerConnections {
    pub fn new(connections: Vec<(String, Arc<dyn Connection>)>) -> Result<Self> {
        let mut named: Vec<NamedConnection> = Vec::with_capacity(connections.len());
        for (name, connection) in connections {
            if named.iter().any(|c| c.name == name) {
                return Err(MeshError::Config(format!(
                    "connection \"{}\" is configured twice",
                    name
                )));
            }
            named.push(NamedConnection {
                name,
                connection,
                listener_ids: Vec::new(),
            });
        }
        Ok(PeerConnections {
            connections: named,
            active_peers: HashMap::new(),
        })
    }

    /// Subscribe to message, connect and disconnect events of every
    /// sub-connection. Raw events are tagged with the connection name.
    pub fn init(&mut self, events: mpsc::UnboundedSender<PeerEvent>) {
        for named in &mut self.connections {
            let name = named.name.clone();
            let tx = events.clone();
            let on_message = named.connection.on_income_message(Arc::new(
                move |peer_id: &str, port: u8, payload: &Bytes| {
                    let _ = tx.send(PeerEvent::Message {
                        connection: name.clone(),
                        peer_id: peer_id.to_string(),
                        port,
                        payload: payload.clone(),
                    });
                },
            ));

            let name = named.name.clone();
            let tx = events.clone();
            let on_connect = named.connection.on_connect(Arc::new(move |peer_id: &str| {
                let _ = tx.send(PeerEvent::Connected {
                    connection: name.clone(),
                    peer_id: peer_id.to_string(),
                });
            }));

            let name = named.name.clone();
            let tx = events.clone();
            let on_disconnect = named.connection.on_disconnect(Arc::new(move |peer_id: &str| {
                let _ = tx.send(PeerEvent::Disconnected {
                    connection: name.clone(),
                    peer_id: peer_id.to_string(),
                });
            }));

            named.listener_ids = vec![on_message, on_connect, on_disconnect];
        }
    }

    /// Unsubscribe from all sub-connections and forget every peer.
    pub fn destroy(&mut self) {
        for named in &mut self.connections {
            for id in named.listener_ids.drain(..) {
                named.connection.remove_listener(id);
            }
        }
        self.active_peers.clear();
    }

    /// Send through whichever connection currently owns `peer_id`. A link
    /// that reports itself down fails with `Transport` before any send.
    pub async fn send(&self, peer_id: &str, port: u8, payload: Bytes) -> Result<()> {
        let name = self
            .resolve_connection_name(peer_id)
            .ok_or_else(|| MeshError::PeerNotConnected(peer_id.to_string()))?;
        let named = self
            .connections
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| MeshError::Transport(format!("Can't find connection \"{}\"", name)))?;
        if !named.connection.is_connected() {
            return Err(MeshError::Transport(format!(
                "connection \"{}\" of peer \"{}\" is down",
                name, peer_id
            )));
        }

        named.connection.send(peer_id, port, payload).await
    }

    pub fn resolve_connection_name(&self, peer_id: &str) -> Option<&str> {
        self.active_peers.get(peer_id).map(String::as_str)
    }

    pub fn connection_names(&self) -> Vec<String> {
        self.connections.iter().map(|c| c.name.clone()).collect()
    }

    /// Connected peers with their owning connection, sorted by peer id.
    pub fn active_peers(&self) -> Vec<(String, String)> {
        let mut peers: Vec<(String, String)> = self
            .active_peers
            .iter()
            .map(|(p, c)| (p.clone(), c.clone()))
            .collect();
        peers.sort();
        peers
    }

    /// Apply a raw event and return the merged events it produces: a first
    /// message from a peer yields `Connected` followed by `Message`, repeated
    /// connects yield nothing.
    pub fn handle_link_event(&mut self, event: PeerEvent) -> Result<Vec<PeerEvent>> {
        match event {
            PeerEvent::Message { ref connection, ref peer_id, .. } => {
                let mut out = Vec::with_capacity(2);
                if self.activate_peer(peer_id, connection)? {
                    out.push(PeerEvent::Connected {
                        connection: connection.clone(),
                        peer_id: peer_id.clone(),
                    });
                }
                out.push(event);
                Ok(out)
            }
            PeerEvent::Connected { ref connection, ref peer_id } => {
                if self.activate_peer(peer_id, connection)? {
                    Ok(vec![event])
                } else {
                    Ok(vec![])
                }
            }
            PeerEvent::Disconnected { ref connection, ref peer_id } => {
                if self.deactivate_peer(peer_id, connection) {
                    Ok(vec![event])
                } else {
                    Ok(vec![])
                }
            }
        }
    }

    /// Returns true if the peer was not registered before.
    fn activate_peer(&mut self, peer_id: &str, connection: &str) -> Result<bool> {
        match self.active_peers.get(peer_id) {
            Some(owner) if owner == connection => Ok(false),
            Some(owner) => Err(MeshError::PeerConflict {
                peer_id: peer_id.to_string(),
                owner: owner.clone(),
                claimant: connection.to_string(),
            }),
            None => {
                self.active_peers
                    .insert(peer_id.to_string(), connection.to_string());
                Ok(true)
            }
        }
    }

    fn deactivate_peer(&mut self, peer_id: &str, connection: &str) -> bool {
        match self.active_peers.get(peer_id) {
            Some(owner) if owner == connection => {
                self.active_peers.remove(peer_id);
                true
            }
            Some(owner) => {
                log::warn!(
                    "Disconnect of peer {} reported by {} but it is owned by {}",
                    peer_id,
                    connection,
                    owner
                );
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::memory_link;
    use std::sync::Mutex;

    fn msg(connection: &str, peer_id: &str) -> PeerEvent {
        PeerEvent::Message {
            connection: connection.into(),
            peer_id: peer_id.into(),
            port: 1,
            payload: Bytes::from_static(b"hi"),
        }
    }

    fn empty() -> PeerConnections {
        PeerConnections::new(vec![]).unwrap()
    }

    #[test]
    fn test_first_message_activates_peer() {
        let mut pc = empty();
        let out = pc.handle_link_event(msg("ws", "p1")).unwrap();
        assert_eq!(
            out,
            vec![
                PeerEvent::Connected { connection: "ws".into(), peer_id: "p1".into() },
                msg("ws", "p1"),
            ]
        );
        assert_eq!(pc.resolve_connection_name("p1"), Some("ws"));

        let out = pc.handle_link_event(msg("ws", "p1")).unwrap();
        assert_eq!(out, vec![msg("ws", "p1")]);

        let again = PeerEvent::Connected { connection: "ws".into(), peer_id: "p1".into() };
        assert!(pc.handle_link_event(again).unwrap().is_empty());
    }

    #[test]
    fn test_peer_on_second_connection_is_conflict() {
        let mut pc = empty();
        pc.handle_link_event(msg("ws", "p1")).unwrap();

        let err = pc.handle_link_event(msg("serial", "p1")).unwrap_err();
        assert_eq!(
            err,
            MeshError::PeerConflict {
                peer_id: "p1".into(),
                owner: "ws".into(),
                claimant: "serial".into(),
            }
        );
        assert_eq!(pc.resolve_connection_name("p1"), Some("ws"));

        // a foreign disconnect does not release the peer
        let foreign = PeerEvent::Disconnected { connection: "serial".into(), peer_id: "p1".into() };
        assert!(pc.handle_link_event(foreign).unwrap().is_empty());
        assert_eq!(pc.resolve_connection_name("p1"), Some("ws"));

        let own = PeerEvent::Disconnected { connection: "ws".into(), peer_id: "p1".into() };
        assert_eq!(pc.handle_link_event(own.clone()).unwrap(), vec![own]);
        assert_eq!(pc.resolve_connection_name("p1"), None);

        // after the disconnect another connection may take the peer
        assert_eq!(pc.handle_link_event(msg("serial", "p1")).unwrap().len(), 2);
        assert_eq!(pc.active_peers(), vec![("p1".to_string(), "serial".to_string())]);
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer() {
        let pc = empty();
        assert_eq!(
            pc.send("ghost", 254, Bytes::new()).await,
            Err(MeshError::PeerNotConnected("ghost".into()))
        );
    }

    #[tokio::test]
    async fn test_send_over_down_link() {
        let (local, _remote) = memory_link("me", "neighbour");
        let mut pc = PeerConnections::new(vec![(
            "mem-0".to_string(),
            Arc::new(local) as Arc<dyn Connection>,
        )])
        .unwrap();
        pc.handle_link_event(msg("mem-0", "neighbour")).unwrap();

        let err = pc.send("neighbour", 254, Bytes::new()).await.unwrap_err();
        match err {
            MeshError::Transport(text) => assert!(text.contains("mem-0")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_connection_name() {
        let (a, b) = memory_link("x", "y");
        let res = PeerConnections::new(vec![
            ("link".to_string(), Arc::new(a) as Arc<dyn Connection>),
            ("link".to_string(), Arc::new(b) as Arc<dyn Connection>),
        ]);
        assert!(matches!(res, Err(MeshError::Config(_))));
    }

    #[tokio::test]
    async fn test_events_are_tagged_and_send_is_delegated() {
        let (local, remote) = memory_link("me", "neighbour");
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        remote.on_income_message(Arc::new(move |peer: &str, port: u8, payload: &Bytes| {
            sink.lock().unwrap().push((peer.to_string(), port, payload.clone()));
        }));

        let mut pc = PeerConnections::new(vec![(
            "mem-0".to_string(),
            Arc::new(local.clone()) as Arc<dyn Connection>,
        )])
        .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        pc.init(tx);

        local.connect();
        let raw = rx.recv().await.unwrap();
        assert_eq!(raw.connection(), "mem-0");
        assert_eq!(raw.peer_id(), "neighbour");
        assert_eq!(pc.handle_link_event(raw).unwrap().len(), 1);

        pc.send("neighbour", 9, Bytes::from_static(b"on")).await.unwrap();
        assert_eq!(
            *received.lock().unwrap(),
            vec![("me".to_string(), 9, Bytes::from_static(b"on"))]
        );

        remote
            .send("me", 3, Bytes::from_static(b"back"))
            .await
            .unwrap();
        assert!(matches!(rx.recv().await.unwrap(), PeerEvent::Message { port: 3, .. }));

        pc.destroy();
        remote.send("me", 3, Bytes::new()).await.unwrap();
        local.disconnect();
        assert!(rx.try_recv().is_err());
        assert!(pc.active_peers().is_empty());
    }
}
