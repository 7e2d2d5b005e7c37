// =============================================================================
// MESH CORE: router.rs
// Hop-by-hop send / receive / forward
// =============================================================================
//
// Outbound: build a message with completeRoute=[me], resolve the next hop
// and the peer behind it, hand the encoded frame to PeerConnections.
//
// Inbound (mesh port only): decode, learn the route and the peer of the
// bearer, then either deliver locally or forward with TTL-1 and ourselves
// appended to completeRoute. A message whose TTL runs out at a relaying host
// is logged and dropped; nobody is told.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;

use crate::codec::{decode, encode, NetworkMessage};
use crate::config::HostConfig;
use crate::constants::{MESSAGE_ID_LENGTH, NETWORK_PORT};
use crate::error::{MeshError, Result};
use crate::events::{IndexedEvents, ListenerId};
use crate::peer_connections::{PeerConnections, PeerEvent};
use crate::route_resolver::RouteResolver;

pub type IncomeMessageListener = dyn Fn(&NetworkMessage) + Send + Sync;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub received: u64,
    pub delivered: u64,
    pub forwarded: u64,
    pub dropped_ttl: u64,
    pub dropped_malformed: u64,
    pub dropped_unroutable: u64,
    pub foreign_port: u64,
}

pub struct Router {
    my_id: String,
    default_ttl: u8,
    static_peers: HashMap<String, String>,
    resolver: RouteResolver,
    peers: PeerConnections,
    income_events: IndexedEvents<IncomeMessageListener>,
    stats: RouterStats,
}

impl Router {
    pub fn new(config: &HostConfig, peers: PeerConnections) -> Self {
        let mut resolver = RouteResolver::new(&config.host_id);
        for route in &config.static_routes {
            resolver.set_route(route.clone());
        }
        Router {
            my_id: config.host_id.clone(),
            default_ttl: config.default_ttl,
            static_peers: config.static_peers.clone(),
            resolver,
            peers,
            income_events: IndexedEvents::new(),
            stats: RouterStats::default(),
        }
    }

    pub fn my_id(&self) -> &str {
        &self.my_id
    }

    /// Fresh id for a new logical request. Its response reuses it.
    pub fn new_message_id() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(MESSAGE_ID_LENGTH)
            .map(char::from)
            .collect()
    }

    pub fn on_income_message(&mut self, cb: Arc<IncomeMessageListener>) -> ListenerId {
        self.income_events.add_listener(cb)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.income_events.remove_listener(id)
    }

    pub fn clear_listeners(&mut self) {
        self.income_events.clear();
    }

    /// Send a new message and don't wait for anything in return.
    /// Without `ttl` the configured default is used.
    pub async fn send(
        &self,
        to_host_id: &str,
        uri: &str,
        payload: Bytes,
        message_id: &str,
        ttl: Option<u8>,
    ) -> Result<()> {
        let message = NetworkMessage {
            ttl: ttl.unwrap_or(self.default_ttl),
            message_id: message_id.to_string(),
            uri: uri.to_string(),
            to: to_host_id.to_string(),
            complete_route: vec![self.my_id.clone()],
            payload,
        };
        let encoded = encode(&message)?;
        self.send_to_peer(to_host_id, encoded).await
    }

    /// Apply one event of the merged peer stream. Returns the message if it
    /// was addressed to this host.
    pub async fn handle_peer_event(&mut self, event: PeerEvent) -> Option<NetworkMessage> {
        match event {
            PeerEvent::Message { peer_id, port, payload, .. } => {
                if port != NETWORK_PORT {
                    self.stats.foreign_port += 1;
                    return None;
                }
                self.handle_income_message(&peer_id, &payload).await
            }
            PeerEvent::Connected { connection, peer_id } => {
                log::info!("[{}] peer {} connected via {}", self.my_id, peer_id, connection);
                self.seed_static_peer(&peer_id);
                None
            }
            PeerEvent::Disconnected { connection, peer_id } => {
                log::info!("[{}] peer {} disconnected from {}", self.my_id, peer_id, connection);
                self.resolver.deactivate_peer(&peer_id);
                None
            }
        }
    }

    async fn handle_income_message(&mut self, peer_id: &str, raw: &[u8]) -> Option<NetworkMessage> {
        self.stats.received += 1;
        let message = match decode(raw) {
            Ok(m) => m,
            Err(e) => {
                self.stats.dropped_malformed += 1;
                log::warn!("[{}] malformed message from peer {}: {}", self.my_id, peer_id, e);
                return None;
            }
        };

        if let Err(e) = self.resolver.save_route(&message.complete_route) {
            log::warn!("[{}] route not saved: {}", self.my_id, e);
        }
        if let Some(bearer) = message.bearer() {
            self.resolver.activate_peer(peer_id, bearer);
        }
        log::debug!(
            "[{}] learned route to {:?} via peer {}",
            self.my_id,
            message.originator(),
            peer_id
        );

        if message.to != self.my_id {
            match self.forward(&message).await {
                Ok(()) => self.stats.forwarded += 1,
                Err(MeshError::TtlExceeded(_)) => {
                    self.stats.dropped_ttl += 1;
                    log::warn!(
                        "[{}] TTL of network message has been exceeded: {}",
                        self.my_id,
                        message.summary()
                    );
                }
                Err(e) => {
                    self.stats.dropped_unroutable += 1;
                    log::error!(
                        "[{}] can't forward message {} to {}: {}",
                        self.my_id,
                        message.message_id,
                        message.to,
                        e
                    );
                }
            }
            return None;
        }

        self.stats.delivered += 1;
        for listener in self.income_events.listeners() {
            listener(&message);
        }
        Some(message)
    }

    /// Relay a message addressed to another host.
    async fn forward(&self, message: &NetworkMessage) -> Result<()> {
        let ttl = message.ttl.saturating_sub(1);
        if ttl == 0 {
            return Err(MeshError::TtlExceeded(message.message_id.clone()));
        }

        let mut complete_route = message.complete_route.clone();
        complete_route.push(self.my_id.clone());
        let relayed = NetworkMessage {
            ttl,
            complete_route,
            ..message.clone()
        };

        let encoded = encode(&relayed)?;
        log::debug!(
            "[{}] forwarding {} to {} (ttl {})",
            self.my_id,
            relayed.message_id,
            relayed.to,
            ttl
        );
        self.send_to_peer(&relayed.to, encoded).await
    }

    async fn send_to_peer(&self, to: &str, encoded: Bytes) -> Result<()> {
        let closest_host_id = self.resolver.resolve_closest_host_id(to)?;
        let peer_id = self.resolver.resolve_peer_id(closest_host_id)?;
        self.peers.send(peer_id, NETWORK_PORT, encoded).await
    }

    fn seed_static_peer(&mut self, peer_id: &str) {
        let Some(host_id) = self.static_peers.get(peer_id).cloned() else {
            return;
        };
        self.resolver.activate_peer(peer_id, &host_id);
        if !self.resolver.has_route(&host_id) {
            self.resolver.set_route(vec![host_id]);
        }
    }

    pub fn peers(&self) -> &PeerConnections {
        &self.peers
    }

    pub fn peers_mut(&mut self) -> &mut PeerConnections {
        &mut self.peers
    }

    pub fn resolver(&self) -> &RouteResolver {
        &self.resolver
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::memory::{memory_link, MemoryConnection};
    use std::sync::Mutex;

    type Captured = Arc<Mutex<Vec<NetworkMessage>>>;

    /// Router "B" with one link to a remote end whose frames are captured.
    fn router_with_link(config: HostConfig) -> (Router, MemoryConnection, Captured) {
        let (local, remote) = memory_link("peer-b", "peer-x");
        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        remote.on_income_message(Arc::new(move |_: &str, _: u8, payload: &Bytes| {
            sink.lock().unwrap().push(decode(payload).unwrap());
        }));
        local.connect();

        let peers = PeerConnections::new(vec![(
            "mem".to_string(),
            Arc::new(local) as Arc<dyn Connection>,
        )])
        .unwrap();
        (Router::new(&config, peers), remote, captured)
    }

    fn frame(message: &NetworkMessage) -> PeerEvent {
        PeerEvent::Message {
            connection: "mem".into(),
            peer_id: "peer-x".into(),
            port: NETWORK_PORT,
            payload: encode(message).unwrap(),
        }
    }

    fn message(to: &str, ttl: u8, route: &[&str]) -> NetworkMessage {
        NetworkMessage {
            ttl,
            message_id: "msg00001".into(),
            uri: "switch".into(),
            to: to.into(),
            complete_route: route.iter().map(|s| s.to_string()).collect(),
            payload: Bytes::from_static(b"on"),
        }
    }

    async fn feed(router: &mut Router, event: PeerEvent) -> Option<NetworkMessage> {
        for merged in router.peers_mut().handle_link_event(event).unwrap() {
            if let Some(m) = router.handle_peer_event(merged).await {
                return Some(m);
            }
        }
        None
    }

    #[test]
    fn test_message_ids() {
        let a = Router::new_message_id();
        let b = Router::new_message_id();
        assert_eq!(a.len(), MESSAGE_ID_LENGTH);
        assert!(a.bytes().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_send_without_route() {
        let (router, _remote, _) = router_with_link(HostConfig::new("B"));
        let res = router.send("Z", "switch", Bytes::new(), "msg00001", None).await;
        assert_eq!(res, Err(MeshError::NoRoute("Z".into())));
    }

    #[tokio::test]
    async fn test_send_with_route_but_no_peer() {
        let config = HostConfig::new("B").with_static_route(&["X", "Z"]);
        let (router, _remote, _) = router_with_link(config);
        let res = router.send("Z", "switch", Bytes::new(), "msg00001", None).await;
        assert_eq!(res, Err(MeshError::NoPeer("X".into())));
    }

    #[tokio::test]
    async fn test_local_delivery_learns_route() {
        let (mut router, _remote, captured) = router_with_link(HostConfig::new("B"));
        let sniffed = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&sniffed);
        let id = router.on_income_message(Arc::new(move |_: &NetworkMessage| {
            *counter.lock().unwrap() += 1;
        }));

        let got = feed(&mut router, frame(&message("B", 3, &["A", "X"]))).await;
        assert_eq!(got.unwrap().uri, "switch");
        assert_eq!(*sniffed.lock().unwrap(), 1);
        assert_eq!(router.resolver().resolve_closest_host_id("A").unwrap(), "X");
        assert_eq!(router.resolver().resolve_peer_id("X").unwrap(), "peer-x");

        // the learned route is usable right away
        router
            .send("A", "0", Bytes::from_static(b"ok"), "msg00001", Some(4))
            .await
            .unwrap();
        let sent = captured.lock().unwrap().pop().unwrap();
        assert_eq!(sent.complete_route, vec!["B".to_string()]);
        assert_eq!(sent.ttl, 4);
        assert_eq!(sent.to, "A");

        assert!(router.remove_listener(id));
        assert_eq!(router.stats().delivered, 1);
    }

    #[tokio::test]
    async fn test_forward_appends_bearer_and_decrements_ttl() {
        let config = HostConfig::new("B");
        let (mut router, _remote, captured) = router_with_link(config);
        // learn that C sits behind peer-x
        feed(&mut router, frame(&message("B", 3, &["C", "X"]))).await;

        let got = feed(&mut router, frame(&message("C", 5, &["A", "X"]))).await;
        assert!(got.is_none());

        let relayed = captured.lock().unwrap().pop().unwrap();
        assert_eq!(relayed.ttl, 4);
        assert_eq!(
            relayed.complete_route,
            vec!["A".to_string(), "X".to_string(), "B".to_string()]
        );
        assert_eq!(relayed.message_id, "msg00001");
        assert_eq!(relayed.payload, Bytes::from_static(b"on"));
        assert_eq!(router.stats().forwarded, 1);
    }

    #[tokio::test]
    async fn test_ttl_exhausted_is_dropped_silently() {
        let (mut router, _remote, captured) = router_with_link(HostConfig::new("B"));
        feed(&mut router, frame(&message("B", 3, &["C", "X"]))).await;

        let got = feed(&mut router, frame(&message("C", 1, &["A", "X"]))).await;
        assert!(got.is_none());
        assert!(captured.lock().unwrap().is_empty());
        assert_eq!(router.stats().dropped_ttl, 1);
        assert_eq!(router.stats().forwarded, 0);
    }

    #[tokio::test]
    async fn test_garbage_and_foreign_ports_are_ignored() {
        let (mut router, _remote, _) = router_with_link(HostConfig::new("B"));
        let garbage = PeerEvent::Message {
            connection: "mem".into(),
            peer_id: "peer-x".into(),
            port: NETWORK_PORT,
            payload: Bytes::from_static(&[1, 2, 3]),
        };
        assert!(feed(&mut router, garbage).await.is_none());

        let other_port = PeerEvent::Message {
            connection: "mem".into(),
            peer_id: "peer-x".into(),
            port: 7,
            payload: encode(&message("B", 3, &["A"])).unwrap(),
        };
        assert!(feed(&mut router, other_port).await.is_none());

        let stats = router.stats();
        assert_eq!(stats.dropped_malformed, 1);
        assert_eq!(stats.foreign_port, 1);
        assert_eq!(stats.delivered, 0);
    }

    #[tokio::test]
    async fn test_static_peer_seeded_on_connect_and_cleared_on_disconnect() {
        let config = HostConfig::new("B").with_static_peer("peer-x", "X");
        let (mut router, _remote, _) = router_with_link(config);

        let connected = PeerEvent::Connected { connection: "mem".into(), peer_id: "peer-x".into() };
        feed(&mut router, connected).await;
        assert_eq!(router.resolver().resolve_closest_host_id("X").unwrap(), "X");
        assert_eq!(router.resolver().resolve_peer_id("X").unwrap(), "peer-x");

        let gone = PeerEvent::Disconnected { connection: "mem".into(), peer_id: "peer-x".into() };
        feed(&mut router, gone).await;
        assert!(router.resolver().resolve_peer_id("X").is_err());
        // the route itself is never expired
        assert!(router.resolver().has_route("X"));
    }
}
