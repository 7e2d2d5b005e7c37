// =============================================================================
// MESH CORE: route_resolver.rs
// Passive routing table
// =============================================================================
//
// Two tables, both fed only by observed traffic and link events:
//   routes            : remote hostId → [next hop, ..., remote hostId]
//   closest_host_ids  : peerId → hostId of the directly reachable host
//
// Nothing is ever expired. A route lives until newer traffic overwrites it.
// =============================================================================

use std::collections::HashMap;

use crate::error::{MeshError, Result};

pub struct RouteResolver {
    my_host_id: String,
    routes: HashMap<String, Vec<String>>,
    /// Kept in activation order; lookups by host return the first match.
    closest_host_ids: Vec<(String, String)>,
}

impl RouteResolver {
    pub fn new(my_host_id: &str) -> Self {
        RouteResolver {
            my_host_id: my_host_id.to_string(),
            routes: HashMap::new(),
            closest_host_ids: Vec::new(),
        }
    }

    /// Save the route of an income message. `complete_route` runs from the
    /// originator to the bearer, so reversed it runs from us to the originator.
    pub fn save_route(&mut self, complete_route: &[String]) -> Result<()> {
        if complete_route.is_empty() {
            return Err(MeshError::Validation("completeRoute is empty".into()));
        }
        let route: Vec<String> = complete_route.iter().rev().cloned().collect();
        self.set_route(route);
        Ok(())
    }

    /// Store `route` (next hop first) as the route to its last element.
    /// Last write wins.
    pub fn set_route(&mut self, route: Vec<String>) {
        let Some(remote_host) = route.last().cloned() else {
            return;
        };
        if remote_host == self.my_host_id {
            // our own message came back around
            return;
        }
        self.routes.insert(remote_host, route);
    }

    pub fn has_route(&self, to: &str) -> bool {
        self.routes.contains_key(to)
    }

    pub fn route_to(&self, to: &str) -> Option<&[String]> {
        self.routes.get(to).map(Vec::as_slice)
    }

    /// First hop on the way to `to`.
    pub fn resolve_closest_host_id(&self, to: &str) -> Result<&str> {
        self.routes
            .get(to)
            .and_then(|route| route.first())
            .map(String::as_str)
            .ok_or_else(|| MeshError::NoRoute(to.to_string()))
    }

    pub fn activate_peer(&mut self, peer_id: &str, host_id: &str) {
        match self.closest_host_ids.iter_mut().find(|(p, _)| p == peer_id) {
            Some(entry) => entry.1 = host_id.to_string(),
            None => self
                .closest_host_ids
                .push((peer_id.to_string(), host_id.to_string())),
        }
    }

    /// Returns the host that was reachable behind the peer.
    pub fn deactivate_peer(&mut self, peer_id: &str) -> Option<String> {
        let idx = self.closest_host_ids.iter().position(|(p, _)| p == peer_id)?;
        Some(self.closest_host_ids.remove(idx).1)
    }

    /// Reverse lookup hostId → peerId. If several peers lead to the same host
    /// the earliest activated one wins.
    pub fn resolve_peer_id(&self, closest_host_id: &str) -> Result<&str> {
        self.closest_host_ids
            .iter()
            .find(|(_, h)| h == closest_host_id)
            .map(|(p, _)| p.as_str())
            .ok_or_else(|| MeshError::NoPeer(closest_host_id.to_string()))
    }

    pub fn routes(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.routes.iter()
    }

    pub fn active_peers(&self) -> &[(String, String)] {
        &self.closest_host_ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_save_route_reverses() {
        let mut r = RouteResolver::new("me");
        r.save_route(&route(&["A", "B", "C"])).unwrap();
        assert_eq!(r.resolve_closest_host_id("A").unwrap(), "C");
        assert_eq!(r.route_to("A").unwrap(), route(&["C", "B", "A"]).as_slice());
    }

    #[test]
    fn test_last_write_wins() {
        let mut r = RouteResolver::new("me");
        r.save_route(&route(&["A", "B", "C"])).unwrap();
        r.save_route(&route(&["A", "D"])).unwrap();
        assert_eq!(r.resolve_closest_host_id("A").unwrap(), "D");
    }

    #[test]
    fn test_unknown_destination_is_no_route() {
        let r = RouteResolver::new("me");
        assert_eq!(
            r.resolve_closest_host_id("nowhere"),
            Err(MeshError::NoRoute("nowhere".into()))
        );
        assert!(!r.has_route("nowhere"));
    }

    #[test]
    fn test_empty_route_rejected() {
        let mut r = RouteResolver::new("me");
        assert!(r.save_route(&[]).is_err());
    }

    #[test]
    fn test_own_host_not_stored() {
        let mut r = RouteResolver::new("me");
        r.save_route(&route(&["me", "B"])).unwrap();
        assert!(!r.has_route("me"));
        assert_eq!(r.routes().count(), 0);
    }

    #[test]
    fn test_peer_activation() {
        let mut r = RouteResolver::new("me");
        assert_eq!(r.resolve_peer_id("B"), Err(MeshError::NoPeer("B".into())));

        r.activate_peer("ws-1", "B");
        r.activate_peer("serial-0", "B");
        r.activate_peer("i2c-3", "C");
        assert_eq!(r.resolve_peer_id("B").unwrap(), "ws-1");
        assert_eq!(r.resolve_peer_id("C").unwrap(), "i2c-3");

        assert_eq!(r.deactivate_peer("ws-1"), Some("B".to_string()));
        assert_eq!(r.resolve_peer_id("B").unwrap(), "serial-0");
        assert_eq!(r.deactivate_peer("ws-1"), None);

        r.activate_peer("i2c-3", "D");
        assert!(r.resolve_peer_id("C").is_err());
        assert_eq!(r.active_peers().len(), 2);
    }
}
