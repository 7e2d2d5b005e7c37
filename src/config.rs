// =============================================================================
// MESH CORE: config.rs
// Per-host configuration
// =============================================================================

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::constants::{
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_TTL, MAX_FIELD_LENGTH, MAX_REQUEST_TIMEOUT_SECS,
};
use crate::error::{MeshError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    pub host_id: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_ttl")]
    pub default_ttl: u8,
    /// peerId → hostId of neighbours known up front.
    #[serde(default)]
    pub static_peers: HashMap<String, String>,
    /// Preloaded routes, next hop first and destination last.
    #[serde(default)]
    pub static_routes: Vec<Vec<String>>,
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_ttl() -> u8 {
    DEFAULT_TTL
}

impl HostConfig {
    pub fn new(host_id: &str) -> Self {
        HostConfig {
            host_id: host_id.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            default_ttl: DEFAULT_TTL,
            static_peers: HashMap::new(),
            static_routes: Vec::new(),
        }
    }

    pub fn with_static_peer(mut self, peer_id: &str, host_id: &str) -> Self {
        self.static_peers.insert(peer_id.to_string(), host_id.to_string());
        self
    }

    pub fn with_static_route(mut self, route: &[&str]) -> Self {
        self.static_routes
            .push(route.iter().map(|h| h.to_string()).collect());
        self
    }

    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: HostConfig =
            serde_json::from_str(raw).map_err(|e| MeshError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read the config from the environment.
    ///
    /// ```text
    /// MESH_HOST_ID="kitchen"
    /// MESH_REQUEST_TIMEOUT_SECS=30
    /// MESH_DEFAULT_TTL=8
    /// MESH_STATIC_PEERS="ws-1=hall;serial-0=boiler"
    /// MESH_STATIC_ROUTES="hall,garage;hall,attic"
    /// ```
    pub fn from_env() -> Result<Self> {
        let host_id = std::env::var("MESH_HOST_ID")
            .map_err(|_| MeshError::Config("MESH_HOST_ID is not set".into()))?;
        let mut config = HostConfig::new(host_id.trim());

        if let Ok(raw) = std::env::var("MESH_REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = raw.trim().parse().map_err(|_| {
                MeshError::Config(format!("MESH_REQUEST_TIMEOUT_SECS is not a number: {}", raw))
            })?;
        }
        if let Ok(raw) = std::env::var("MESH_DEFAULT_TTL") {
            config.default_ttl = raw.trim().parse().map_err(|_| {
                MeshError::Config(format!("MESH_DEFAULT_TTL has to be 1..255: {}", raw))
            })?;
        }
        if let Ok(raw) = std::env::var("MESH_STATIC_PEERS") {
            config.static_peers = parse_static_peers(&raw);
        }
        if let Ok(raw) = std::env::var("MESH_STATIC_ROUTES") {
            config.static_routes = parse_static_routes(&raw);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host_id.is_empty() || self.host_id.len() > MAX_FIELD_LENGTH {
            return Err(MeshError::Config(format!(
                "host_id has to be 1..{} bytes long",
                MAX_FIELD_LENGTH
            )));
        }
        if self.request_timeout_secs == 0 || self.request_timeout_secs > MAX_REQUEST_TIMEOUT_SECS {
            return Err(MeshError::Config(format!(
                "request_timeout_secs has to be from 1 to {}",
                MAX_REQUEST_TIMEOUT_SECS
            )));
        }
        if self.default_ttl == 0 {
            return Err(MeshError::Config("default_ttl has to be from 1 to 255".into()));
        }
        for route in &self.static_routes {
            if route.is_empty() || route.len() > MAX_FIELD_LENGTH {
                return Err(MeshError::Config(format!("bad static route: {:?}", route)));
            }
            if route.iter().any(|h| h.is_empty() || h.len() > MAX_FIELD_LENGTH) {
                return Err(MeshError::Config(format!("bad host id in route {:?}", route)));
            }
        }
        Ok(())
    }
}

fn parse_static_peers(raw: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for item in raw.split(';') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        match item.split_once('=') {
            Some((peer, host)) if !peer.trim().is_empty() && !host.trim().is_empty() => {
                out.insert(peer.trim().to_string(), host.trim().to_string());
            }
            _ => log::warn!("MESH_STATIC_PEERS entry ignored (need peer=host): {}", item),
        }
    }
    out
}

fn parse_static_routes(raw: &str) -> Vec<Vec<String>> {
    raw.split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| item.split(',').map(|h| h.trim().to_string()).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_defaults() {
        let config = HostConfig::from_json(r#"{"host_id":"kitchen"}"#).unwrap();
        assert_eq!(config, HostConfig::new("kitchen"));
        assert_eq!(config.request_timeout(), Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));
    }

    #[test]
    fn test_json_full() {
        let config = HostConfig::from_json(
            r#"{
                "host_id": "hall",
                "request_timeout_secs": 5,
                "default_ttl": 3,
                "static_peers": {"ws-1": "garage"},
                "static_routes": [["garage", "attic"]]
            }"#,
        )
        .unwrap();
        assert_eq!(config.default_ttl, 3);
        assert_eq!(config.static_peers["ws-1"], "garage");
        assert_eq!(config.static_routes, vec![vec!["garage".to_string(), "attic".to_string()]]);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            HostConfig::from_json(r#"{"host_id":""}"#),
            Err(MeshError::Config(_))
        ));
        assert!(HostConfig::from_json(r#"{"host_id":"a","default_ttl":0}"#).is_err());
        assert!(HostConfig::from_json(r#"{"host_id":"a","default_ttl":256}"#).is_err());
        assert!(HostConfig::new("a").with_request_timeout_secs(0).validate().is_err());
        assert!(HostConfig::new("a")
            .with_request_timeout_secs(100_000_000)
            .validate()
            .is_err());
        assert!(HostConfig::new("a")
            .with_request_timeout_secs(MAX_REQUEST_TIMEOUT_SECS)
            .validate()
            .is_ok());
        assert!(HostConfig::new("a").with_static_route(&[]).validate().is_err());
        assert!(HostConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_env_style_parsers() {
        let peers = parse_static_peers("ws-1=hall; serial-0 = boiler ;broken;");
        assert_eq!(peers.len(), 2);
        assert_eq!(peers["serial-0"], "boiler");

        let routes = parse_static_routes("hall,garage; hall , attic;;");
        assert_eq!(routes[1], vec!["hall".to_string(), "attic".to_string()]);
        assert_eq!(routes.len(), 2);
    }
}
