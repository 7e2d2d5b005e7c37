//! Mesh error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No route to host \"{0}\"")]
    NoRoute(String),

    #[error("Can't resolve peer of host \"{0}\"")]
    NoPeer(String),

    #[error("Peer \"{0}\" hasn't been connected")]
    PeerNotConnected(String),

    #[error("Handler of uri \"{0}\" has already been defined")]
    DuplicateHandler(String),

    #[error("Peer {peer_id} has different connection. Last is {owner}, new is {claimant}")]
    PeerConflict {
        peer_id: String,
        owner: String,
        claimant: String,
    },

    #[error("Timeout of request has been exceeded of URI \"{0}\"")]
    RequestTimeout(String),

    /// Text sent back by the remote host in an "error" response.
    #[error("{0}")]
    RemoteHandler(String),

    #[error("Unknown response URI \"{0}\"")]
    UnknownResponse(String),

    /// Only ever logged at the forwarding hop, never reported to the sender.
    #[error("TTL of network message {0} has been exceeded")]
    TtlExceeded(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Host has been shut down")]
    HostClosed,
}

pub type Result<T> = std::result::Result<T, MeshError>;
