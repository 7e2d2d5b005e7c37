//! Wire-level constants shared by every mesh host.
//!
//! Both ends of a link must agree on these values exactly, so they are
//! never configurable.

/// Connection port reserved for mesh traffic. Ports 0..=253 belong to
/// other users of the same physical link.
pub const NETWORK_PORT: u8 = 254;

/// Exact length of a message id, in bytes.
pub const MESSAGE_ID_LENGTH: usize = 8;

/// Upper bound for every length-prefixed field and for the route length.
pub const MAX_FIELD_LENGTH: usize = 255;

/// TTL used when the caller does not pass one.
pub const DEFAULT_TTL: u8 = 10;

/// How long `request()` waits for a response by default.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Longest accepted request timeout (30 days). The request timer wheel
/// cannot hold delays beyond roughly two years.
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 30 * 24 * 60 * 60;

// ═══════════════════════════════════════════════════════════════
// Reserved response URIs
// ═══════════════════════════════════════════════════════════════

/// Single-character URIs reserved for responses.
///
/// On the wire each one is the decimal digit of its discriminant, so a
/// response never collides with a request URI (those are at least two
/// characters long).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialUri {
    ResponseOk = 0,
    ResponseError = 1,
    GetName = 2,
    Ping = 3,
    Pong = 4,
}

impl SpecialUri {
    pub fn as_uri(self) -> &'static str {
        match self {
            SpecialUri::ResponseOk => "0",
            SpecialUri::ResponseError => "1",
            SpecialUri::GetName => "2",
            SpecialUri::Ping => "3",
            SpecialUri::Pong => "4",
        }
    }

    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            "0" => Some(SpecialUri::ResponseOk),
            "1" => Some(SpecialUri::ResponseError),
            "2" => Some(SpecialUri::GetName),
            "3" => Some(SpecialUri::Ping),
            "4" => Some(SpecialUri::Pong),
            _ => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Banner
// ═══════════════════════════════════════════════════════════════

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn print_banner() {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║                 MESH CORE  v{:<31}║", VERSION);
    println!("║      multi-hop routing + request/response for hosts       ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
}

/// A request URI has to be longer than one character; shorter ones are
/// response status codes.
pub fn is_request_uri(uri: &str) -> bool {
    uri.len() > 1
}
