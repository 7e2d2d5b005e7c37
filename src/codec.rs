// =============================================================================
// MESH CORE: codec.rs
// Wire format of a mesh message
// =============================================================================
//
// Layout (positional, nothing is self-describing beyond field order):
//
//   [0]        TTL
//   [1..9]     messageId, 8 raw ASCII bytes
//   [9]        number of completeRoute entries
//   then       uri, to               each as <len u8><bytes>
//   then       completeRoute[0..n]   each as <len u8><bytes>
//   then       payload               raw, runs to the end of the frame
// =============================================================================

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;

use crate::constants::{MAX_FIELD_LENGTH, MESSAGE_ID_LENGTH};
use crate::error::{MeshError, Result};

const HEADER_LEN: usize = 1 + MESSAGE_ID_LENGTH + 1;

// -----------------------------------------------------------------------------
// NetworkMessage
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkMessage {
    /// Hop budget, decremented by every relaying host.
    pub ttl: u8,
    /// Unique per logical request, echoed verbatim by its response.
    pub message_id: String,
    /// Request endpoint, or a single-character status code on responses.
    pub uri: String,
    /// Destination host id.
    pub to: String,
    /// Originator first, bearer last.
    pub complete_route: Vec<String>,
    pub payload: Bytes,
}

impl NetworkMessage {
    pub fn originator(&self) -> Option<&str> {
        self.complete_route.first().map(String::as_str)
    }

    /// The host that most recently forwarded this message.
    pub fn bearer(&self) -> Option<&str> {
        self.complete_route.last().map(String::as_str)
    }

    /// Everything but the payload, for log lines.
    pub fn summary(&self) -> String {
        let summary = MessageSummary {
            ttl: self.ttl,
            message_id: &self.message_id,
            uri: &self.uri,
            to: &self.to,
            complete_route: &self.complete_route,
            payload_len: self.payload.len(),
        };
        serde_json::to_string(&summary).unwrap_or_else(|_| format!("{:?}", self.message_id))
    }
}

#[derive(Serialize)]
struct MessageSummary<'a> {
    ttl: u8,
    message_id: &'a str,
    uri: &'a str,
    to: &'a str,
    complete_route: &'a [String],
    payload_len: usize,
}

// -----------------------------------------------------------------------------
// Encoding
// -----------------------------------------------------------------------------

pub fn encode(message: &NetworkMessage) -> Result<Bytes> {
    validate(message)?;

    let strings_len: usize = [&message.uri, &message.to]
        .into_iter()
        .chain(message.complete_route.iter())
        .map(|s| 1 + s.len())
        .sum();
    let mut buf = BytesMut::with_capacity(HEADER_LEN + strings_len + message.payload.len());

    buf.put_u8(message.ttl);
    buf.put_slice(message.message_id.as_bytes());
    buf.put_u8(message.complete_route.len() as u8);
    put_string(&mut buf, &message.uri);
    put_string(&mut buf, &message.to);
    for host_id in &message.complete_route {
        put_string(&mut buf, host_id);
    }
    buf.put_slice(&message.payload);

    Ok(buf.freeze())
}

fn validate(message: &NetworkMessage) -> Result<()> {
    if message.ttl == 0 {
        return Err(MeshError::Validation(
            "Incorrect TTL: 0. It has to be from 1 to 255".into(),
        ));
    }
    validate_message_id(message.message_id.as_bytes())?;

    if message.uri.is_empty() || message.uri.len() > MAX_FIELD_LENGTH {
        return Err(MeshError::Validation(format!(
            "Incorrect length of uri: {}",
            message.uri.len()
        )));
    }
    if message.to.len() > MAX_FIELD_LENGTH {
        return Err(MeshError::Validation(format!(
            "Value of \"to\" is too long: {}",
            message.to.len()
        )));
    }
    if message.complete_route.is_empty() {
        return Err(MeshError::Validation("completeRoute is empty".into()));
    }
    if message.complete_route.len() > MAX_FIELD_LENGTH {
        return Err(MeshError::Validation(format!(
            "completeRoute is too long: {}",
            message.complete_route.len()
        )));
    }
    if let Some(item) = message
        .complete_route
        .iter()
        .find(|item| item.len() > MAX_FIELD_LENGTH)
    {
        return Err(MeshError::Validation(format!(
            "element of completeRoute is too long: {}",
            item.len()
        )));
    }

    Ok(())
}

fn validate_message_id(raw: &[u8]) -> Result<()> {
    if raw.len() != MESSAGE_ID_LENGTH {
        return Err(MeshError::Validation(format!(
            "Incorrect length of messageId: {}",
            raw.len()
        )));
    }
    if !raw.iter().all(|b| b.is_ascii_graphic()) {
        return Err(MeshError::Validation(
            "messageId has to consist of printable ASCII characters".into(),
        ));
    }
    Ok(())
}

fn put_string(buf: &mut BytesMut, value: &str) {
    buf.put_u8(value.len() as u8);
    buf.put_slice(value.as_bytes());
}

// -----------------------------------------------------------------------------
// Decoding
// -----------------------------------------------------------------------------

pub fn decode(data: &[u8]) -> Result<NetworkMessage> {
    if data.len() < HEADER_LEN {
        return Err(MeshError::Validation(format!(
            "Message is too short: {} bytes",
            data.len()
        )));
    }

    let mut buf = data;
    let ttl = buf.get_u8();
    let raw_id = &buf[..MESSAGE_ID_LENGTH];
    validate_message_id(raw_id)?;
    let message_id = String::from_utf8_lossy(raw_id).into_owned();
    buf.advance(MESSAGE_ID_LENGTH);
    let route_len = buf.get_u8() as usize;

    let uri = take_string(&mut buf, "uri")?;
    if uri.is_empty() {
        return Err(MeshError::Validation("uri is empty".into()));
    }
    let to = take_string(&mut buf, "to")?;

    if route_len == 0 {
        return Err(MeshError::Validation("completeRoute is empty".into()));
    }
    let mut complete_route = Vec::with_capacity(route_len);
    for _ in 0..route_len {
        complete_route.push(take_string(&mut buf, "completeRoute")?);
    }

    Ok(NetworkMessage {
        ttl,
        message_id,
        uri,
        to,
        complete_route,
        payload: Bytes::copy_from_slice(buf),
    })
}

fn take_string(buf: &mut &[u8], field: &str) -> Result<String> {
    if !buf.has_remaining() {
        return Err(MeshError::Validation(format!(
            "Unexpected end of message while reading {}",
            field
        )));
    }
    let len = buf.get_u8() as usize;
    if buf.remaining() < len {
        return Err(MeshError::Validation(format!(
            "Length of {} ({}) exceeds remaining {} bytes",
            field,
            len,
            buf.remaining()
        )));
    }
    let value = std::str::from_utf8(&buf[..len])
        .map_err(|e| MeshError::Validation(format!("{} is not valid UTF-8: {}", field, e)))?
        .to_string();
    buf.advance(len);
    Ok(value)
}
