// wc-protocol: Wire protocol types and framing for the wirecall RPC endpoint.
//
// Every multi-byte integer on the wire is big-endian. The first bytes in
// each direction are an untagged, length-prefixed JSON handshake; every
// packet after that starts with a one-byte tag.

use serde::{Deserialize, Serialize};

/// Wire protocol version we speak, carried in the handshake so the two
/// sides can evolve the format later without guessing.
pub const PROTOCOL_VERSION: u32 = 1;

/// Hard cap on MESSAGE/RESPONSE payload size; the length field is a `u16`.
pub const MAX_PAYLOAD_LEN: usize = 65535;

// ---------------------------------------------------------------------------
// PeerInfo
// ---------------------------------------------------------------------------

/// Connection parameters each side announces in its handshake.
///
/// Serialized as JSON with single-letter field names to keep the stream
/// prefix small and leave room for additive evolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Wire protocol version the peer speaks.
    #[serde(rename = "p")]
    pub protocol: u32,
    /// How often the peer will send keepalive packets, in seconds.
    #[serde(rename = "k")]
    pub keepalive_interval: f64,
}

// ---------------------------------------------------------------------------
// Packet tags
// ---------------------------------------------------------------------------

/// One-byte packet discriminator.
///
/// `Handshake` never legitimately appears as a tag (the handshake is the
/// untagged stream prefix) but the value stays reserved so a stray zero
/// byte is reported distinctly from an unknown tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Handshake = 0,
    Keepalive = 1,
    Message = 2,
    Response = 3,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(PacketType::Handshake),
            1 => Ok(PacketType::Keepalive),
            2 => Ok(PacketType::Message),
            3 => Ok(PacketType::Response),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Violations of the wire protocol. Any of these terminates the connection;
/// there is no recovery mid-stream.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown packet tag {0}")]
    UnknownTag(u8),
    #[error("received a second handshake")]
    RepeatedHandshake,
    #[error("malformed handshake: {0}")]
    MalformedHandshake(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode the stream-prefix handshake: `u32` length followed by the JSON
/// encoding of `info`.
pub fn handshake_packet(info: &PeerInfo) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(info)?;
    let mut out = Vec::with_capacity(4 + json.len());
    out.extend_from_slice(&(json.len() as u32).to_be_bytes());
    out.extend_from_slice(&json);
    Ok(out)
}

/// Encode a KEEPALIVE packet (tag only).
pub fn keepalive_packet() -> Vec<u8> {
    vec![PacketType::Keepalive as u8]
}

/// Encode a MESSAGE packet: tag, `u16` message id, `u16` length, payload.
///
/// Panics if `payload` exceeds [`MAX_PAYLOAD_LEN`]; callers enforce the cap
/// before encoding.
pub fn message_packet(message_id: u16, payload: &[u8]) -> Vec<u8> {
    framed(PacketType::Message, message_id, payload)
}

/// Encode a RESPONSE packet: tag, `u16` message id, `u16` length, payload.
///
/// Panics if `payload` exceeds [`MAX_PAYLOAD_LEN`]; callers enforce the cap
/// before encoding.
pub fn response_packet(message_id: u16, payload: &[u8]) -> Vec<u8> {
    framed(PacketType::Response, message_id, payload)
}

fn framed(tag: PacketType, message_id: u16, payload: &[u8]) -> Vec<u8> {
    assert!(
        payload.len() <= MAX_PAYLOAD_LEN,
        "payload of {} bytes exceeds the u16 length field",
        payload.len()
    );
    let mut out = Vec::with_capacity(5 + payload.len());
    out.push(tag as u8);
    out.extend_from_slice(&message_id.to_be_bytes());
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode the JSON body of a handshake (the bytes after the `u32` length
/// prefix) into a [`PeerInfo`].
pub fn decode_peer_info(bytes: &[u8]) -> Result<PeerInfo, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
