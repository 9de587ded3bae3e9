// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Versioned packet framing and CBOR helpers.
//!
//! Packet layout:
//!
//! ``MAGIC(4) || VERSION(2) || FLAGS(2) || LENGTH(4) || PAYLOAD || CHECKSUM(32)``
//!
//! * PAYLOAD is a CBOR [`OpEnvelope`]
//! * CHECKSUM = blake3-256 over HEADER (first 12 bytes) || PAYLOAD

use blake3::Hasher;
use ciborium::value::Value;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::{Message, OpEnvelope};

/// Protocol magic constant "RAY!".
pub const MAGIC: [u8; 4] = [0x52, 0x41, 0x59, 0x21];
/// Wire protocol version (big-endian u16).
pub const VERSION: u16 = 0x0001;
/// Reserved flags (set to zero for v1).
pub const FLAGS: u16 = 0x0000;
/// Header bytes preceding the payload.
pub const HEADER_LEN: usize = 12;
/// Trailing checksum bytes.
pub const CHECKSUM_LEN: usize = 32;
/// Largest payload either side accepts.
pub const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Framing and codec failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WireError {
    /// Fewer bytes than the header announces.
    #[error("incomplete packet")]
    Incomplete,
    /// First four bytes are not [`MAGIC`].
    #[error("bad magic")]
    BadMagic,
    /// Peer speaks another packet version.
    #[error("unsupported version {0}")]
    UnsupportedVersion(u16),
    /// Announced payload exceeds [`MAX_PAYLOAD`].
    #[error("payload of {len} bytes exceeds limit of {max}")]
    PayloadTooLarge {
        /// Announced length.
        len: usize,
        /// Accepted maximum.
        max: usize,
    },
    /// Checksum does not cover header and payload.
    #[error("checksum mismatch")]
    ChecksumMismatch,
    /// Envelope names an op this build does not know.
    #[error("unknown op {0}")]
    UnknownOp(String),
    /// Value could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),
    /// Bytes could not be decoded into the expected value.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Encode to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| WireError::Encode(e.to_string()))?;
    Ok(out)
}

/// Decode from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    ciborium::from_reader(bytes).map_err(|e| WireError::Decode(e.to_string()))
}

/// Validate a packet header and return the full frame length it announces.
///
/// Stream readers buffer [`HEADER_LEN`] bytes, call this, then read the rest.
pub fn frame_len(header: &[u8]) -> Result<usize, WireError> {
    if header.len() < HEADER_LEN {
        return Err(WireError::Incomplete);
    }
    if header[0..4] != MAGIC {
        return Err(WireError::BadMagic);
    }
    let version = u16::from_be_bytes([header[4], header[5]]);
    if version != VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }
    let len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
    if len > MAX_PAYLOAD {
        return Err(WireError::PayloadTooLarge {
            len,
            max: MAX_PAYLOAD,
        });
    }
    Ok(HEADER_LEN + len + CHECKSUM_LEN)
}

/// A full packet (header + payload + checksum).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Raw header (12 bytes).
    pub header: [u8; HEADER_LEN],
    /// CBOR payload bytes.
    pub payload: Vec<u8>,
    /// blake3 checksum over header||payload.
    pub checksum: [u8; CHECKSUM_LEN],
}

impl Packet {
    /// Build a packet from a CBOR payload.
    pub fn from_payload(payload: Vec<u8>) -> Result<Self, WireError> {
        Self::from_payload_within(payload, MAX_PAYLOAD)
    }

    /// [`Packet::from_payload`] with a tighter payload limit; `max` is
    /// clamped to [`MAX_PAYLOAD`].
    pub fn from_payload_within(payload: Vec<u8>, max: usize) -> Result<Self, WireError> {
        let max = max.min(MAX_PAYLOAD);
        if payload.len() > max {
            return Err(WireError::PayloadTooLarge {
                len: payload.len(),
                max,
            });
        }
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&MAGIC);
        header[4..6].copy_from_slice(&VERSION.to_be_bytes());
        header[6..8].copy_from_slice(&FLAGS.to_be_bytes());
        header[8..12].copy_from_slice(&(payload.len() as u32).to_be_bytes());

        let checksum = checksum(&header, &payload);
        Ok(Packet {
            header,
            payload,
            checksum,
        })
    }

    /// Concatenate header, payload and checksum.
    pub fn into_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len() + CHECKSUM_LEN);
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.payload);
        out.extend_from_slice(&self.checksum);
        out
    }

    /// Encode an `OpEnvelope` into a full packet byte vector.
    pub fn encode_envelope<P: Serialize>(env: &OpEnvelope<P>) -> Result<Vec<u8>, WireError> {
        Ok(Packet::from_payload(to_cbor(env)?)?.into_bytes())
    }

    /// Decode a packet from a byte slice, returning the envelope and bytes consumed.
    pub fn decode_envelope<P: DeserializeOwned>(
        bytes: &[u8],
    ) -> Result<(OpEnvelope<P>, usize), WireError> {
        let total = frame_len(bytes)?;
        if bytes.len() < total {
            return Err(WireError::Incomplete);
        }
        let payload_end = total - CHECKSUM_LEN;
        let header = &bytes[0..HEADER_LEN];
        let payload = &bytes[HEADER_LEN..payload_end];
        let sum = &bytes[payload_end..total];

        if checksum(header, payload).as_slice() != sum {
            return Err(WireError::ChecksumMismatch);
        }

        let env: OpEnvelope<P> = from_cbor(payload)?;
        Ok((env, total))
    }
}

fn checksum(header: &[u8], payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let mut hasher = Hasher::new();
    hasher.update(header);
    hasher.update(payload);
    *hasher.finalize().as_bytes()
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, WireError> {
    Value::serialized(value).map_err(|e| WireError::Encode(e.to_string()))
}

fn from_value<T: DeserializeOwned>(value: &Value) -> Result<T, WireError> {
    value
        .deserialized()
        .map_err(|e| WireError::Decode(e.to_string()))
}

/// Encode a `Message` into a packet with the provided logical timestamp.
pub fn encode_message(msg: &Message, ts: u64) -> Result<Vec<u8>, WireError> {
    encode_message_within(msg, ts, MAX_PAYLOAD)
}

/// [`encode_message`] refusing payloads over `max` bytes.
pub fn encode_message_within(msg: &Message, ts: u64, max: usize) -> Result<Vec<u8>, WireError> {
    let payload = match msg {
        Message::Ping => Value::Null,
        Message::Pong(t) => to_value(t)?,
        Message::Init(p) => to_value(p)?,
        Message::InitAck(t) => to_value(t)?,
        Message::ComputeColumns(r) => to_value(r)?,
        Message::Columns(p) => to_value(p)?,
        Message::Error(p) => to_value(p)?,
    };

    let env = OpEnvelope {
        op: msg.op_name().to_string(),
        ts,
        payload,
    };
    Ok(Packet::from_payload_within(to_cbor(&env)?, max)?.into_bytes())
}

/// Decode bytes into (Message, ts, bytes_consumed).
pub fn decode_message(bytes: &[u8]) -> Result<(Message, u64, usize), WireError> {
    let (env, used) = Packet::decode_envelope::<Value>(bytes)?;
    let payload = &env.payload;
    let msg = match env.op.as_str() {
        "ping" => Message::Ping,
        "pong" => Message::Pong(from_value(payload)?),
        "init" => Message::Init(from_value(payload)?),
        "init_ack" => Message::InitAck(from_value(payload)?),
        "compute_columns" => Message::ComputeColumns(from_value(payload)?),
        "columns" => Message::Columns(from_value(payload)?),
        "error" => Message::Error(from_value(payload)?),
        other => return Err(WireError::UnknownOp(other.to_string())),
    };
    Ok((msg, env.ts, used))
}

// --- Unit tests -----------------------------------------------------------
