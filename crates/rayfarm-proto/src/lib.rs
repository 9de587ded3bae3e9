// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Wire schema between the rayfarm coordinator and its render workers.
//!
//! A worker answers three requests, strictly one at a time per connection:
//!
//! * `ping` → [`LivenessToken`] (reachable, protocol-compatible)
//! * `init` → [`AckToken`] (scene accepted and retained)
//! * `compute_columns` → [`ColumnsPayload`] (`(to - from) * H` colors)
//!
//! Liveness and readiness are separate answers on purpose: a worker that
//! pongs has not necessarily accepted a scene. Messages travel inside CBOR
//! [`OpEnvelope`]s framed by [`wire`].

pub use rayfarm_scene::{PixelColor, SceneDescriptor, SCHEMA_VERSION};

mod packed;
pub mod wire;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::path::PathBuf;

/// Default Unix socket path for a local worker.
///
/// Prefers a per-user runtime dir (XDG_RUNTIME_DIR) and falls back to `/tmp`
/// when unavailable.
pub fn default_socket_path() -> PathBuf {
    let base = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    base.join("rayfarm-worker.sock")
}

/// Canonical OpEnvelope carried as the payload of a packet.
///
/// * `op` – operation name (see [`Message::op_name`]).
/// * `ts` – per-connection logical timestamp of the sender.
/// * `payload` – operation specific body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpEnvelope<P> {
    /// Operation name (e.g., "ping", "init", "compute_columns").
    pub op: String,
    /// Logical timestamp (monotonic per sender).
    pub ts: u64,
    /// Operation-specific body.
    pub payload: P,
}

/// Contiguous span of image columns `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnRange {
    /// First column, inclusive.
    pub from: u32,
    /// Last column, exclusive.
    pub to: u32,
}

impl ColumnRange {
    /// `Some` when `from < to`.
    pub fn new(from: u32, to: u32) -> Option<Self> {
        (from < to).then_some(Self { from, to })
    }

    /// Number of columns in the range.
    pub fn len(&self) -> u32 {
        self.to.saturating_sub(self.from)
    }

    /// `true` for a malformed range with `from >= to`.
    pub fn is_empty(&self) -> bool {
        self.from >= self.to
    }

    /// `0 <= from < to <= width`.
    pub fn within(&self, width: u32) -> bool {
        !self.is_empty() && self.to <= width
    }

    /// Number of pixels a result for this range carries at image height `height`.
    pub fn cells(&self, height: u32) -> usize {
        self.len() as usize * height as usize
    }

    /// Column indices covered by the range.
    pub fn columns(&self) -> Range<u32> {
        self.from..self.to
    }

    /// Most columns of height `height` whose `columns` reply fits in `budget`
    /// payload bytes. Zero when not even one column fits.
    pub fn max_columns(height: u32, budget: usize) -> u32 {
        let per_column = (height as usize).saturating_mul(3).max(1);
        let usable = budget
            .min(wire::MAX_PAYLOAD)
            .saturating_sub(COLUMNS_OVERHEAD);
        u32::try_from(usable / per_column).unwrap_or(u32::MAX)
    }

    /// The first `max` columns (at least one) and whatever remains.
    pub fn split_first(&self, max: u32) -> (Self, Option<Self>) {
        let cut = self.from.saturating_add(max.max(1)).min(self.to);
        (
            Self {
                from: self.from,
                to: cut,
            },
            Self::new(cut, self.to),
        )
    }
}

/// Payload bytes a `columns` reply needs beyond its packed colors.
pub const COLUMNS_OVERHEAD: usize = 256;

impl fmt::Display for ColumnRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.from, self.to)
    }
}

/// Reply to `ping`: proves reachability and wire compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessToken {
    /// Packet format version the worker speaks.
    pub protocol: u16,
    /// Scene schema version the worker understands.
    pub schema: u16,
}

impl LivenessToken {
    /// Token for this build.
    pub const fn current() -> Self {
        Self {
            protocol: wire::VERSION,
            schema: SCHEMA_VERSION,
        }
    }

    /// `true` when a peer presenting `self` can serve this build.
    pub fn is_compatible(&self) -> bool {
        *self == Self::current()
    }
}

/// BLAKE3 digest of a scene's CBOR encoding.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct SceneDigest(pub [u8; 32]);

impl SceneDigest {
    /// Digest a scene descriptor.
    pub fn of(scene: &SceneDescriptor) -> Result<Self, wire::WireError> {
        let bytes = wire::to_cbor(scene)?;
        Ok(Self(*blake3::hash(&bytes).as_bytes()))
    }
}

impl fmt::Display for SceneDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Reply to `init`: the worker retained the scene and is ready to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckToken {
    /// Digest of the retained scene.
    pub scene_digest: SceneDigest,
    /// Image width the worker will bounds-check against.
    pub width: u32,
    /// Rows per column in every compute reply.
    pub height: u32,
}

/// `init` request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitPayload {
    /// Scene schema version of `scene`.
    pub schema: u16,
    /// Graph, lights and projection for the session.
    pub scene: SceneDescriptor,
}

impl InitPayload {
    /// Wrap a scene with the current schema version.
    pub fn new(scene: SceneDescriptor) -> Self {
        Self {
            schema: SCHEMA_VERSION,
            scene,
        }
    }
}

/// `columns` reply body.
///
/// `colors[i]` is the pixel at column `range.from + i / height`, row
/// `i % height`. No per-pixel coordinates travel on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnsPayload {
    /// Range the colors belong to.
    pub range: ColumnRange,
    /// Image height H.
    pub height: u32,
    /// `range.len() * height` colors.
    #[serde(with = "packed")]
    pub colors: Vec<PixelColor>,
}

/// Stable error codes a worker may answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// `compute_columns` before a successful `init`.
    NotInitialized = 1,
    /// Column range outside `[0, W)` or empty.
    RangeOutOfBounds = 2,
    /// Scene failed validation.
    InvalidScene = 3,
    /// Scene schema version not understood.
    SchemaMismatch = 4,
    /// Request the worker does not serve.
    BadRequest = 5,
    /// Worker-side failure.
    Internal = 500,
}

impl ErrorCode {
    /// Stable identifier, e.g. `E_NOT_INITIALIZED`.
    pub const fn name(self) -> &'static str {
        match self {
            ErrorCode::NotInitialized => "E_NOT_INITIALIZED",
            ErrorCode::RangeOutOfBounds => "E_RANGE_OUT_OF_BOUNDS",
            ErrorCode::InvalidScene => "E_INVALID_SCENE",
            ErrorCode::SchemaMismatch => "E_SCHEMA_MISMATCH",
            ErrorCode::BadRequest => "E_BAD_REQUEST",
            ErrorCode::Internal => "E_INTERNAL",
        }
    }

    /// Reverse of `as u32`.
    pub const fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => ErrorCode::NotInitialized,
            2 => ErrorCode::RangeOutOfBounds,
            3 => ErrorCode::InvalidScene,
            4 => ErrorCode::SchemaMismatch,
            5 => ErrorCode::BadRequest,
            500 => ErrorCode::Internal,
            _ => return None,
        })
    }
}

/// Error payload used in `error` replies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    /// Numeric error code (see [`ErrorCode`]).
    pub code: u32,
    /// Stable identifier (e.g., "E_NOT_INITIALIZED").
    pub name: String,
    /// Human readable message.
    pub message: String,
}

impl ErrorPayload {
    /// Build a payload for a known code.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code as u32,
            name: code.name().to_string(),
            message: message.into(),
        }
    }

    /// Known code, if the peer sent one this build understands.
    pub fn kind(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }
}

/// Wire message kinds carried inside OpEnvelope payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Liveness probe (op = "ping").
    Ping,
    /// Liveness reply (op = "pong").
    Pong(LivenessToken),
    /// Scene hand-off (op = "init").
    Init(InitPayload),
    /// Scene accepted (op = "init_ack").
    InitAck(AckToken),
    /// Request pixels for a column range (op = "compute_columns").
    ComputeColumns(ColumnRange),
    /// Pixels for a column range (op = "columns").
    Columns(ColumnsPayload),
    /// Request failed (op = "error").
    Error(ErrorPayload),
}

impl Message {
    /// Canonical op string for this message variant.
    pub fn op_name(&self) -> &'static str {
        match self {
            Message::Ping => "ping",
            Message::Pong(_) => "pong",
            Message::Init(_) => "init",
            Message::InitAck(_) => "init_ack",
            Message::ComputeColumns(_) => "compute_columns",
            Message::Columns(_) => "columns",
            Message::Error(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_range_rejects_empty() {
        assert_eq!(ColumnRange::new(3, 3), None);
        assert_eq!(ColumnRange::new(4, 3), None);
        let r = ColumnRange::new(1, 4).unwrap();
        assert_eq!(r.len(), 3);
        assert_eq!(r.cells(2), 6);
        assert!(r.within(4));
        assert!(!r.within(3));
    }

    #[test]
    fn split_first_caps_a_call() {
        let r = ColumnRange::new(2, 9).unwrap();
        assert_eq!(
            r.split_first(3),
            (ColumnRange::new(2, 5).unwrap(), ColumnRange::new(5, 9))
        );
        assert_eq!(r.split_first(7), (r, None));
        assert_eq!(r.split_first(100), (r, None));
        assert_eq!(r.split_first(0).0, ColumnRange::new(2, 3).unwrap());
    }

    #[test]
    fn max_columns_follows_height_and_budget() {
        // 8192x3000 does not fit one packet; 7456 columns do.
        assert_eq!(ColumnRange::max_columns(3000, wire::MAX_PAYLOAD), 7456);
        assert!(ColumnRange::max_columns(3000, wire::MAX_PAYLOAD) < 8192);
        assert_eq!(ColumnRange::max_columns(2, COLUMNS_OVERHEAD + 12), 2);
        assert_eq!(ColumnRange::max_columns(2, COLUMNS_OVERHEAD + 5), 0);
        assert_eq!(
            ColumnRange::max_columns(2, usize::MAX),
            ColumnRange::max_columns(2, wire::MAX_PAYLOAD)
        );
    }

    #[test]
    fn error_codes_round_trip_names() {
        for code in [
            ErrorCode::NotInitialized,
            ErrorCode::RangeOutOfBounds,
            ErrorCode::InvalidScene,
            ErrorCode::SchemaMismatch,
            ErrorCode::BadRequest,
            ErrorCode::Internal,
        ] {
            let payload = ErrorPayload::new(code, "x");
            assert_eq!(payload.kind(), Some(code));
            assert_eq!(payload.name, code.name());
        }
        assert_eq!(ErrorCode::from_code(42), None);
    }

    #[test]
    fn current_liveness_token_is_compatible() {
        assert!(LivenessToken::current().is_compatible());
        let old = LivenessToken {
            protocol: wire::VERSION + 1,
            schema: SCHEMA_VERSION,
        };
        assert!(!old.is_compatible());
    }
}
