// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Coordinator view of a compute worker.

use futures_util::future::BoxFuture;
use rayfarm_proto::wire::{decode_message, encode_message};
use rayfarm_proto::{
    AckToken, ColumnRange, ColumnsPayload, ErrorCode, ErrorPayload, InitPayload, LivenessToken,
    Message, SceneDescriptor,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Why a call to a worker did not produce the expected reply.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EndpointError {
    /// The worker could not be contacted, or the connection broke mid-call.
    #[error("worker unreachable: {0}")]
    Unreachable(String),
    /// No reply within the call timeout.
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    /// `compute_columns` reached a worker holding no scene.
    #[error("worker holds no scene")]
    NotInitialized,
    /// The worker refused a column range.
    #[error("range out of bounds: {0}")]
    RangeOutOfBounds(String),
    /// The worker speaks another protocol or scene schema.
    #[error("incompatible worker (protocol {}, schema {})", .0.protocol, .0.schema)]
    Incompatible(LivenessToken),
    /// The worker answered with an error this side cannot recover from by retrying alone.
    #[error("worker rejected request: {} ({})", .0.name, .0.message)]
    Rejected(ErrorPayload),
    /// Reply was malformed or did not match the request.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl From<ErrorPayload> for EndpointError {
    fn from(err: ErrorPayload) -> Self {
        match err.kind() {
            Some(ErrorCode::NotInitialized) => EndpointError::NotInitialized,
            Some(ErrorCode::RangeOutOfBounds) => EndpointError::RangeOutOfBounds(err.message),
            _ => EndpointError::Rejected(err),
        }
    }
}

/// One remote compute worker.
///
/// Calls are synchronous request/response from the caller's point of view.
/// Timeouts are applied by the caller, so implementations may take as long
/// as the worker takes; dropping a returned future abandons the call.
pub trait WorkerEndpoint: Send + Sync {
    /// Stable label used in logs and reports.
    fn id(&self) -> &str;

    /// Liveness check. Says nothing about scene readiness.
    fn ping(&self) -> BoxFuture<'_, Result<LivenessToken, EndpointError>>;

    /// Hand the worker its scene for the session.
    fn init<'a>(
        &'a self,
        scene: &'a SceneDescriptor,
    ) -> BoxFuture<'a, Result<AckToken, EndpointError>>;

    /// Pixels for `range`, `range.len() * H` of them in column-major order.
    fn compute_columns(
        &self,
        range: ColumnRange,
    ) -> BoxFuture<'_, Result<ColumnsPayload, EndpointError>>;
}

/// Carries one encoded request packet to a worker and returns its reply packet.
pub trait Transport: Send + Sync {
    /// Send `request` and wait for exactly one reply frame.
    fn round_trip(&self, request: Vec<u8>) -> BoxFuture<'_, Result<Vec<u8>, EndpointError>>;
}

/// [`WorkerEndpoint`] speaking the framed wire protocol over a [`Transport`].
pub struct RemoteWorker<T> {
    id: String,
    transport: T,
    next_ts: AtomicU64,
}

impl<T: Transport> RemoteWorker<T> {
    /// Wrap `transport` under the label `id`.
    pub fn new(id: impl Into<String>, transport: T) -> Self {
        Self {
            id: id.into(),
            transport,
            next_ts: AtomicU64::new(0),
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn call(&self, request: Message) -> Result<Message, EndpointError> {
        let ts = self.next_ts.fetch_add(1, Ordering::Relaxed);
        let packet =
            encode_message(&request, ts).map_err(|e| EndpointError::Protocol(e.to_string()))?;
        let reply = self.transport.round_trip(packet).await?;
        let (message, _ts, _used) =
            decode_message(&reply).map_err(|e| EndpointError::Protocol(e.to_string()))?;
        Ok(message)
    }
}

fn unexpected(expected: &str, got: &Message) -> EndpointError {
    EndpointError::Protocol(format!("expected `{expected}`, got `{}`", got.op_name()))
}

impl<T: Transport> WorkerEndpoint for RemoteWorker<T> {
    fn id(&self) -> &str {
        &self.id
    }

    fn ping(&self) -> BoxFuture<'_, Result<LivenessToken, EndpointError>> {
        Box::pin(async move {
            match self.call(Message::Ping).await? {
                Message::Pong(token) if token.is_compatible() => Ok(token),
                Message::Pong(token) => Err(EndpointError::Incompatible(token)),
                Message::Error(err) => Err(err.into()),
                other => Err(unexpected("pong", &other)),
            }
        })
    }

    fn init<'a>(
        &'a self,
        scene: &'a SceneDescriptor,
    ) -> BoxFuture<'a, Result<AckToken, EndpointError>> {
        Box::pin(async move {
            let request = Message::Init(InitPayload::new(scene.clone()));
            match self.call(request).await? {
                Message::InitAck(ack) => Ok(ack),
                Message::Error(err) => Err(err.into()),
                other => Err(unexpected("init_ack", &other)),
            }
        })
    }

    fn compute_columns(
        &self,
        range: ColumnRange,
    ) -> BoxFuture<'_, Result<ColumnsPayload, EndpointError>> {
        Box::pin(async move {
            match self.call(Message::ComputeColumns(range)).await? {
                Message::Columns(cols) if cols.range == range => Ok(cols),
                Message::Columns(cols) => Err(EndpointError::Protocol(format!(
                    "asked for {range}, got {}",
                    cols.range
                ))),
                Message::Error(err) => Err(err.into()),
                other => Err(unexpected("columns", &other)),
            }
        })
    }
}
