// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Unix-socket transport to a `rayfarm-worker` process.

use futures_util::future::BoxFuture;
use rayfarm_app_core::prefs::CoordinatorPrefs;
use rayfarm_proto::wire::{frame_len, HEADER_LEN};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::endpoint::{EndpointError, RemoteWorker, Transport, WorkerEndpoint};

fn unreachable(err: io::Error) -> EndpointError {
    EndpointError::Unreachable(err.to_string())
}

/// One connection to a worker, used for one call at a time.
///
/// The stream is taken out of its slot for the duration of a call and put
/// back only after a complete reply was read. A call abandoned mid-flight
/// (e.g. on timeout) therefore never leaves a half-read reply on the wire;
/// the next call reconnects when a path is known.
pub struct SocketTransport {
    path: Option<PathBuf>,
    stream: Mutex<Option<UnixStream>>,
}

impl SocketTransport {
    /// Transport that connects to `path` lazily, on first use.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            stream: Mutex::new(None),
        }
    }

    /// Transport over an already connected stream; cannot reconnect.
    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            path: None,
            stream: Mutex::new(Some(stream)),
        }
    }

    /// Socket path, when the transport was built from one.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn open(&self) -> Result<UnixStream, EndpointError> {
        match &self.path {
            Some(path) => {
                debug!(path = %path.display(), "connecting to worker");
                UnixStream::connect(path).await.map_err(unreachable)
            }
            None => Err(EndpointError::Unreachable("connection closed".into())),
        }
    }

    async fn exchange(&self, request: Vec<u8>) -> Result<Vec<u8>, EndpointError> {
        let mut slot = self.stream.lock().await;
        let mut stream = match slot.take() {
            Some(stream) => stream,
            None => self.open().await?,
        };
        stream.write_all(&request).await.map_err(unreachable)?;
        let reply = read_frame(&mut stream).await?;
        *slot = Some(stream);
        Ok(reply)
    }
}

impl Transport for SocketTransport {
    fn round_trip(&self, request: Vec<u8>) -> BoxFuture<'_, Result<Vec<u8>, EndpointError>> {
        Box::pin(self.exchange(request))
    }
}

/// Read one whole frame. Short reads cannot desynchronize framing: the header
/// is buffered completely before its length is trusted.
async fn read_frame(stream: &mut UnixStream) -> Result<Vec<u8>, EndpointError> {
    let mut header = [0u8; HEADER_LEN];
    let mut read = 0usize;
    while read < header.len() {
        let n = stream
            .read(&mut header[read..])
            .await
            .map_err(unreachable)?;
        if n == 0 {
            return Err(EndpointError::Unreachable(format!(
                "worker closed the connection after {read} of {HEADER_LEN} header bytes"
            )));
        }
        read += n;
    }
    let total = frame_len(&header).map_err(|e| EndpointError::Protocol(e.to_string()))?;
    let mut packet = Vec::with_capacity(total);
    packet.extend_from_slice(&header);
    packet.resize(total, 0);
    stream
        .read_exact(&mut packet[HEADER_LEN..])
        .await
        .map_err(unreachable)?;
    Ok(packet)
}

/// One lazily connected endpoint per socket path in `prefs.workers`.
///
/// Nothing is contacted here; unreachable workers surface in the ping phase.
pub fn workers_from_prefs(prefs: &CoordinatorPrefs) -> Vec<Arc<dyn WorkerEndpoint>> {
    prefs
        .workers
        .iter()
        .map(|path| {
            let worker = RemoteWorker::new(path.display().to_string(), SocketTransport::new(path));
            Arc::new(worker) as Arc<dyn WorkerEndpoint>
        })
        .collect()
}
