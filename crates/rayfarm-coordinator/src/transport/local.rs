// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Worker session living in the coordinator's own process.

use futures_util::future::BoxFuture;
use rayfarm_proto::wire::decode_message;
use rayfarm_proto::{ErrorCode, ErrorPayload, Message};
use rayfarm_worker::{encode_reply, Shader, WorkerSession};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::endpoint::{EndpointError, Transport};

/// Routes encoded packets straight into a local [`WorkerSession`].
///
/// Requests still go through the packet codec in both directions, so
/// in-process workers exercise the same wire semantics as remote ones.
/// Each request runs on the blocking pool; in-process workers shade in
/// parallel and never stall the session task.
pub struct InProcessTransport<S> {
    session: Arc<Mutex<WorkerSession<S>>>,
    next_ts: AtomicU64,
}

impl<S: Shader> InProcessTransport<S> {
    /// Fresh, uninitialized worker session computing with `shader`.
    pub fn new(shader: Arc<S>) -> Self {
        Self {
            session: Arc::new(Mutex::new(WorkerSession::new(shader))),
            next_ts: AtomicU64::new(0),
        }
    }
}

fn answer<S: Shader>(
    session: &Mutex<WorkerSession<S>>,
    request: &[u8],
    ts: u64,
) -> Result<Vec<u8>, EndpointError> {
    let reply = match decode_message(request) {
        Ok((message, _ts, _used)) => session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handle(message),
        Err(err) => Message::Error(ErrorPayload::new(ErrorCode::BadRequest, err.to_string())),
    };
    encode_reply(&reply, ts).map_err(|e| EndpointError::Protocol(e.to_string()))
}

impl<S: Shader> Transport for InProcessTransport<S> {
    fn round_trip(&self, request: Vec<u8>) -> BoxFuture<'_, Result<Vec<u8>, EndpointError>> {
        let session = Arc::clone(&self.session);
        let ts = self.next_ts.fetch_add(1, Ordering::Relaxed);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || answer(&session, &request, ts))
                .await
                .map_err(|e| EndpointError::Protocol(format!("in-process worker failed: {e}")))?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{RemoteWorker, WorkerEndpoint};
    use rayfarm_proto::wire::encode_message;
    use rayfarm_proto::{ColumnRange, PixelColor, SceneDescriptor};
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};
    use rayfarm_scene::{LightSet, Projection, SceneGraph};
    use rayfarm_worker::ProbeShader;

    fn scene(width: u32, height: u32) -> SceneDescriptor {
        SceneDescriptor::new(
            SceneGraph::default(),
            LightSet::default(),
            Projection::look_at(
                [0.0, 0.0, 0.0],
                [0.0, 0.0, -1.0],
                [0.0, 1.0, 0.0],
                1.0,
                width,
                height,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn two_phase_contract_holds_in_process() {
        let worker = RemoteWorker::new("local", InProcessTransport::new(Arc::new(ProbeShader)));
        let range = ColumnRange::new(0, 2).unwrap();

        assert!(worker.ping().await.is_ok());
        assert_eq!(
            worker.compute_columns(range).await,
            Err(EndpointError::NotInitialized)
        );

        let ack = worker.init(&scene(2, 3)).await.unwrap();
        assert_eq!((ack.width, ack.height), (2, 3));
        let cols = worker.compute_columns(range).await.unwrap();
        assert_eq!(cols.colors.len(), 6);
        assert_eq!(ProbeShader::decode(cols.colors[4]), (1, 1));
    }

    #[tokio::test]
    async fn garbage_request_gets_bad_request() {
        let transport = InProcessTransport::new(Arc::new(ProbeShader));
        let mut packet = encode_message(&Message::Ping, 0).unwrap();
        let last = packet.len() - 1;
        packet[last] ^= 0xff;
        let reply = transport.round_trip(packet).await.unwrap();
        let (message, _, _) = decode_message(&reply).unwrap();
        assert!(matches!(message, Message::Error(e) if e.kind() == Some(ErrorCode::BadRequest)));
    }

    /// Shader that records how many calls are shading at once, waiting up to
    /// two seconds for a partner to show up.
    struct Rendezvous {
        inside: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Rendezvous {
        fn shade(&self, column: u32, row: u32) -> PixelColor {
            let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let deadline = Instant::now() + Duration::from_secs(2);
            while self.inside.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
            self.peak.fetch_max(self.inside.load(Ordering::SeqCst), Ordering::SeqCst);
            self.inside.fetch_sub(1, Ordering::SeqCst);
            ProbeShader::encode(column, row)
        }
    }

    #[tokio::test]
    async fn in_process_workers_shade_in_parallel() {
        let meet = Arc::new(Rendezvous {
            inside: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let worker = |id: &str| {
            let meet = Arc::clone(&meet);
            let shader = move |_: &SceneDescriptor, column: u32, row: u32| meet.shade(column, row);
            RemoteWorker::new(id, InProcessTransport::new(Arc::new(shader)))
        };
        let (a, b) = (worker("a"), worker("b"));
        let scene = scene(2, 1);
        a.init(&scene).await.unwrap();
        b.init(&scene).await.unwrap();

        let (left, right) = tokio::join!(
            a.compute_columns(ColumnRange::new(0, 1).unwrap()),
            b.compute_columns(ColumnRange::new(1, 2).unwrap()),
        );

        assert_eq!(left.unwrap().colors, vec![ProbeShader::encode(0, 0)]);
        assert_eq!(right.unwrap().colors, vec![ProbeShader::encode(1, 0)]);
        assert_eq!(meet.peak.load(Ordering::SeqCst), 2);
    }
}
