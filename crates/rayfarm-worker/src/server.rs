// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Unix-socket accept loop and per-connection framing.

use anyhow::Result;
use rayfarm_proto::wire::{
    decode_message, encode_message_within, frame_len, WireError, HEADER_LEN, MAX_PAYLOAD,
};
use rayfarm_proto::{ErrorCode, ErrorPayload, Message};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixListener;
use tracing::{debug, info, warn};

use crate::session::WorkerSession;
use crate::shader::Shader;

/// Accept connections forever, one [`WorkerSession`] per connection.
pub async fn serve<S: Shader>(listener: UnixListener, shader: Arc<S>) -> Result<()> {
    let mut next_conn: u64 = 0;
    loop {
        let (stream, _) = listener.accept().await?;
        let conn_id = next_conn;
        next_conn += 1;
        let shader = shader.clone();
        tokio::spawn(async move {
            info!(conn_id, "coordinator connected");
            match serve_connection(stream, shader).await {
                Ok(()) => info!(conn_id, "coordinator disconnected"),
                Err(err) => warn!(conn_id, ?err, "connection handler error"),
            }
        });
    }
}

/// Serve requests on one byte stream until the peer hangs up.
///
/// Requests are answered strictly in order. Framing errors (bad magic,
/// version, size or checksum) drop the connection since the stream can no
/// longer be trusted; a well-framed packet with an unknown op or an
/// undecodable body gets an `E_BAD_REQUEST` reply.
pub async fn serve_connection<S, T>(stream: T, shader: Arc<S>) -> Result<()>
where
    S: Shader,
    T: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut session = Some(WorkerSession::new(shader));
    let mut next_ts: u64 = 0;

    let mut read_buf: Vec<u8> = vec![0u8; 16 * 1024];
    let mut acc: Vec<u8> = Vec::with_capacity(32 * 1024);
    loop {
        let n = reader.read(&mut read_buf).await?;
        if n == 0 {
            break;
        }
        acc.extend_from_slice(&read_buf[..n]);

        // process as many frames as available
        while acc.len() >= HEADER_LEN {
            let total = match frame_len(&acc[..HEADER_LEN]) {
                Ok(total) => total,
                Err(err) => {
                    warn!(?err, "unreadable frame header; dropping connection");
                    return Ok(());
                }
            };
            if acc.len() < total {
                break;
            }
            let packet: Vec<u8> = acc.drain(..total).collect();
            let reply = match decode_message(&packet) {
                Ok((request, _ts, _used)) => {
                    let Some(mut current) = session.take() else {
                        anyhow::bail!("worker session lost");
                    };
                    // Shading is CPU-bound; keep it off the reactor.
                    let (reply, current) = tokio::task::spawn_blocking(move || {
                        let reply = current.handle(request);
                        (reply, current)
                    })
                    .await?;
                    session = Some(current);
                    reply
                }
                Err(err @ (WireError::UnknownOp(_) | WireError::Decode(_))) => {
                    debug!(?err, "malformed request");
                    Message::Error(ErrorPayload::new(ErrorCode::BadRequest, err.to_string()))
                }
                Err(err) => {
                    warn!(?err, "failed to decode packet; dropping connection");
                    return Ok(());
                }
            };
            let bytes = encode_reply(&reply, next_ts)?;
            next_ts += 1;
            writer.write_all(&bytes).await?;
            writer.flush().await?;
        }
    }
    Ok(())
}

/// Encode `reply` for the wire.
///
/// A reply that cannot be framed (e.g. columns over [`MAX_PAYLOAD`]) is
/// answered with `E_INTERNAL` naming the cause, so the peer keeps its
/// connection and learns why.
pub fn encode_reply(reply: &Message, ts: u64) -> Result<Vec<u8>, WireError> {
    encode_reply_within(reply, ts, MAX_PAYLOAD)
}

fn encode_reply_within(reply: &Message, ts: u64, max: usize) -> Result<Vec<u8>, WireError> {
    encode_message_within(reply, ts, max).or_else(|err| {
        warn!(op = reply.op_name(), %err, "reply cannot be encoded; answering E_INTERNAL");
        let failure = ErrorPayload::new(
            ErrorCode::Internal,
            format!("{} reply not sent: {err}", reply.op_name()),
        );
        encode_message_within(&Message::Error(failure), ts, max)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::ProbeShader;
    use rayfarm_proto::wire::{encode_message, Packet, MAGIC};
    use rayfarm_proto::{ColumnRange, InitPayload, LivenessToken, OpEnvelope, SceneDescriptor};
    use rayfarm_scene::{LightSet, Projection, SceneGraph};
    use tokio::io::DuplexStream;
    use tokio::time::{timeout, Duration};

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

    async fn read_reply(client: &mut DuplexStream) -> (Message, u64) {
        let mut header = [0u8; HEADER_LEN];
        client.read_exact(&mut header).await.unwrap();
        let total = frame_len(&header).unwrap();
        let mut frame = header.to_vec();
        frame.resize(total, 0);
        client.read_exact(&mut frame[HEADER_LEN..]).await.unwrap();
        let (msg, ts, used) = decode_message(&frame).unwrap();
        assert_eq!(used, total);
        (msg, ts)
    }

    fn spawn_worker() -> DuplexStream {
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(serve_connection(server, Arc::new(ProbeShader)));
        client
    }

    #[tokio::test]
    async fn answers_in_order_with_monotonic_ts() {
        let mut client = spawn_worker();
        let mut batch = encode_message(&Message::Ping, 0).unwrap();
        batch.extend(encode_message(&Message::Init(InitPayload::new(scene(3, 2))), 1).unwrap());
        batch.extend(
            encode_message(
                &Message::ComputeColumns(ColumnRange::new(1, 3).unwrap()),
                2,
            )
            .unwrap(),
        );
        client.write_all(&batch).await.unwrap();

        let (pong, ts0) = read_reply(&mut client).await;
        assert_eq!(pong, Message::Pong(LivenessToken::current()));
        let (ack, ts1) = read_reply(&mut client).await;
        assert!(matches!(ack, Message::InitAck(a) if a.width == 3));
        let (cols, ts2) = read_reply(&mut client).await;
        let Message::Columns(cols) = cols else {
            panic!("expected columns, got {cols:?}");
        };
        assert_eq!(cols.colors.len(), 4);
        assert_eq!(ProbeShader::decode(cols.colors[3]), (2, 1));
        assert_eq!((ts0, ts1, ts2), (0, 1, 2));
    }

    #[tokio::test]
    async fn split_writes_are_reassembled() {
        let mut client = spawn_worker();
        let bytes = encode_message(&Message::Ping, 0).unwrap();
        let (head, tail) = bytes.split_at(5);
        client.write_all(head).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.write_all(tail).await.unwrap();
        let (reply, _) = timeout(Duration::from_secs(1), read_reply(&mut client))
            .await
            .unwrap();
        assert!(matches!(reply, Message::Pong(_)));
    }

    #[tokio::test]
    async fn unknown_op_gets_bad_request() {
        let mut client = spawn_worker();
        let env = OpEnvelope {
            op: "shutdown".to_string(),
            ts: 0,
            payload: (),
        };
        client
            .write_all(&Packet::encode_envelope(&env).unwrap())
            .await
            .unwrap();
        let (reply, _) = read_reply(&mut client).await;
        assert!(matches!(reply, Message::Error(e) if e.kind() == Some(ErrorCode::BadRequest)));

        // connection survives
        client
            .write_all(&encode_message(&Message::Ping, 1).unwrap())
            .await
            .unwrap();
        assert!(matches!(read_reply(&mut client).await.0, Message::Pong(_)));
    }

    #[tokio::test]
    async fn unframeable_reply_becomes_internal_error() {
        let columns = Message::Columns(rayfarm_proto::ColumnsPayload {
            range: ColumnRange::new(0, 64).unwrap(),
            height: 4,
            colors: vec![ProbeShader::encode(1, 1); 256],
        });
        let bytes = encode_reply_within(&columns, 9, 512).unwrap();
        let (msg, ts, _) = decode_message(&bytes).unwrap();
        assert_eq!(ts, 9);
        let Message::Error(err) = msg else {
            panic!("expected an error reply, got {msg:?}");
        };
        assert_eq!(err.kind(), Some(ErrorCode::Internal));
        assert!(err.message.contains("columns"), "{}", err.message);

        let small = encode_reply(&Message::Ping, 0).unwrap();
        assert_eq!(decode_message(&small).unwrap().0, Message::Ping);
    }

    #[tokio::test]
    async fn bad_magic_closes_connection() {
        let mut client = spawn_worker();
        let mut bytes = encode_message(&Message::Ping, 0).unwrap();
        bytes[0..4].copy_from_slice(b"NOPE");
        assert_ne!(&bytes[0..4], &MAGIC);
        client.write_all(&bytes).await.unwrap();
        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(1), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }
}
