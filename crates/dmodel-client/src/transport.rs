//! Framed envelope transport over a byte stream.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use dmodel_protocol::{error_codes, DbgMessage, Envelope, FrameCodec, ProtocolError};

const READ_CHUNK: usize = 8 * 1024;

/// Split `io` into an outbound and an inbound envelope queue.
///
/// Two tasks are spawned: one frames envelopes from the returned sender onto
/// the stream, the other decodes frames from the stream into the returned
/// receiver. A framing or I/O error ends the inbound queue, which a
/// [`ProtocolClient`](crate::ProtocolClient) treats as a closed channel.
///
/// An envelope that cannot be encoded still resolves its request: a reply is
/// replaced by an `ErrorReply` to the peer, and a request is answered locally
/// with an `ErrorReply` on the inbound queue.
pub fn spawn_stream_transport<S>(
    io: S,
    capacity: usize,
) -> (mpsc::Sender<Envelope>, mpsc::Receiver<Envelope>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(io);
    let (out_tx, out_rx) = mpsc::channel(capacity.max(1));
    let (in_tx, in_rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(write_frames(writer, out_rx, in_tx.downgrade()));
    tokio::spawn(read_frames(reader, in_tx));
    (out_tx, in_rx)
}

async fn write_frames<W>(
    mut writer: W,
    mut outbound: mpsc::Receiver<Envelope>,
    local: mpsc::WeakSender<Envelope>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(envelope) = outbound.recv().await {
        let frame = match FrameCodec::encode(&envelope) {
            Ok(frame) => frame,
            Err(e) => match unencodable(envelope, &e) {
                Unencodable::Reply(substitute) => match FrameCodec::encode(&substitute) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!(request_id = substitute.request_id, error = %e, "error reply not encodable");
                        return;
                    }
                },
                Unencodable::Request(answer) => {
                    if let Some(local) = local.upgrade() {
                        let _ = local.send(answer).await;
                    }
                    continue;
                }
                Unencodable::Notification => continue,
            },
        };
        if let Err(e) = write_frame(&mut writer, &frame).await {
            error!(error = %e, "stream write failed");
            return;
        }
    }
    let _ = writer.shutdown().await;
    debug!("writer finished");
}

enum Unencodable {
    /// Send this to the peer in place of the original reply.
    Reply(Envelope),
    /// Deliver this to the local side as the request's answer.
    Request(Envelope),
    Notification,
}

fn unencodable(envelope: Envelope, err: &ProtocolError) -> Unencodable {
    let request_id = envelope.request_id;
    let kind = envelope.message.type_name();
    if envelope.is_notification() {
        warn!(kind, error = %err, "notification not encodable; dropped");
        return Unencodable::Notification;
    }
    if envelope.message.is_request() {
        warn!(request_id, kind, error = %err, "request not encodable");
        return Unencodable::Request(Envelope::new(
            request_id,
            DbgMessage::ErrorReply {
                code: error_codes::BAD_REQUEST,
                message: format!("{kind} not encodable: {err}"),
            },
        ));
    }
    warn!(request_id, kind, error = %err, "reply not encodable; sending error");
    Unencodable::Reply(Envelope::new(
        request_id,
        DbgMessage::ErrorReply {
            code: error_codes::ENGINE_FAILURE,
            message: format!("{kind} not encodable: {err}"),
        },
    ))
}

async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}

async fn read_frames<R>(mut reader: R, inbound: mpsc::Sender<Envelope>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        loop {
            match FrameCodec::try_decode(&mut buf) {
                Ok(Some(envelope)) => {
                    if inbound.send(envelope).await.is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "bad frame; closing stream");
                    return;
                }
            }
        }
        buf.reserve(READ_CHUNK);
        match reader.read_buf(&mut buf).await {
            Ok(0) => {
                debug!(buffered = buf.len(), "stream ended");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "stream read failed");
                return;
            }
        }
    }
}
