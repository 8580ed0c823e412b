// MJVM transport task
//
// Owns the socket halves. Outgoing frames are written as requests arrive;
// incoming frames are reassembled by a dedicated reader task and matched
// against the single outstanding request.

use crate::commands::{Command, ResponseCode};
use crate::protocol::{
    CommandPacket, DebugError, DebugResult, ResponseHeader, ResponsePacket, RESPONSE_HEADER_SIZE,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, error, info, warn};

/// How many abandoned (timed-out) requests to remember for late-response filtering
const ABANDONED_HISTORY: usize = 8;

/// Request to send a command and get its response
pub struct TransportRequest {
    pub packet: CommandPacket,
    pub response_tx: oneshot::Sender<DebugResult<ResponsePacket>>,
}

/// A raw frame as read off the wire
#[derive(Debug)]
struct Frame {
    header: ResponseHeader,
    data: Vec<u8>,
}

/// Handle to the transport task
#[derive(Clone, Debug)]
pub struct TransportHandle {
    request_tx: mpsc::Sender<TransportRequest>,
    shutdown: Arc<Notify>,
}

impl TransportHandle {
    /// Send a command and wait for the matching response
    pub async fn send(&self, packet: CommandPacket) -> DebugResult<ResponsePacket> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send(TransportRequest { packet, response_tx })
            .await
            .map_err(|_| DebugError::ConnectionClosed)?;

        response_rx.await.map_err(|_| DebugError::ConnectionClosed)?
    }

    /// True once the socket has closed and the task has exited
    pub fn is_closed(&self) -> bool {
        self.request_tx.is_closed()
    }

    /// Close the socket; any pending request fails with ConnectionClosed
    pub fn close(&self) {
        self.shutdown.notify_one();
    }
}

/// Start the transport task over a split stream
pub fn spawn_transport<R, W>(reader: R, writer: W) -> TransportHandle
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (request_tx, request_rx) = mpsc::channel(32);
    let (frame_tx, frame_rx) = mpsc::channel(32);
    let shutdown = Arc::new(Notify::new());

    let reader_task = tokio::spawn(read_frames(reader, frame_tx));
    let task_shutdown = shutdown.clone();
    tokio::spawn(async move {
        transport_task(writer, request_rx, frame_rx, task_shutdown).await;
        reader_task.abort();
    });

    TransportHandle {
        request_tx,
        shutdown,
    }
}

struct Pending {
    command: Command,
    response_tx: oneshot::Sender<DebugResult<ResponsePacket>>,
}

/// Main transport task
async fn transport_task<W>(
    mut writer: W,
    mut request_rx: mpsc::Receiver<TransportRequest>,
    mut frame_rx: mpsc::Receiver<Frame>,
    shutdown: Arc<Notify>,
) where
    W: AsyncWrite + Unpin,
{
    info!("Transport started");

    let mut pending: Option<Pending> = None;
    let mut abandoned: VecDeque<Command> = VecDeque::new();

    loop {
        tokio::select! {
            request = request_rx.recv() => {
                let Some(request) = request else {
                    debug!("All connection handles dropped");
                    break;
                };

                // The previous caller gave up (timeout); its response may still arrive
                if let Some(stale) = pending.take() {
                    warn!("Abandoning {} with no response", stale.command);
                    if abandoned.len() == ABANDONED_HISTORY {
                        abandoned.pop_front();
                    }
                    abandoned.push_back(stale.command);
                }

                let command = request.packet.command;
                debug!("Sending {} ({} payload bytes)", command, request.packet.data.len());

                let encoded = request.packet.encode();
                if let Err(e) = write_frame(&mut writer, &encoded).await {
                    error!("Failed to write {}: {}", command, e);
                    request.response_tx.send(Err(DebugError::Io(e))).ok();
                    break;
                }

                pending = Some(Pending { command, response_tx: request.response_tx });
            }

            frame = frame_rx.recv() => {
                let Some(frame) = frame else {
                    info!("Connection closed by VM");
                    break;
                };
                dispatch_frame(frame, &mut pending, &mut abandoned);
            }

            _ = shutdown.notified() => {
                info!("Closing connection");
                writer.shutdown().await.ok();
                break;
            }
        }
    }

    if let Some(pending) = pending.take() {
        pending.response_tx.send(Err(DebugError::ConnectionClosed)).ok();
    }
    info!("Transport shutting down");
}

fn dispatch_frame(frame: Frame, pending: &mut Option<Pending>, abandoned: &mut VecDeque<Command>) {
    let actual = frame.header.command;

    // The VM answers in order, so a timed-out command's reply comes before
    // the reply to anything sent after it, even a command of the same type
    if forget_abandoned(abandoned, actual) {
        match pending {
            Some(current) => debug!(
                "Dropping late response to {:#04x} while awaiting {}",
                actual, current.command
            ),
            None => debug!("Dropping late response to {:#04x}", actual),
        }
        return;
    }

    let Some(current) = pending.take() else {
        warn!("Dropping unsolicited response {:#04x}", actual);
        return;
    };

    if current.command.id() == actual {
        debug!(
            "Received response to {} (code {}, {} bytes)",
            current.command,
            frame.header.code,
            frame.data.len()
        );
        let response = ResponsePacket {
            command: current.command,
            code: ResponseCode::from_u8(frame.header.code),
            data: frame.data,
        };
        current.response_tx.send(Ok(response)).ok();
        return;
    }

    warn!(
        "Protocol desync: awaiting {}, got command byte {:#04x}; frame dropped",
        current.command, actual
    );
    current
        .response_tx
        .send(Err(DebugError::ProtocolDesync {
            expected: current.command,
            actual,
        }))
        .ok();
}

/// Forget the oldest abandoned command answered by `actual`, along with any
/// abandoned before it: those replies can no longer arrive.
fn forget_abandoned(abandoned: &mut VecDeque<Command>, actual: u8) -> bool {
    match abandoned.iter().position(|c| c.id() == actual) {
        Some(index) => {
            abandoned.drain(..=index);
            true
        }
        None => false,
    }
}

async fn write_frame<W>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Reader task: reassemble frames until the stream ends
async fn read_frames<R>(mut reader: R, frame_tx: mpsc::Sender<Frame>)
where
    R: AsyncRead + Unpin,
{
    loop {
        match read_frame(&mut reader).await {
            Ok(frame) => {
                if frame_tx.send(frame).await.is_err() {
                    break;
                }
            }
            Err(DebugError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("VM closed the stream");
                break;
            }
            Err(e) => {
                error!("Failed to read frame: {}", e);
                break;
            }
        }
    }
}

/// Read one response frame; `read_exact` keeps reading across partial
/// socket reads until the declared payload is complete.
async fn read_frame<R>(reader: &mut R) -> DebugResult<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; RESPONSE_HEADER_SIZE];
    reader.read_exact(&mut header).await?;
    let header = ResponseHeader::decode(&header);

    let mut data = vec![0u8; header.data_length];
    if header.data_length > 0 {
        reader.read_exact(&mut data).await?;
    }

    Ok(Frame { header, data })
}
