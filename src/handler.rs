//! TCP connection handler
//!
//! Handles individual client connections: splits the byte stream into
//! newline-delimited frames, forwards decoded messages to the ChatServer
//! and writes outbound messages back to the socket.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::AppError;
use crate::message::ChatMessage;
use crate::server::ServerCommand;
use crate::session::FrameBuffer;
use crate::types::SessionId;

const READ_CHUNK: usize = 4096;

/// How long a closing session may take to flush what is still queued
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Handle a new TCP connection
///
/// Registers the session with the ChatServer and runs until the peer goes
/// away or the server asks for a close. Exactly one `Disconnect` is sent.
pub async fn handle_connection(
    stream: TcpStream,
    cmd_tx: mpsc::Sender<ServerCommand>,
    queue_len: usize,
) -> Result<(), AppError> {
    let peer = stream.peer_addr().ok();
    let (reader, writer) = stream.into_split();
    run_session(reader, writer, peer, cmd_tx, queue_len).await
}

/// Drive one session over any byte stream halves
///
/// `queue_len` bounds the server → session queue. A close request from the
/// server interrupts a write the peer is not draining.
pub async fn run_session<R, W>(
    mut reader: R,
    mut writer: W,
    peer: Option<SocketAddr>,
    cmd_tx: mpsc::Sender<ServerCommand>,
    queue_len: usize,
) -> Result<(), AppError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let session_id = SessionId::new();
    let peer_label = peer
        .map(|a| a.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    info!("Session {} opened from {}", session_id, peer_label);

    // Create channels for server -> session messages and close requests
    let (out_tx, mut out_rx) = mpsc::channel::<ChatMessage>(queue_len.max(1));
    let (close_tx, mut close_rx) = watch::channel(false);

    // Register with ChatServer
    if cmd_tx
        .send(ServerCommand::Connect {
            session_id,
            peer,
            outbound: out_tx,
            close: close_tx,
        })
        .await
        .is_err()
    {
        warn!("Failed to register session {} - server closed", session_id);
        return Err(AppError::ChannelSend);
    }

    let mut frames = FrameBuffer::new();
    let mut chunk = [0u8; READ_CHUNK];
    let mut close_requested = false;

    while !close_requested {
        tokio::select! {
            biased;

            // A dropped sender means the server forgot the session
            _ = close_rx.changed() => {
                close_requested = true;
            }
            read = reader.read(&mut chunk) => {
                let n = match read {
                    Ok(0) => {
                        debug!("Session {} closed by peer", session_id);
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        debug!("Read error on {}: {}", session_id, e);
                        break;
                    }
                };

                if !frames.extend(&chunk[..n]) {
                    warn!("Oversized frame from {} discarded", session_id);
                }

                if !forward_frames(session_id, &mut frames, &cmd_tx).await {
                    debug!("Server closed, ending session {}", session_id);
                    break;
                }
            }
            outbound = out_rx.recv() => {
                let Some(message) = outbound else {
                    close_requested = true;
                    continue;
                };
                let write = write_frame(&mut writer, session_id, &message);
                tokio::pin!(write);
                let result = tokio::select! {
                    biased;
                    result = &mut write => Some(result),
                    _ = close_rx.changed() => {
                        close_requested = true;
                        // let the frame in flight finish if the peer is reading at all
                        timeout(CLOSE_GRACE, &mut write).await.ok()
                    }
                };
                match result {
                    Some(Ok(())) => {}
                    // Closure is decided by the read side
                    Some(Err(e)) => warn!("Failed to write to {}: {}", session_id, e),
                    None => debug!("Session {} stalled mid-frame", session_id),
                }
            }
        }
    }

    if close_requested {
        debug!("Closing session {} on server request", session_id);
        close_gracefully(&mut writer, &mut out_rx, session_id).await;
    }

    // Send disconnect command
    let _ = cmd_tx.send(ServerCommand::Disconnect { session_id }).await;

    info!("Session {} disconnected", session_id);

    Ok(())
}

/// Encode one message and write it as a newline-terminated frame
async fn write_frame<W>(
    writer: &mut W,
    session_id: SessionId,
    message: &ChatMessage,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = match codec::encode(message) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Failed to encode message for {}: {}", session_id, e);
            return Ok(());
        }
    };
    frame.push('\n');
    writer.write_all(frame.as_bytes()).await
}

/// Write whatever is still queued, then shut the write side down
///
/// Gives up after `CLOSE_GRACE` so a peer that stopped reading cannot keep
/// the session alive.
async fn close_gracefully<W>(
    writer: &mut W,
    out_rx: &mut mpsc::Receiver<ChatMessage>,
    session_id: SessionId,
) where
    W: AsyncWrite + Unpin,
{
    let drain = async {
        while let Ok(message) = out_rx.try_recv() {
            write_frame(writer, session_id, &message).await?;
        }
        writer.flush().await?;
        writer.shutdown().await
    };

    match timeout(CLOSE_GRACE, drain).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Error while closing {}: {}", session_id, e),
        Err(_) => warn!(
            "Session {} did not drain within {:?}, dropping it",
            session_id, CLOSE_GRACE
        ),
    }
}

/// Decode every complete frame and hand it to the server
///
/// Returns `false` once the server channel is closed.
async fn forward_frames(
    session_id: SessionId,
    frames: &mut FrameBuffer,
    cmd_tx: &mpsc::Sender<ServerCommand>,
) -> bool {
    while let Some(frame) = frames.next_frame() {
        if frame.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match codec::decode(&frame) {
            Ok(message) => {
                if cmd_tx
                    .send(ServerCommand::Inbound {
                        session_id,
                        message,
                    })
                    .await
                    .is_err()
                {
                    return false;
                }
            }
            Err(e) => {
                warn!("Dropping frame from {}: {}", session_id, e);
            }
        }
    }
    true
}
