//! Per-connection session state
//!
//! `SessionHandle` is the server-side view of one connection: its identity,
//! authentication state and the channels to its connection task.
//! `FrameBuffer` is the receive buffer owned by the connection task that
//! splits the byte stream into newline-delimited frames.

use std::net::SocketAddr;

use tokio::sync::{mpsc, watch};
use tracing::warn;

use crate::error::SendError;
use crate::message::ChatMessage;
use crate::types::SessionId;

/// Longest unterminated frame kept in the receive buffer
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Outbound slots beyond a full history replay
pub const OUTBOUND_HEADROOM: usize = 64;

const FRAME_DELIMITER: u8 = b'\n';

/// Outbound queue length for a server replaying up to `history_capacity`
/// messages on login
pub fn outbound_queue_len(history_capacity: usize) -> usize {
    history_capacity.saturating_add(OUTBOUND_HEADROOM)
}

/// Connected session information
///
/// Owned by the `SessionRegistry` from `Connect` until `Disconnect`.
#[derive(Debug)]
pub struct SessionHandle {
    /// Unique identifier for this session
    pub id: SessionId,
    /// Remote address, when known
    pub peer: Option<SocketAddr>,
    /// Login bound to this session (None before authentication)
    pub login: Option<String>,
    /// Set once authentication succeeded
    pub authenticated: bool,
    /// Server → connection task messages (bounded)
    outbound: mpsc::Sender<ChatMessage>,
    /// Close request; `true` once the session is being torn down
    close: watch::Sender<bool>,
}

impl SessionHandle {
    /// Create a new unauthenticated session
    pub fn new(
        id: SessionId,
        peer: Option<SocketAddr>,
        outbound: mpsc::Sender<ChatMessage>,
        close: watch::Sender<bool>,
    ) -> Self {
        Self {
            id,
            peer,
            login: None,
            authenticated: false,
            outbound,
            close,
        }
    }

    /// Queue a message for this session
    ///
    /// Never blocks. A session whose queue is full is not keeping up with
    /// its socket and is disconnected.
    pub fn send_message(&self, message: ChatMessage) -> Result<(), SendError> {
        match self.outbound.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                if !self.is_closing() {
                    warn!(
                        "Outbound queue full for {} ({}), disconnecting",
                        self.id,
                        self.display_name()
                    );
                    self.disconnect_from_server();
                }
                Err(SendError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::ChannelClosed),
        }
    }

    /// Ask the connection task to close
    ///
    /// Queued messages are written if the peer drains them within the close
    /// grace period. Repeated calls are ignored.
    pub fn disconnect_from_server(&self) {
        if self.is_closing() {
            return;
        }
        self.close.send_replace(true);
    }

    /// Whether a close was requested
    pub fn is_closing(&self) -> bool {
        *self.close.borrow()
    }

    /// Whether the session is authenticated and not being torn down
    pub fn is_live_member(&self) -> bool {
        self.authenticated && !self.is_closing()
    }

    /// Get the display name for this session
    pub fn display_name(&self) -> &str {
        self.login.as_deref().unwrap_or("<anonymous>")
    }
}

/// Growable receive buffer that yields newline-delimited frames
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes
    ///
    /// Returns `false` if the pending partial frame grew past
    /// `MAX_FRAME_LEN` and was discarded.
    pub fn extend(&mut self, bytes: &[u8]) -> bool {
        self.buf.extend_from_slice(bytes);
        let pending = match self.buf.iter().rposition(|&b| b == FRAME_DELIMITER) {
            Some(pos) => self.buf.len() - pos - 1,
            None => self.buf.len(),
        };
        if pending > MAX_FRAME_LEN {
            let keep = self.buf.len() - pending;
            self.buf.truncate(keep);
            return false;
        }
        true
    }

    /// Remove and return the next complete frame, without its delimiter
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.iter().position(|&b| b == FRAME_DELIMITER)?;
        let mut frame: Vec<u8> = self.buf.drain(..=pos).collect();
        frame.pop();
        Some(frame)
    }

    /// Bytes of the trailing partial frame still waiting for a delimiter
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}
