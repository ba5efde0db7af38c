/**
 * Connection Transport
 *
 * The registry never touches sockets directly. Each connection is handed to it
 * as a `Transport`: something that can send a text frame and be closed. The
 * WebSocket handler uses `ChannelTransport`, whose receiving half is drained by
 * the task that owns the socket's write half.
 */

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::backend::error::{CollabError, CollabResult};

/// Bidirectional message transport for a single client connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one text frame; an error means the connection is dead
    async fn send(&self, text: String) -> CollabResult<()>;

    /// Close the connection; must be safe to call more than once
    async fn close(&self);
}

/// Frame queued for a socket writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close,
}

/// Transport that forwards frames to a socket writer over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl ChannelTransport {
    /// Create a transport and the receiver its socket writer should drain
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, text: String) -> CollabResult<()> {
        self.tx
            .send(OutboundFrame::Text(text))
            .map_err(|_| CollabError::transport("socket writer has gone away"))
    }

    async fn close(&self) {
        let _ = self.tx.send(OutboundFrame::Close);
    }
}
