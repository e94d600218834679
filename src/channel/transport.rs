//! Transport abstraction consumed by the connection loop.
//!
//! A [`Transport`] opens a connection and returns it split into a
//! [`FrameSink`] (used by senders, serialized behind a mutex) and a
//! [`FrameSource`] (owned exclusively by the receive loop).

use async_trait::async_trait;

use crate::error::SupervisorError;

/// One unit read from the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text fragment. `fin` marks the last fragment of a message.
    Text {
        /// Fragment payload.
        payload: String,
        /// Whether this fragment completes the logical message.
        fin: bool,
    },
    /// A ping or pong control frame; proves the peer is alive.
    KeepAlive,
    /// The peer sent a close frame.
    Close(Option<String>),
}

/// Write half of a connection. Implementations need not support
/// concurrent calls.
#[async_trait]
pub trait FrameSink: Send {
    /// Sends one complete text message.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the write fails.
    async fn send_text(&mut self, text: String) -> Result<(), SupervisorError>;

    /// Sends a keep-alive ping.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the write fails.
    async fn ping(&mut self) -> Result<(), SupervisorError>;

    /// Sends a normal close frame with `reason` and flushes.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the close handshake cannot be written.
    async fn close(&mut self, reason: &str) -> Result<(), SupervisorError>;
}

/// Read half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Receives the next frame.
    ///
    /// # Errors
    ///
    /// Returns a transport error, or [`SupervisorError::ConnectionClosed`]
    /// when the stream ended.
    async fn receive(&mut self) -> Result<Frame, SupervisorError>;
}

/// Split connection returned by [`Transport::connect`].
pub type Connection = (Box<dyn FrameSink>, Box<dyn FrameSource>);

/// Factory for connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a new connection to `uri`.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the connection cannot be established.
    async fn connect(&self, uri: &str) -> Result<Connection, SupervisorError>;
}
