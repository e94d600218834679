//! Error types for the supervisor client.
//!
//! [`SupervisorError`] is the central error type. Its variants follow the
//! failure taxonomy of the client: transport failures are retried by the
//! connection loop, format and command failures are isolated to a single
//! message, and only cancellation and authentication failures stop a run.

use crate::channel::ConnectionState;

/// Client-side error enum shared by every layer.
///
/// # Categories
///
/// | Variants                                         | Handling                       |
/// |--------------------------------------------------|--------------------------------|
/// | `Transport`, `ConnectionClosed`, `KeepAliveTimeout` | logged, reconnect after backoff |
/// | `Format`                                         | logged, message dropped        |
/// | `CommandFailed`, `RequestTimeout`, `NotConnected` | returned to the caller         |
/// | configuration and registry variants              | fatal at startup               |
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The access token is missing or empty.
    #[error("access token must not be empty")]
    MissingAccessToken,

    /// A configuration value could not be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Two device services claim the same entity.
    #[error("entity {entity_id} is claimed by both {first} and {second}")]
    DuplicateEntity {
        /// Entity claimed twice.
        entity_id: String,
        /// Service that registered the entity first.
        first: String,
        /// Service that tried to register it again.
        second: String,
    },

    /// `run` was called while the channel was not idle.
    #[error("channel is already running (state: {0:?})")]
    AlreadyRunning(ConnectionState),

    /// A handler was registered after the channel started.
    #[error("handler registry is frozen; cannot register {0}")]
    RegistryFrozen(String),

    /// A handler for this message type already exists.
    #[error("handler already registered for {0}")]
    DuplicateHandler(String),

    /// Connect, send or receive failed at the transport level.
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer closed the connection.
    #[error("connection closed: {}", .0.as_deref().unwrap_or("no reason"))]
    ConnectionClosed(Option<String>),

    /// Nothing was received within the keep-alive window.
    #[error("keep-alive timeout")]
    KeepAliveTimeout,

    /// The payload did not have the expected structure.
    #[error("format error: {message} at {position}")]
    Format {
        /// What was expected.
        message: String,
        /// Reader position where the mismatch was found.
        position: String,
    },

    /// No connection is currently established.
    #[error("not connected")]
    NotConnected,

    /// The server answered a command with `success: false`.
    #[error("command {id} failed: {message}")]
    CommandFailed {
        /// Command id.
        id: u64,
        /// Server-supplied message.
        message: String,
    },

    /// A command received no result in time.
    #[error("command {id} timed out")]
    RequestTimeout {
        /// Command id.
        id: u64,
    },

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SupervisorError {
    /// Creates a [`SupervisorError::Format`] error.
    #[must_use]
    pub fn format(message: impl Into<String>, position: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
            position: position.into(),
        }
    }

    /// Returns `true` for failures that should trigger a reconnect.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::ConnectionClosed(_) | Self::KeepAliveTimeout
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SupervisorError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error;
        match err {
            Error::ConnectionClosed | Error::AlreadyClosed => Self::ConnectionClosed(None),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SupervisorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Format {
            message: err.to_string(),
            position: format!("line {} column {}", err.line(), err.column()),
        }
    }
}
