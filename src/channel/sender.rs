//! Swappable send capability.
//!
//! [`CommandSender`] always resolves the transport that is current at the
//! moment of the call. The receive loop installs a live sink when a
//! connection opens and swaps the disconnected stub back in when it
//! drops; handlers never cache the sink itself.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;

use super::transport::FrameSink;
use crate::error::SupervisorError;

/// Sink shared between the receive loop (pings, close) and senders.
/// The mutex serializes writes on the socket.
pub type SharedSink = Arc<Mutex<Box<dyn FrameSink>>>;

enum SendSlot {
    Disconnected,
    Connected(SharedSink),
}

/// Cloneable handle used by handlers to send text messages.
#[derive(Clone)]
pub struct CommandSender {
    slot: Arc<ArcSwap<SendSlot>>,
}

impl CommandSender {
    /// Creates a sender in the disconnected state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Arc::new(ArcSwap::from_pointee(SendSlot::Disconnected)),
        }
    }

    /// Routes subsequent sends to `sink`.
    pub(crate) fn install(&self, sink: SharedSink) {
        self.slot.store(Arc::new(SendSlot::Connected(sink)));
    }

    /// Reverts to the disconnected stub.
    pub(crate) fn reset(&self) {
        self.slot.store(Arc::new(SendSlot::Disconnected));
    }

    /// Returns `true` while a connection is installed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(**self.slot.load(), SendSlot::Connected(_))
    }

    /// Sends `text` over the current connection. While disconnected the
    /// message is logged and dropped.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the write on a live connection fails.
    pub async fn send(&self, text: String) -> Result<(), SupervisorError> {
        let slot = self.slot.load_full();
        match &*slot {
            SendSlot::Disconnected => {
                tracing::warn!(len = text.len(), "connection not ready, dropping message");
                Ok(())
            }
            SendSlot::Connected(sink) => {
                tracing::trace!(payload = %text, "sending");
                sink.lock().await.send_text(text).await
            }
        }
    }
}

impl Default for CommandSender {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommandSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSender")
            .field("connected", &self.is_connected())
            .finish()
    }
}
