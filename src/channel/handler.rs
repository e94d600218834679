//! Message handlers and the per-type handler registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::sender::CommandSender;
use crate::error::SupervisorError;
use crate::payload::PayloadReader;

/// Handler invoked by the dispatch loop for one message type.
///
/// The reader is positioned on the envelope's `type` field; the handler
/// consumes the rest of the payload. Handlers run strictly one at a time.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles one message.
    ///
    /// # Errors
    ///
    /// Errors are logged by the dispatch loop together with the raw
    /// payload; they never stop the channel.
    async fn handle(
        &self,
        id: Option<u64>,
        reader: &mut PayloadReader,
        sender: &CommandSender,
    ) -> Result<(), SupervisorError>;
}

/// Frozen lookup table handed to the dispatch loop.
pub type HandlerTable = HashMap<String, Arc<dyn MessageHandler>>;

/// Registry that accepts handlers until it is frozen by `run`.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HandlerTable,
    frozen: bool,
}

impl HandlerRegistry {
    /// Creates an empty, open registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler for `message_type`.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::RegistryFrozen`] once frozen and
    /// [`SupervisorError::DuplicateHandler`] if the type is taken.
    pub fn register(
        &mut self,
        message_type: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), SupervisorError> {
        if self.frozen {
            return Err(SupervisorError::RegistryFrozen(message_type.to_string()));
        }
        if self.handlers.contains_key(message_type) {
            return Err(SupervisorError::DuplicateHandler(message_type.to_string()));
        }
        self.handlers.insert(message_type.to_string(), handler);
        Ok(())
    }

    /// Freezes the registry and returns a shared snapshot of it.
    pub fn freeze(&mut self) -> Arc<HandlerTable> {
        self.frozen = true;
        Arc::new(self.handlers.clone())
    }

    /// Returns `true` once the registry has been frozen.
    #[must_use]
    pub const fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("HandlerRegistry")
            .field("types", &types)
            .field("frozen", &self.frozen)
            .finish()
    }
}
