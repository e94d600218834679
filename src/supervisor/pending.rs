//! Pending command table.
//!
//! Command ids come from a process-wide atomic counter and are never
//! reused. A result handler is registered before its command is sent and
//! removed exactly once when the matching `result` arrives.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::core::SupervisorCore;
use crate::channel::CommandSender;
use crate::error::SupervisorError;
use crate::payload::PayloadReader;

/// One-shot consumer of a successful command result.
#[async_trait]
pub trait ResultHandler: Send + Sync {
    /// Handles the `result` field. The reader sits on the `result` node.
    ///
    /// # Errors
    ///
    /// Returns format errors from reading the result; they are logged by
    /// the dispatch loop.
    async fn on_result(
        self: Box<Self>,
        core: &SupervisorCore,
        reader: &mut PayloadReader,
        sender: &CommandSender,
    ) -> Result<(), SupervisorError>;
}

/// Map from command id to the handler awaiting its result.
#[derive(Default)]
pub struct PendingRequests {
    next_id: AtomicU64,
    handlers: DashMap<u64, Box<dyn ResultHandler>>,
}

impl PendingRequests {
    /// Creates an empty table; the first id handed out is `1`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next id and registers `handler` under it.
    pub fn register(&self, handler: Box<dyn ResultHandler>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.handlers.insert(id, handler);
        id
    }

    /// Removes and returns the handler for `id`.
    pub fn take(&self, id: u64) -> Option<Box<dyn ResultHandler>> {
        self.handlers.remove(&id).map(|(_, handler)| handler)
    }

    /// Drops the handler for `id`, if any. Returns `true` if it existed.
    pub fn remove(&self, id: u64) -> bool {
        self.handlers.remove(&id).is_some()
    }

    /// Returns `true` if `id` is still awaiting its result.
    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.handlers.contains_key(&id)
    }

    /// Number of commands awaiting a result.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Drops every pending handler.
    pub fn clear(&self) {
        self.handlers.clear();
    }

    /// Last id handed out (`0` before the first command).
    #[must_use]
    pub fn last_id(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequests")
            .field("last_id", &self.last_id())
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    struct Nothing;

    #[async_trait]
    impl ResultHandler for Nothing {
        async fn on_result(
            self: Box<Self>,
            _core: &SupervisorCore,
            _reader: &mut PayloadReader,
            _sender: &CommandSender,
        ) -> Result<(), SupervisorError> {
            Ok(())
        }
    }

    #[test]
    fn ids_increase_and_start_at_one() {
        let pending = PendingRequests::new();
        let a = pending.register(Box::new(Nothing));
        let b = pending.register(Box::new(Nothing));
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending.last_id(), 2);
    }

    #[test]
    fn take_removes_exactly_once() {
        let pending = PendingRequests::new();
        let id = pending.register(Box::new(Nothing));
        assert!(pending.take(id).is_some());
        assert!(pending.take(id).is_none());
        assert!(pending.is_empty());
    }

    #[test]
    fn ids_are_not_reused_after_removal() {
        let pending = PendingRequests::new();
        let first = pending.register(Box::new(Nothing));
        assert!(pending.remove(first));
        let second = pending.register(Box::new(Nothing));
        assert!(second > first);
        assert!(!pending.contains(first));
        assert!(pending.contains(second));
    }
}
