//! Connection state machine.
//!
//! The state lives in an [`AtomicU8`] so it can be observed from any task
//! without locks. Only `run` uses compare-and-swap (to reject a second
//! concurrent run); the loops store their own transitions.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of an [`super::EventChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Not running; `run` may be called.
    Idle = 0,
    /// `run` accepted, loops being spawned.
    Starting = 1,
    /// Dispatch loop is waiting for messages.
    DispatchReady = 2,
    /// Opening a socket.
    ConnectingOrRetrying = 3,
    /// Waiting out the reconnect delay after a failure.
    RetryBackoff = 4,
    /// Socket open and receiving.
    Connected = 5,
    /// Cancellation observed; loops are stopping.
    Cancelled = 6,
}

impl ConnectionState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Starting,
            2 => Self::DispatchReady,
            3 => Self::ConnectingOrRetrying,
            4 => Self::RetryBackoff,
            5 => Self::Connected,
            6 => Self::Cancelled,
            _ => Self::Idle,
        }
    }
}

/// Atomic cell holding a [`ConnectionState`].
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    /// Creates a cell in [`ConnectionState::Idle`].
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU8::new(ConnectionState::Idle as u8))
    }

    /// Current state.
    #[must_use]
    pub fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Unconditionally sets the state.
    pub fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Moves from `from` to `to` if the cell currently holds `from`.
    ///
    /// # Errors
    ///
    /// Returns the actual state when it differs from `from`.
    pub fn transition(
        &self,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Result<(), ConnectionState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ConnectionState::from_u8)
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
