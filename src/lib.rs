//! # supervisor-link
//!
//! Long-lived client for the home-automation supervisor WebSocket API.
//!
//! The crate keeps one connection open for the lifetime of the process,
//! authenticates with an access token, bootstraps the state of every
//! tracked entity and then follows state changes through a trigger
//! subscription. Connection failures are retried forever with a fixed
//! delay; each reconnection replays the whole handshake.
//!
//! ## Architecture
//!
//! ```text
//! Supervisor (WebSocket)
//!     │
//!     ├── EventChannel (channel/)
//!     │     ├── receive loop: connect, reassemble, keep-alive, reconnect
//!     │     └── dispatch loop: envelope → MessageHandler
//!     │
//!     ├── SupervisorCore (supervisor/)
//!     │     └── auth, get_states, subscribe_trigger, pending results
//!     │
//!     └── DevicesUpdaters (devices/)
//!           └── entity_id → EntityUpdater, committed once per burst
//! ```

pub mod channel;
pub mod config;
pub mod devices;
pub mod error;
pub mod payload;
pub mod supervisor;
