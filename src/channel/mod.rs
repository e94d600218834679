//! Connection layer: socket lifecycle, reconnects and message dispatch.
//!
//! This layer knows nothing about the supervisor vocabulary. It delivers
//! each inbound text message to the [`MessageHandler`] registered for its
//! envelope `type` and gives handlers a [`CommandSender`] that always
//! targets the live connection.

pub mod envelope;
pub mod event_channel;
pub mod handler;
pub mod sender;
pub mod state;
pub mod transport;
pub mod websocket;

pub use envelope::Envelope;
pub use event_channel::{ChannelOptions, DEFAULT_ENDPOINT, EventChannel};
pub use handler::{HandlerRegistry, MessageHandler};
pub use sender::CommandSender;
pub use state::ConnectionState;
pub use transport::{Connection, Frame, FrameSink, FrameSource, Transport};
pub use websocket::WebSocketTransport;
