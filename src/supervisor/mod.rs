//! Protocol layer: authentication, command/result correlation and state
//! routing for the supervisor API.

pub mod core;
pub mod messages;
pub mod path;
pub mod pending;

pub use self::core::SupervisorCore;
pub use messages::InboundMessage;
pub use path::FieldPath;
pub use pending::{PendingRequests, ResultHandler};
