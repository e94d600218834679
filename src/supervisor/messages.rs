//! Protocol vocabulary.

/// Outbound authentication message.
pub const AUTH: &str = "auth";
/// Command that returns every entity state.
pub const GET_STATES: &str = "get_states";
/// Command that subscribes to a trigger.
pub const SUBSCRIBE_TRIGGER: &str = "subscribe_trigger";

/// Inbound message types handled by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundMessage {
    /// Server asks for credentials.
    AuthRequired,
    /// Credentials accepted.
    AuthOk,
    /// Credentials rejected.
    AuthInvalid,
    /// Result of a previously sent command.
    Result,
    /// Subscription event.
    Event,
}

impl InboundMessage {
    /// Every handled type, in registration order.
    pub const ALL: [Self; 5] = [
        Self::AuthRequired,
        Self::AuthOk,
        Self::AuthInvalid,
        Self::Result,
        Self::Event,
    ];

    /// Wire name of the type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AuthRequired => "auth_required",
            Self::AuthOk => "auth_ok",
            Self::AuthInvalid => "auth_invalid",
            Self::Result => "result",
            Self::Event => "event",
        }
    }

    /// Looks up a type by its wire name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|message| message.as_str() == name)
    }
}
