//! Message envelope: the optional leading `id` and the required `type`.

use crate::error::SupervisorError;
use crate::payload::{NodeKind, PayloadReader};

/// Envelope read from the front of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Command id this message answers, if any.
    pub id: Option<u64>,
    /// Message type; empty when the payload carried no fields at all.
    pub message_type: String,
}

impl Envelope {
    /// Reads the envelope, leaving the cursor on the `type` field so the
    /// handler continues with the type-specific payload.
    ///
    /// The first field must be `id` or `type`; after `id`, the next field
    /// must be `type`.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Format`] on any other layout.
    pub fn read(reader: &mut PayloadReader) -> Result<Self, SupervisorError> {
        if !reader.read() {
            return Ok(Self {
                id: None,
                message_type: String::new(),
            });
        }
        let id = if reader.name() == Some("id") && reader.kind() == NodeKind::Property {
            let id = reader.value::<u64>()?;
            reader.expect_field("type")?;
            Some(id)
        } else {
            None
        };
        if reader.kind() != NodeKind::Property || reader.name() != Some("type") {
            return Err(SupervisorError::format(
                "expected `id` or `type` as first field",
                reader.position(),
            ));
        }
        let message_type = reader.str_value()?.to_string();
        Ok(Self { id, message_type })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn envelope(text: &str) -> Result<(Envelope, PayloadReader), SupervisorError> {
        let mut reader = PayloadReader::parse(text)?;
        let envelope = Envelope::read(&mut reader)?;
        Ok((envelope, reader))
    }

    #[test]
    fn id_then_type() {
        let Ok((env, mut reader)) =
            envelope(r#"{"id":7,"type":"result","success":true,"result":[]}"#)
        else {
            panic!("valid envelope expected");
        };
        assert_eq!(env.id, Some(7));
        assert_eq!(env.message_type, "result");
        assert!(reader.read());
        assert_eq!(reader.name(), Some("success"));
    }

    #[test]
    fn type_only() {
        let Ok((env, _)) = envelope(r#"{"type":"auth_required","ha_version":"2024.1"}"#) else {
            panic!("valid envelope expected");
        };
        assert_eq!(env.id, None);
        assert_eq!(env.message_type, "auth_required");
    }

    #[test]
    fn missing_type_is_format_error() {
        let result = envelope(r#"{"kind":"auth_ok"}"#);
        assert!(matches!(result, Err(SupervisorError::Format { .. })));
    }

    #[test]
    fn id_not_followed_by_type_is_format_error() {
        let result = envelope(r#"{"id":1,"success":true}"#);
        assert!(matches!(result, Err(SupervisorError::Format { .. })));
    }

    #[test]
    fn type_before_id_leaves_id_unread() {
        let Ok((env, mut reader)) = envelope(r#"{"type":"event","id":3}"#) else {
            panic!("valid envelope expected");
        };
        assert_eq!(env.id, None);
        assert!(reader.read());
        assert_eq!(reader.name(), Some("id"));
    }

    #[test]
    fn empty_object_yields_empty_type() {
        let Ok((env, _)) = envelope("{}") else {
            panic!("valid envelope expected");
        };
        assert!(env.message_type.is_empty());
    }

    #[test]
    fn non_string_type_is_format_error() {
        assert!(envelope(r#"{"type":5}"#).is_err());
    }
}
