//! Builder for outbound command payloads.

use serde_json::{Map, Value};

/// Incremental JSON object builder.
///
/// Fields keep their insertion order, so `id` and `type` written first
/// stay at the front of the serialized command.
///
/// ```
/// use supervisor_link::payload::PayloadWriter;
///
/// let mut writer = PayloadWriter::new();
/// writer
///     .data("id", 3)
///     .data("type", "subscribe_trigger")
///     .start("trigger")
///     .data("platform", "state")
///     .array("entity_id", ["light.kitchen"])
///     .end();
/// assert_eq!(
///     writer.finish(),
///     r#"{"id":3,"type":"subscribe_trigger","trigger":{"platform":"state","entity_id":["light.kitchen"]}}"#
/// );
/// ```
#[derive(Debug, Default)]
pub struct PayloadWriter {
    root: Map<String, Value>,
    open: Vec<(String, Map<String, Value>)>,
}

impl PayloadWriter {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn scope(&mut self) -> &mut Map<String, Value> {
        match self.open.last_mut() {
            Some((_, map)) => map,
            None => &mut self.root,
        }
    }

    /// Writes a scalar (or any JSON value) field.
    pub fn data(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.scope().insert(name.to_string(), value.into());
        self
    }

    /// Opens a nested object named `name`.
    pub fn start(&mut self, name: &str) -> &mut Self {
        self.open.push((name.to_string(), Map::new()));
        self
    }

    /// Closes the innermost nested object. Extra calls are ignored.
    pub fn end(&mut self) -> &mut Self {
        if let Some((name, map)) = self.open.pop() {
            self.scope().insert(name, Value::Object(map));
        }
        self
    }

    /// Writes an array field.
    pub fn array<I, V>(&mut self, name: &str, items: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let items = items.into_iter().map(Into::into).collect();
        self.scope().insert(name.to_string(), Value::Array(items));
        self
    }

    /// Closes any open objects and serializes the command.
    #[must_use]
    pub fn finish(mut self) -> String {
        while !self.open.is_empty() {
            self.end();
        }
        Value::Object(self.root).to_string()
    }
}
