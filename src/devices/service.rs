//! Capabilities implemented by device integrations.

use crate::payload::PayloadReader;

/// A device integration that observes a fixed set of entities.
pub trait DeviceService: Send + Sync {
    /// Name used in logs and configuration errors.
    fn name(&self) -> &str;

    /// Entities this service owns. Read once at startup.
    fn entity_ids(&self) -> Vec<String>;

    /// Creates a fresh updater for one update burst.
    fn create_updater(&self) -> Box<dyn EntityUpdater>;
}

/// Per-burst consumer of entity state.
///
/// One instance receives every entity its service owns within a burst and
/// is committed once at the end of that burst.
pub trait EntityUpdater: Send {
    /// Maps the state object of `entity_id`. The reader sits on the
    /// `entity_id` field; the updater reads whatever siblings it needs and
    /// may stop early. Returns `false` if nothing usable was mapped.
    fn try_map(&mut self, entity_id: &str, reader: &mut PayloadReader) -> bool;

    /// Applies everything mapped in this burst.
    fn update(self: Box<Self>);
}
