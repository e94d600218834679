//! Built-in device service that logs the state of configured entities.

use std::collections::BTreeMap;

use super::service::{DeviceService, EntityUpdater};
use crate::payload::{NodeKind, PayloadReader};

/// Observes a configurable list of entities and logs every state change.
#[derive(Debug, Clone, Default)]
pub struct StateLogService {
    entity_ids: Vec<String>,
}

impl StateLogService {
    /// Creates the service for `entity_ids`.
    #[must_use]
    pub fn new(entity_ids: Vec<String>) -> Self {
        Self { entity_ids }
    }
}

impl DeviceService for StateLogService {
    fn name(&self) -> &str {
        "state_log"
    }

    fn entity_ids(&self) -> Vec<String> {
        self.entity_ids.clone()
    }

    fn create_updater(&self) -> Box<dyn EntityUpdater> {
        Box::new(StateLogUpdater::default())
    }
}

/// Collects `state` values during a burst and logs them on commit.
#[derive(Debug, Default)]
pub struct StateLogUpdater {
    states: BTreeMap<String, String>,
}

impl StateLogUpdater {
    /// States collected so far, keyed by entity.
    #[must_use]
    pub const fn states(&self) -> &BTreeMap<String, String> {
        &self.states
    }
}

impl EntityUpdater for StateLogUpdater {
    fn try_map(&mut self, entity_id: &str, reader: &mut PayloadReader) -> bool {
        let depth = reader.depth();
        while reader.read() && reader.depth() == depth && reader.kind() != NodeKind::EndProperty {
            if reader.name() == Some("state") {
                let Ok(state) = reader.str_value() else {
                    return false;
                };
                self.states.insert(entity_id.to_string(), state.to_string());
                return true;
            }
            reader.skip();
        }
        false
    }

    fn update(self: Box<Self>) {
        for (entity_id, state) in &self.states {
            tracing::info!(entity_id = %entity_id, state = %state, "entity state");
        }
    }
}
