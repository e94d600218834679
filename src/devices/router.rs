//! Entity routing: which updater owns which entity.
//!
//! [`DevicesUpdaters`] is built once from every [`DeviceService`] and is
//! immutable afterwards. Each inbound burst gets its own
//! [`UpdateSession`], which creates updaters lazily, shares one updater
//! between all entities of the same service and commits each updater
//! exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use super::service::{DeviceService, EntityUpdater};
use crate::error::SupervisorError;
use crate::payload::{NodeKind, PayloadReader};

/// Registration record binding a set of entities to one service.
pub struct EntityUpdateProducer {
    entity_ids: Vec<String>,
    service: Arc<dyn DeviceService>,
}

impl EntityUpdateProducer {
    fn new(service: Arc<dyn DeviceService>) -> Self {
        let mut entity_ids = service.entity_ids();
        entity_ids.sort();
        entity_ids.dedup();
        Self {
            entity_ids,
            service,
        }
    }

    /// Entities owned by this producer.
    #[must_use]
    pub fn entity_ids(&self) -> &[String] {
        &self.entity_ids
    }

    /// Name of the owning service.
    #[must_use]
    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    fn create(&self) -> Box<dyn EntityUpdater> {
        self.service.create_updater()
    }
}

impl std::fmt::Debug for EntityUpdateProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityUpdateProducer")
            .field("service", &self.service.name())
            .field("entity_ids", &self.entity_ids)
            .finish()
    }
}

/// Static entity → producer registry.
#[derive(Debug, Default)]
pub struct DevicesUpdaters {
    producers: HashMap<String, Arc<EntityUpdateProducer>>,
    entity_ids: Vec<String>,
}

impl DevicesUpdaters {
    /// Builds the registry from all device services.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::DuplicateEntity`] if two services claim
    /// the same entity.
    pub fn new<I>(services: I) -> Result<Self, SupervisorError>
    where
        I: IntoIterator<Item = Arc<dyn DeviceService>>,
    {
        let mut producers: HashMap<String, Arc<EntityUpdateProducer>> = HashMap::new();
        let mut entity_ids = Vec::new();
        for service in services {
            let producer = Arc::new(EntityUpdateProducer::new(service));
            for entity_id in producer.entity_ids() {
                if let Some(existing) = producers.get(entity_id) {
                    return Err(SupervisorError::DuplicateEntity {
                        entity_id: entity_id.clone(),
                        first: existing.service_name().to_string(),
                        second: producer.service_name().to_string(),
                    });
                }
                producers.insert(entity_id.clone(), Arc::clone(&producer));
                entity_ids.push(entity_id.clone());
            }
            tracing::debug!(
                service = producer.service_name(),
                entities = producer.entity_ids().len(),
                "device service registered"
            );
        }
        Ok(Self {
            producers,
            entity_ids,
        })
    }

    /// All tracked entities, in registration order.
    #[must_use]
    pub fn entity_ids(&self) -> &[String] {
        &self.entity_ids
    }

    /// Returns `true` if no entity is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entity_ids.is_empty()
    }

    /// Returns `true` if `entity_id` is tracked.
    #[must_use]
    pub fn contains(&self, entity_id: &str) -> bool {
        self.producers.contains_key(entity_id)
    }

    /// Starts a session that reports untracked entities through `tracing`.
    #[must_use]
    pub fn session(&self) -> UpdateSession<'_> {
        self.session_with_warnings(|message| tracing::warn!("{message}"))
    }

    /// Starts a session that reports soft failures through `warn`.
    #[must_use]
    pub fn session_with_warnings<'a, F>(&'a self, warn: F) -> UpdateSession<'a>
    where
        F: Fn(&str) + Send + Sync + 'a,
    {
        UpdateSession {
            router: self,
            slots: HashMap::new(),
            updaters: Vec::new(),
            warn: Box::new(warn),
        }
    }
}

/// Updaters touched by one burst.
pub struct UpdateSession<'a> {
    router: &'a DevicesUpdaters,
    slots: HashMap<String, usize>,
    updaters: Vec<Box<dyn EntityUpdater>>,
    warn: Box<dyn Fn(&str) + Send + Sync + 'a>,
}

impl UpdateSession<'_> {
    /// Routes the state of `entity_id` to its updater, creating the
    /// updater on first use. Returns `false` for untracked entities (after
    /// one warning) or when the updater rejects the state.
    pub fn try_map(&mut self, entity_id: &str, reader: &mut PayloadReader) -> bool {
        let index = match self.slots.get(entity_id) {
            Some(index) => *index,
            None => {
                let Some(producer) = self.router.producers.get(entity_id) else {
                    (self.warn)(&format!("update for untracked entity {entity_id} skipped"));
                    return false;
                };
                let index = self.updaters.len();
                self.updaters.push(producer.create());
                for owned in producer.entity_ids() {
                    self.slots.insert(owned.clone(), index);
                }
                index
            }
        };
        match self.updaters.get_mut(index) {
            Some(updater) => updater.try_map(entity_id, reader),
            None => false,
        }
    }

    /// Maps one entity state object. The reader must sit on the object's
    /// start node; on return it sits on the matching end node, whatever
    /// the updater consumed.
    pub fn map_entity(&mut self, reader: &mut PayloadReader) -> bool {
        if reader.kind() != NodeKind::StartProperty || reader.is_array() {
            (self.warn)(&format!("entity state is not an object at {}", reader.position()));
            reader.skip();
            return false;
        }
        let depth = reader.depth();
        let mut found = false;
        let mut mapped = false;
        while reader.read() && !reader.is_end_of(depth) {
            if reader.kind() == NodeKind::Property && reader.name() == Some("entity_id") {
                found = true;
                match reader.str_value().map(str::to_owned) {
                    Ok(entity_id) => mapped = self.try_map(&entity_id, reader),
                    Err(err) => (self.warn)(&err.to_string()),
                }
                break;
            }
            reader.skip();
        }
        if !found {
            (self.warn)(&format!(
                "entity state without entity_id at {}",
                reader.position()
            ));
        }
        reader.drain_to_end(depth);
        mapped
    }

    /// Number of distinct updaters touched so far.
    #[must_use]
    pub fn touched(&self) -> usize {
        self.updaters.len()
    }

    /// Commits every touched updater once, in first-touched order.
    /// Returns how many were committed.
    pub fn update(self) -> usize {
        let committed = self.updaters.len();
        for updater in self.updaters {
            updater.update();
        }
        committed
    }
}

impl std::fmt::Debug for UpdateSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateSession")
            .field("entities", &self.slots.len())
            .field("updaters", &self.updaters.len())
            .finish()
    }
}
