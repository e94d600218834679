//! Device layer: entity registry, per-burst update sessions and the
//! capability traits implemented by device integrations.

pub mod router;
pub mod service;
pub mod state_log;

pub use router::{DevicesUpdaters, EntityUpdateProducer, UpdateSession};
pub use service::{DeviceService, EntityUpdater};
pub use state_log::StateLogService;
