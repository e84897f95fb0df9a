//! Database layer for promptbox

mod connection;
mod device_repository;
mod meta_repository;
mod migrations;
mod prompt_repository;
mod queue_repository;
mod unit_of_work;

pub use connection::Database;
pub use device_repository::{DeviceRepository, SqliteDeviceRepository};
pub use meta_repository::{
    migration_marker_key, MetaRepository, SqliteMetaRepository, KEY_DROPPED_TOTAL,
    KEY_LAST_FLUSH_ERROR, KEY_OWNER_ID,
};
pub use prompt_repository::{ListOrder, ListQuery, PromptRepository, SqlitePromptRepository};
pub use queue_repository::{QueueRepository, SqliteQueueRepository};
pub use unit_of_work::{
    DeviceScope, FullScope, MetaScope, MutationScope, PromptScope, QueueScope, Scope, SyncScope,
    TouchesDevice, TouchesMeta, TouchesPrompts, TouchesQueue, UnitOfWork,
};
