//! Offline-first synchronization with the remote store.
//!
//! Local edits are written optimistically and queued; the engine flushes the
//! queue through one push/pull exchange per round.

mod client;
mod engine;
mod memory;
mod protocol;
mod queue;
mod session;

pub use client::HttpRemote;
pub use engine::{FlushOutcome, SkipReason, SyncEngine, SyncStatus, DEFAULT_DEVICE_NAME};
pub use memory::{MemoryRemote, Revision};
pub use protocol::{
    RegisterDeviceRequest, RegisterDeviceResponse, RemoteStore, ResolveConflictRequest,
    ResolveConflictResponse, ResolveStrategy, SyncRequest, SyncResponse, SyncedEntity,
    WireConflict, WireEntity,
};
pub use queue::{RetryPolicy, SyncQueue};
pub use session::{exchange, register_device, run_round, RoundReport};
