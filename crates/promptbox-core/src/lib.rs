//! promptbox-core - Core library for promptbox
//!
//! This crate contains the shared models, local store, and the offline-first
//! sync engine used by every promptbox client.

pub mod backup;
pub mod checksum;
pub mod config;
pub mod conflict;
pub mod db;
pub mod error;
pub mod events;
pub mod identity;
pub mod merge;
pub mod models;
pub mod services;
pub mod sync;
pub mod util;

pub use error::{Error, Result, RetryClass};
pub use events::{EventBus, Subscription, SyncEvent, SyncState};
pub use identity::IdentityHandle;
pub use models::{Prompt, PromptId};
pub use services::LocalStore;
pub use sync::SyncEngine;
