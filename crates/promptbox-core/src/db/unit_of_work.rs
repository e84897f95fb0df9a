//! Scoped transactions over the local stores.
//!
//! A [`UnitOfWork`] wraps one `SQLite` transaction. Its scope type decides at
//! compile time which repositories can be reached from inside it, so a
//! procedure that is only meant to touch the queue cannot accidentally write
//! prompts.

use std::marker::PhantomData;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use super::device_repository::SqliteDeviceRepository;
use super::meta_repository::SqliteMetaRepository;
use super::prompt_repository::SqlitePromptRepository;
use super::queue_repository::SqliteQueueRepository;
use crate::error::Result;

mod sealed {
    pub trait Sealed {}
}

/// Marker for a set of stores a unit of work may touch.
pub trait Scope: sealed::Sealed {
    const NAME: &'static str;
}

/// Grants the prompts, tags and prompt/tag association stores.
pub trait TouchesPrompts: Scope {}
/// Grants the outbound queue store.
pub trait TouchesQueue: Scope {}
/// Grants the device identity store.
pub trait TouchesDevice: Scope {}
/// Grants snapshot, audit log and sync metadata stores.
pub trait TouchesMeta: Scope {}

macro_rules! scope {
    ($(#[$doc:meta])* $name:ident, $label:literal, [$($grant:ident),*]) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl sealed::Sealed for $name {}

        impl Scope for $name {
            const NAME: &'static str = $label;
        }

        $(impl $grant for $name {})*
    };
}

scope!(
    /// Prompt and tag writes that do not produce queue items.
    PromptScope, "prompt", [TouchesPrompts]
);
scope!(
    /// Queue maintenance.
    QueueScope, "queue", [TouchesQueue, TouchesMeta]
);
scope!(
    /// An optimistic local edit together with its queue item.
    MutationScope, "mutation", [TouchesPrompts, TouchesQueue, TouchesMeta]
);
scope!(
    /// Device identity updates.
    DeviceScope, "device", [TouchesDevice]
);
scope!(
    /// Snapshot, audit and metadata writes.
    MetaScope, "meta", [TouchesMeta]
);
scope!(
    /// Applying a completed sync round.
    SyncScope, "sync", [TouchesPrompts, TouchesQueue, TouchesDevice, TouchesMeta]
);
scope!(
    /// Whole-store operations such as restore and wipe.
    FullScope, "full", [TouchesPrompts, TouchesQueue, TouchesDevice, TouchesMeta]
);

/// One transaction restricted to the stores granted by `S`.
pub struct UnitOfWork<'c, S: Scope> {
    tx: Transaction<'c>,
    _scope: PhantomData<S>,
}

impl<'c, S: Scope> UnitOfWork<'c, S> {
    pub(crate) fn begin(conn: &'c mut Connection) -> Result<Self> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tracing::trace!("Begin {} unit of work", S::NAME);
        Ok(Self {
            tx,
            _scope: PhantomData,
        })
    }

    pub(crate) fn commit(self) -> Result<()> {
        self.tx.commit()?;
        tracing::trace!("Committed {} unit of work", S::NAME);
        Ok(())
    }
}

impl<S: TouchesPrompts> UnitOfWork<'_, S> {
    pub fn prompts(&self) -> SqlitePromptRepository<'_> {
        SqlitePromptRepository::new(&self.tx)
    }
}

impl<S: TouchesQueue> UnitOfWork<'_, S> {
    pub fn queue(&self) -> SqliteQueueRepository<'_> {
        SqliteQueueRepository::new(&self.tx)
    }
}

impl<S: TouchesDevice> UnitOfWork<'_, S> {
    pub fn device(&self) -> SqliteDeviceRepository<'_> {
        SqliteDeviceRepository::new(&self.tx)
    }
}

impl<S: TouchesMeta> UnitOfWork<'_, S> {
    pub fn meta(&self) -> SqliteMetaRepository<'_> {
        SqliteMetaRepository::new(&self.tx)
    }
}
