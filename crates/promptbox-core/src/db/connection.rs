//! Database connection management

use std::path::Path;

use rusqlite::Connection;

use super::migrations;
use super::unit_of_work::{Scope, UnitOfWork};
use crate::error::Result;

/// Database wrapper for the local `SQLite` store.
///
/// The local store is exclusive to one device/process; the handle is owned by
/// the application root and passed down explicitly.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        let mut database = Self { conn };
        database.configure()?;
        migrations::run(&mut database.conn)?;
        Ok(database)
    }

    /// Configure `SQLite` for optimal performance
    fn configure(&self) -> Result<()> {
        // journal_mode returns a row, and in-memory databases answer "memory".
        self.conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))
            .ok();
        self.conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = 10000;",
        )?;
        Ok(())
    }

    /// Get a reference to the underlying connection for reads
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run `work` inside one transaction restricted to the stores granted by `S`.
    ///
    /// The transaction commits only when `work` returns `Ok`; any error rolls
    /// back every write made through the unit of work.
    pub fn unit_of_work<S, T, F>(&mut self, work: F) -> Result<T>
    where
        S: Scope,
        F: FnOnce(&UnitOfWork<'_, S>) -> Result<T>,
    {
        let uow = UnitOfWork::<S>::begin(&mut self.conn)?;
        let value = work(&uow)?;
        uow.commit()?;
        Ok(value)
    }
}
