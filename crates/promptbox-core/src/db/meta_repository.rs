//! Sync metadata, migration snapshot and audit log storage

#![allow(clippy::cast_possible_wrap)]

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::{AuditAction, AuditEntry, ConflictRecord, MigrationSnapshot, PromptId};
use crate::util::{from_millis, now, to_millis};

/// Owner id the local store currently writes under
pub const KEY_OWNER_ID: &str = "owner_id";
/// Running total of queue items dropped by overflow
pub const KEY_DROPPED_TOTAL: &str = "queue_dropped_total";
/// Message of the most recent failed flush
pub const KEY_LAST_FLUSH_ERROR: &str = "last_flush_error";
const MIGRATED_PREFIX: &str = "migrated:";

/// Marker key recording that the first merge finished for `user_id`
pub fn migration_marker_key(user_id: &str) -> String {
    format!("{MIGRATED_PREFIX}{user_id}")
}

/// Trait for metadata storage operations
pub trait MetaRepository {
    fn get_value(&self, key: &str) -> Result<Option<String>>;

    fn set_value(&self, key: &str, value: &str) -> Result<()>;

    fn remove_value(&self, key: &str) -> Result<()>;

    /// Add `by` to a numeric counter, returning the new total
    fn increment_counter(&self, key: &str, by: u64) -> Result<u64>;

    /// Read a numeric counter, zero when unset
    fn counter(&self, key: &str) -> Result<u64>;

    /// Store the protected snapshot, replacing any earlier one
    fn save_snapshot(&self, snapshot: &MigrationSnapshot) -> Result<()>;

    fn load_snapshot(&self) -> Result<Option<MigrationSnapshot>>;

    fn discard_snapshot(&self) -> Result<bool>;

    /// Append an audit entry and trim the log to `capacity` rows
    fn append_audit(&self, action: AuditAction, detail: &str, capacity: usize)
        -> Result<AuditEntry>;

    /// Most recent audit entries first
    fn list_audit(&self, limit: usize) -> Result<Vec<AuditEntry>>;

    /// Store an open conflict, replacing an older one for the same prompt
    fn save_conflict(&self, record: &ConflictRecord) -> Result<()>;

    /// Open conflicts, oldest first
    fn list_conflicts(&self) -> Result<Vec<ConflictRecord>>;

    fn delete_conflict(&self, prompt_id: &PromptId) -> Result<bool>;

    fn clear_conflicts(&self) -> Result<usize>;
}

/// `SQLite` implementation of `MetaRepository`
pub struct SqliteMetaRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteMetaRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl MetaRepository for SqliteMetaRepository<'_> {
    fn get_value(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove_value(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM sync_meta WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn increment_counter(&self, key: &str, by: u64) -> Result<u64> {
        let total = self.counter(key)?.saturating_add(by);
        self.set_value(key, &total.to_string())?;
        Ok(total)
    }

    fn counter(&self, key: &str) -> Result<u64> {
        Ok(self
            .get_value(key)?
            .and_then(|value| value.parse().ok())
            .unwrap_or(0))
    }

    fn save_snapshot(&self, snapshot: &MigrationSnapshot) -> Result<()> {
        let payload = serde_json::to_string(&snapshot.prompts)?;
        self.conn.execute(
            "INSERT INTO migration_snapshot (singleton, owner_id, captured_at, payload)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT (singleton) DO UPDATE SET
                owner_id = excluded.owner_id,
                captured_at = excluded.captured_at,
                payload = excluded.payload",
            params![
                snapshot.owner_id,
                to_millis(&snapshot.captured_at),
                payload
            ],
        )?;
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<MigrationSnapshot>> {
        let snapshot = self
            .conn
            .query_row(
                "SELECT owner_id, captured_at, payload FROM migration_snapshot
                 WHERE singleton = 1",
                [],
                |row| {
                    let payload: String = row.get(2)?;
                    Ok(MigrationSnapshot {
                        owner_id: row.get(0)?,
                        captured_at: from_millis(row.get(1)?),
                        prompts: serde_json::from_str(&payload).map_err(|error| {
                            rusqlite::Error::FromSqlConversionFailure(
                                2,
                                Type::Text,
                                Box::new(error),
                            )
                        })?,
                    })
                },
            )
            .optional()?;
        Ok(snapshot)
    }

    fn discard_snapshot(&self) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM migration_snapshot WHERE singleton = 1", [])?;
        Ok(rows > 0)
    }

    fn append_audit(
        &self,
        action: AuditAction,
        detail: &str,
        capacity: usize,
    ) -> Result<AuditEntry> {
        let created_at = now();
        self.conn.execute(
            "INSERT INTO audit_log (action, detail, created_at) VALUES (?1, ?2, ?3)",
            params![action.as_str(), detail, to_millis(&created_at)],
        )?;
        let id = self.conn.last_insert_rowid();
        self.conn.execute(
            "DELETE FROM audit_log WHERE id NOT IN (
                SELECT id FROM audit_log ORDER BY id DESC LIMIT ?1
             )",
            params![capacity as i64],
        )?;
        Ok(AuditEntry {
            id,
            action,
            detail: detail.to_string(),
            created_at,
        })
    }

    fn list_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, action, detail, created_at FROM audit_log
             ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit as i64], |row| {
                let action: String = row.get(1)?;
                Ok(AuditEntry {
                    id: row.get(0)?,
                    action: action.parse::<AuditAction>().map_err(|error| {
                        rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(error))
                    })?,
                    detail: row.get(2)?,
                    created_at: from_millis(row.get(3)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn save_conflict(&self, record: &ConflictRecord) -> Result<()> {
        let payload = serde_json::to_string(record)?;
        self.conn.execute(
            "INSERT INTO sync_conflicts (prompt_id, payload, detected_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (prompt_id) DO UPDATE SET
                payload = excluded.payload,
                detected_at = excluded.detected_at",
            params![
                record.prompt_id.as_str(),
                payload,
                to_millis(&record.detected_at)
            ],
        )?;
        Ok(())
    }

    fn list_conflicts(&self) -> Result<Vec<ConflictRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM sync_conflicts ORDER BY detected_at ASC, prompt_id ASC")?;
        let records = stmt
            .query_map([], |row| {
                let payload: String = row.get(0)?;
                serde_json::from_str(&payload).map_err(|error| {
                    rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(error))
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn delete_conflict(&self, prompt_id: &PromptId) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM sync_conflicts WHERE prompt_id = ?1",
            params![prompt_id.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn clear_conflicts(&self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM sync_conflicts", [])?)
    }
}
