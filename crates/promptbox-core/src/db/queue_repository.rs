//! Outbound queue repository

#![allow(clippy::cast_possible_wrap)]

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};

use crate::error::Result;
use crate::models::{Prompt, PromptId, QueueItem, QueueOp};
use crate::util::{from_millis, now, to_millis};

const QUEUE_COLUMNS: &str =
    "id, op, prompt_id, payload, created_at, attempts, next_attempt_at, last_error";

/// Trait for queue storage operations
pub trait QueueRepository {
    /// Append an item, returning its key
    fn push(&self, op: QueueOp, payload: &Prompt) -> Result<i64>;

    /// Total number of items, parked included
    fn len(&self) -> Result<usize>;

    /// Delete the `count` oldest items, returning how many were removed
    fn evict_oldest(&self, count: usize) -> Result<usize>;

    /// Items due for delivery at `now`, oldest first
    fn due(&self, max_attempts: u32, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueueItem>>;

    /// Every item, oldest first
    fn list(&self) -> Result<Vec<QueueItem>>;

    /// Number of items with fewer than `max_attempts` attempts
    fn count_active(&self, max_attempts: u32) -> Result<usize>;

    /// Number of parked items
    fn count_parked(&self, max_attempts: u32) -> Result<usize>;

    /// Whether `prompt_id` has items other than `exclude`
    fn has_other_items(&self, prompt_id: &PromptId, exclude: &[i64]) -> Result<bool>;

    /// Remove items by key
    fn delete(&self, ids: &[i64]) -> Result<usize>;

    /// Increment one item's attempt counter and schedule its next attempt
    fn record_failure(
        &self,
        id: i64,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<Option<u32>>;

    /// Reset every parked item to zero attempts
    fn reset_parked(&self, max_attempts: u32) -> Result<usize>;

    /// Discard every item
    fn clear(&self) -> Result<usize>;
}

/// `SQLite` implementation of `QueueRepository`
pub struct SqliteQueueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteQueueRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueItem> {
        let op: String = row.get(1)?;
        let prompt_id: String = row.get(2)?;
        let payload: String = row.get(3)?;
        Ok(QueueItem {
            id: row.get(0)?,
            op: op.parse::<QueueOp>().map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(error))
            })?,
            prompt_id: prompt_id.parse::<PromptId>().map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(error))
            })?,
            payload: serde_json::from_str(&payload).map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(error))
            })?,
            created_at: from_millis(row.get(4)?),
            attempts: row.get(5)?,
            next_attempt_at: row.get::<_, Option<i64>>(6)?.map(from_millis),
            last_error: row.get(7)?,
        })
    }
}

impl QueueRepository for SqliteQueueRepository<'_> {
    fn push(&self, op: QueueOp, payload: &Prompt) -> Result<i64> {
        let encoded = serde_json::to_string(payload)?;
        self.conn.execute(
            "INSERT INTO sync_queue (op, prompt_id, payload, created_at, attempts)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![
                op.as_str(),
                payload.id.as_str(),
                encoded,
                to_millis(&now())
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn len(&self) -> Result<usize> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        Ok(count)
    }

    fn evict_oldest(&self, count: usize) -> Result<usize> {
        if count == 0 {
            return Ok(0);
        }
        let rows = self.conn.execute(
            "DELETE FROM sync_queue WHERE id IN (
                SELECT id FROM sync_queue ORDER BY id ASC LIMIT ?1
             )",
            params![count as i64],
        )?;
        Ok(rows)
    }

    fn due(&self, max_attempts: u32, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueueItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue
             WHERE attempts < ?1 AND (next_attempt_at IS NULL OR next_attempt_at <= ?2)
             ORDER BY id ASC
             LIMIT ?3"
        ))?;
        let items = stmt
            .query_map(
                params![max_attempts, to_millis(&now), limit as i64],
                Self::parse_item,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn list(&self) -> Result<Vec<QueueItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {QUEUE_COLUMNS} FROM sync_queue ORDER BY id ASC"
        ))?;
        let items = stmt
            .query_map([], Self::parse_item)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn count_active(&self, max_attempts: u32) -> Result<usize> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE attempts < ?1",
            params![max_attempts],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn count_parked(&self, max_attempts: u32) -> Result<usize> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE attempts >= ?1",
            params![max_attempts],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn has_other_items(&self, prompt_id: &PromptId, exclude: &[i64]) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id FROM sync_queue WHERE prompt_id = ?1")?;
        let ids = stmt
            .query_map(params![prompt_id.as_str()], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids.iter().any(|id| !exclude.contains(id)))
    }

    fn delete(&self, ids: &[i64]) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare_cached("DELETE FROM sync_queue WHERE id = ?1")?;
        let mut removed = 0;
        for id in ids {
            removed += stmt.execute(params![id])?;
        }
        Ok(removed)
    }

    fn record_failure(
        &self,
        id: i64,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<Option<u32>> {
        let rows = self.conn.execute(
            "UPDATE sync_queue
             SET attempts = attempts + 1, next_attempt_at = ?2, last_error = ?3
             WHERE id = ?1",
            params![id, to_millis(&next_attempt_at), error],
        )?;
        if rows == 0 {
            // Cleared or evicted while the flush was in flight.
            return Ok(None);
        }
        let attempts = self.conn.query_row(
            "SELECT attempts FROM sync_queue WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(Some(attempts))
    }

    fn reset_parked(&self, max_attempts: u32) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE sync_queue SET attempts = 0, next_attempt_at = NULL
             WHERE attempts >= ?1",
            params![max_attempts],
        )?;
        Ok(rows)
    }

    fn clear(&self) -> Result<usize> {
        let rows = self.conn.execute("DELETE FROM sync_queue", [])?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{LOCAL_OWNER, MAX_ATTEMPTS};

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn push_and_list_round_trip_payload() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        let prompt = Prompt::new(LOCAL_OWNER, "t", "c");

        let id = repo.push(QueueOp::Create, &prompt).unwrap();
        let items = repo.list().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, id);
        assert_eq!(items[0].payload, prompt);
        assert_eq!(items[0].attempts, 0);
    }

    #[test]
    fn evict_oldest_removes_in_key_order() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        let first = Prompt::new(LOCAL_OWNER, "first", "c");
        let second = Prompt::new(LOCAL_OWNER, "second", "c");
        repo.push(QueueOp::Create, &first).unwrap();
        repo.push(QueueOp::Create, &second).unwrap();

        assert_eq!(repo.evict_oldest(1).unwrap(), 1);
        let items = repo.list().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].prompt_id, second.id);
    }

    #[test]
    fn record_failure_parks_after_max_attempts() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        let prompt = Prompt::new(LOCAL_OWNER, "t", "c");
        let id = repo.push(QueueOp::Update, &prompt).unwrap();

        let now = now();
        for attempt in 1..=MAX_ATTEMPTS {
            assert_eq!(
                repo.record_failure(id, now, "offline").unwrap(),
                Some(attempt)
            );
        }

        assert_eq!(repo.count_parked(MAX_ATTEMPTS).unwrap(), 1);
        assert_eq!(repo.count_active(MAX_ATTEMPTS).unwrap(), 0);
        assert!(repo.due(MAX_ATTEMPTS, now, 10).unwrap().is_empty());

        assert_eq!(repo.reset_parked(MAX_ATTEMPTS).unwrap(), 1);
        let items = repo.due(MAX_ATTEMPTS, now, 10).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].attempts, 0);
    }

    #[test]
    fn due_skips_items_in_backoff() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        let prompt = Prompt::new(LOCAL_OWNER, "t", "c");
        let id = repo.push(QueueOp::Update, &prompt).unwrap();

        let now = now();
        repo.record_failure(id, now + chrono::Duration::seconds(10), "boom")
            .unwrap();
        assert!(repo.due(MAX_ATTEMPTS, now, 10).unwrap().is_empty());
        assert_eq!(
            repo.due(MAX_ATTEMPTS, now + chrono::Duration::seconds(10), 10)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn record_failure_on_missing_item_is_none() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        assert_eq!(repo.record_failure(42, now(), "gone").unwrap(), None);
    }

    #[test]
    fn has_other_items_ignores_excluded_keys() {
        let db = setup();
        let repo = SqliteQueueRepository::new(db.connection());
        let prompt = Prompt::new(LOCAL_OWNER, "t", "c");
        let first = repo.push(QueueOp::Create, &prompt).unwrap();
        assert!(!repo.has_other_items(&prompt.id, &[first]).unwrap());

        repo.push(QueueOp::Update, &prompt).unwrap();
        assert!(repo.has_other_items(&prompt.id, &[first]).unwrap());
    }
}
