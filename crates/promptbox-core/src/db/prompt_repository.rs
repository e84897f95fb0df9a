//! Prompt repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::models::{Prompt, PromptId, Tag, TagCount, TagId};
use crate::util::{from_millis, to_millis};

const PROMPT_COLUMNS: &str = "p.id, p.owner_id, p.device_id, p.title, p.content, p.checksum, \
     p.pinned, p.sort_order, p.version, p.created_at, p.updated_at, p.archived_at";

/// Ordering for prompt listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListOrder {
    /// Pinned first, then `sort_order` ascending, then most recently updated
    #[default]
    Default,
    UpdatedDesc,
    CreatedDesc,
    TitleAsc,
}

impl ListOrder {
    const fn sql(self) -> &'static str {
        match self {
            Self::Default => "p.pinned DESC, p.sort_order ASC, p.updated_at DESC, p.id ASC",
            Self::UpdatedDesc => "p.updated_at DESC, p.id ASC",
            Self::CreatedDesc => "p.created_at DESC, p.id ASC",
            Self::TitleAsc => "p.title COLLATE NOCASE ASC, p.id ASC",
        }
    }
}

/// Filter and ordering for [`PromptRepository::list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub order: ListOrder,
    pub tag: Option<String>,
    /// `None` returns every matching row
    pub limit: Option<usize>,
    pub offset: usize,
    pub include_archived: bool,
}

impl ListQuery {
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

/// Trait for prompt storage operations
pub trait PromptRepository {
    /// Insert a new prompt and its tag set
    fn insert(&self, prompt: &Prompt) -> Result<()>;

    /// Insert or overwrite a prompt and its tag set
    fn upsert(&self, prompt: &Prompt) -> Result<()>;

    /// Overwrite an existing prompt and its tag set
    fn update(&self, prompt: &Prompt) -> Result<()>;

    /// Get a prompt by ID, archived or not
    fn get(&self, id: &PromptId) -> Result<Option<Prompt>>;

    /// List prompts matching `query`
    fn list(&self, query: &ListQuery) -> Result<Vec<Prompt>>;

    /// Prompts whose checksum matches, compared case-insensitively
    fn find_by_checksum(&self, checksum: &str) -> Result<Vec<Prompt>>;

    /// Replace the full tag set of a prompt atomically
    fn replace_tags(&self, id: &PromptId, owner_id: &str, tags: &BTreeSet<String>) -> Result<()>;

    /// Tag names used by active prompts, with counts
    fn list_tags(&self) -> Result<Vec<TagCount>>;

    /// Physically delete prompts archived before `cutoff`
    fn purge_archived_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    /// Move every prompt owned by `from` to `to`
    fn reassign_owner(&self, from: &str, to: &str) -> Result<usize>;

    /// Delete every prompt and tag
    fn delete_all(&self) -> Result<usize>;
}

/// `SQLite` implementation of `PromptRepository`
pub struct SqlitePromptRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqlitePromptRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Get or create a tag by name.
    ///
    /// Insert-if-absent followed by a lookup, so a tag created by an
    /// interleaved writer between the two steps is simply reused.
    fn get_or_create_tag(&self, owner_id: &str, name: &str) -> Result<TagId> {
        let tag = Tag::new(owner_id, name);
        self.conn.execute(
            "INSERT INTO tags (id, owner_id, name, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (owner_id, name) DO NOTHING",
            params![
                tag.id.as_str(),
                tag.owner_id,
                tag.name,
                to_millis(&tag.created_at)
            ],
        )?;

        let id: String = self.conn.query_row(
            "SELECT id FROM tags WHERE owner_id = ?1 AND name = ?2",
            params![owner_id, tag.name],
            |row| row.get(0),
        )?;
        id.parse()
            .map_err(|_| Error::validation(format!("invalid tag id in store: {id}")))
    }

    fn replace_tags_inner(
        &self,
        id: &PromptId,
        owner_id: &str,
        tags: &BTreeSet<String>,
    ) -> Result<()> {
        self.conn.execute(
            "DELETE FROM prompt_tags WHERE prompt_id = ?1",
            params![id.as_str()],
        )?;

        for name in tags {
            let tag_id = self.get_or_create_tag(owner_id, name)?;
            self.conn.execute(
                "INSERT OR IGNORE INTO prompt_tags (prompt_id, tag_id) VALUES (?1, ?2)",
                params![id.as_str(), tag_id.as_str()],
            )?;
        }

        Ok(())
    }

    fn tags_for(&self, id: &PromptId) -> Result<BTreeSet<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT t.name FROM tags t
             JOIN prompt_tags pt ON pt.tag_id = t.id
             WHERE pt.prompt_id = ?1",
        )?;
        let names = stmt
            .query_map(params![id.as_str()], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(names)
    }

    fn with_tags(&self, mut prompts: Vec<Prompt>) -> Result<Vec<Prompt>> {
        for prompt in &mut prompts {
            prompt.tags = self.tags_for(&prompt.id)?;
        }
        Ok(prompts)
    }

    fn write_row(&self, prompt: &Prompt, sql: &str) -> Result<usize> {
        let rows = self.conn.execute(
            sql,
            params![
                prompt.id.as_str(),
                prompt.owner_id,
                prompt.device_id,
                prompt.title,
                prompt.content,
                prompt.checksum.to_ascii_lowercase(),
                prompt.pinned,
                prompt.sort_order,
                prompt.version,
                to_millis(&prompt.created_at),
                to_millis(&prompt.updated_at),
                prompt.archived_at.as_ref().map(to_millis),
            ],
        )?;
        Ok(rows)
    }

    /// Parse a prompt from a database row (tags are loaded separately)
    fn parse_prompt(row: &rusqlite::Row<'_>) -> rusqlite::Result<Prompt> {
        let id: String = row.get(0)?;
        let id = id.parse::<PromptId>().map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(error))
        })?;
        Ok(Prompt {
            id,
            owner_id: row.get(1)?,
            device_id: row.get(2)?,
            title: row.get(3)?,
            content: row.get(4)?,
            checksum: row.get(5)?,
            tags: BTreeSet::new(),
            pinned: row.get(6)?,
            sort_order: row.get(7)?,
            version: row.get(8)?,
            created_at: from_millis(row.get(9)?),
            updated_at: from_millis(row.get(10)?),
            archived_at: row.get::<_, Option<i64>>(11)?.map(from_millis),
        })
    }
}

impl PromptRepository for SqlitePromptRepository<'_> {
    fn insert(&self, prompt: &Prompt) -> Result<()> {
        prompt.validate()?;
        self.write_row(
            prompt,
            "INSERT INTO prompts (id, owner_id, device_id, title, content, checksum, pinned,
                sort_order, version, created_at, updated_at, archived_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        self.replace_tags(&prompt.id, &prompt.owner_id, &prompt.tags)
    }

    fn upsert(&self, prompt: &Prompt) -> Result<()> {
        prompt.validate()?;
        self.write_row(
            prompt,
            "INSERT INTO prompts (id, owner_id, device_id, title, content, checksum, pinned,
                sort_order, version, created_at, updated_at, archived_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT (id) DO UPDATE SET
                owner_id = excluded.owner_id,
                device_id = excluded.device_id,
                title = excluded.title,
                content = excluded.content,
                checksum = excluded.checksum,
                pinned = excluded.pinned,
                sort_order = excluded.sort_order,
                version = excluded.version,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at,
                archived_at = excluded.archived_at",
        )?;
        self.replace_tags(&prompt.id, &prompt.owner_id, &prompt.tags)
    }

    fn update(&self, prompt: &Prompt) -> Result<()> {
        prompt.validate()?;
        let rows = self.write_row(
            prompt,
            "UPDATE prompts SET owner_id = ?2, device_id = ?3, title = ?4, content = ?5,
                checksum = ?6, pinned = ?7, sort_order = ?8, version = ?9, created_at = ?10,
                updated_at = ?11, archived_at = ?12
             WHERE id = ?1",
        )?;
        if rows == 0 {
            return Err(Error::NotFound(prompt.id.to_string()));
        }
        self.replace_tags(&prompt.id, &prompt.owner_id, &prompt.tags)
    }

    fn get(&self, id: &PromptId) -> Result<Option<Prompt>> {
        let prompt = self
            .conn
            .query_row(
                &format!("SELECT {PROMPT_COLUMNS} FROM prompts p WHERE p.id = ?1"),
                params![id.as_str()],
                Self::parse_prompt,
            )
            .optional()?;

        match prompt {
            Some(mut prompt) => {
                prompt.tags = self.tags_for(&prompt.id)?;
                Ok(Some(prompt))
            }
            None => Ok(None),
        }
    }

    fn list(&self, query: &ListQuery) -> Result<Vec<Prompt>> {
        let archived_filter = if query.include_archived {
            "1 = 1"
        } else {
            "p.archived_at IS NULL"
        };
        let tag_join = if query.tag.is_some() {
            "JOIN prompt_tags pt ON pt.prompt_id = p.id
             JOIN tags t ON t.id = pt.tag_id AND t.name = ?3 COLLATE NOCASE"
        } else {
            ""
        };
        let sql = format!(
            "SELECT {PROMPT_COLUMNS} FROM prompts p {tag_join}
             WHERE {archived_filter}
             ORDER BY {}
             LIMIT ?1 OFFSET ?2",
            query.order.sql()
        );

        let limit = query.limit.map_or(-1, |limit| limit as i64);
        let offset = query.offset as i64;
        let mut stmt = self.conn.prepare(&sql)?;
        let prompts = match &query.tag {
            Some(tag) => stmt
                .query_map(params![limit, offset, tag.trim()], Self::parse_prompt)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt
                .query_map(params![limit, offset], Self::parse_prompt)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
        };

        self.with_tags(prompts)
    }

    fn find_by_checksum(&self, checksum: &str) -> Result<Vec<Prompt>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PROMPT_COLUMNS} FROM prompts p WHERE p.checksum = ?1 ORDER BY p.created_at"
        ))?;
        let prompts = stmt
            .query_map(
                params![checksum.to_ascii_lowercase()],
                Self::parse_prompt,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        self.with_tags(prompts)
    }

    fn replace_tags(&self, id: &PromptId, owner_id: &str, tags: &BTreeSet<String>) -> Result<()> {
        self.conn.execute_batch("SAVEPOINT replace_tags")?;
        match self.replace_tags_inner(id, owner_id, tags) {
            Ok(()) => {
                self.conn.execute_batch("RELEASE replace_tags")?;
                Ok(())
            }
            Err(error) => {
                self.conn
                    .execute_batch("ROLLBACK TO replace_tags; RELEASE replace_tags")
                    .ok();
                Err(error)
            }
        }
    }

    fn list_tags(&self) -> Result<Vec<TagCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.name, COUNT(p.id) AS count
             FROM tags t
             JOIN prompt_tags pt ON t.id = pt.tag_id
             JOIN prompts p ON pt.prompt_id = p.id AND p.archived_at IS NULL
             GROUP BY t.name
             ORDER BY count DESC, t.name ASC",
        )?;

        let tags = stmt
            .query_map([], |row| {
                Ok(TagCount {
                    name: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(tags)
    }

    fn purge_archived_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM prompts WHERE archived_at IS NOT NULL AND archived_at < ?1",
            params![to_millis(&cutoff)],
        )?;
        Ok(rows)
    }

    fn reassign_owner(&self, from: &str, to: &str) -> Result<usize> {
        let owned = {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT {PROMPT_COLUMNS} FROM prompts p WHERE p.owner_id = ?1"
            ))?;
            let prompts = stmt
                .query_map(params![from], Self::parse_prompt)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            self.with_tags(prompts)?
        };

        for prompt in &owned {
            self.conn.execute(
                "UPDATE prompts SET owner_id = ?1 WHERE id = ?2",
                params![to, prompt.id.as_str()],
            )?;
            self.replace_tags(&prompt.id, to, &prompt.tags)?;
        }
        self.conn.execute(
            "DELETE FROM tags WHERE owner_id = ?1
             AND id NOT IN (SELECT tag_id FROM prompt_tags)",
            params![from],
        )?;

        Ok(owned.len())
    }

    fn delete_all(&self) -> Result<usize> {
        let rows = self.conn.execute("DELETE FROM prompts", [])?;
        self.conn.execute("DELETE FROM tags", [])?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{normalize_tags, LOCAL_OWNER};
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn prompt(title: &str, tags: &[&str]) -> Prompt {
        let mut prompt = Prompt::new(LOCAL_OWNER, title, format!("{title} body"));
        prompt.tags = normalize_tags(tags);
        prompt
    }

    #[test]
    fn test_insert_and_get() {
        let db = setup();
        let repo = SqlitePromptRepository::new(db.connection());

        let prompt = prompt("Hello", &["greeting", "test"]);
        repo.insert(&prompt).unwrap();

        let fetched = repo.get(&prompt.id).unwrap().unwrap();
        assert_eq!(fetched, prompt);
    }

    #[test]
    fn test_insert_rejects_invalid_without_writing() {
        let db = setup();
        let repo = SqlitePromptRepository::new(db.connection());

        let mut prompt = prompt("Hello", &["greeting"]);
        prompt.content = "tampered".to_string();
        assert!(matches!(repo.insert(&prompt), Err(Error::Validation(_))));
        assert!(repo.get(&prompt.id).unwrap().is_none());
        assert!(repo.list_tags().unwrap().is_empty());
    }

    #[test]
    fn test_list_default_order() {
        let db = setup();
        let repo = SqlitePromptRepository::new(db.connection());

        let mut older = prompt("older", &[]);
        older.updated_at = from_millis(1_000);
        let mut newer = prompt("newer", &[]);
        newer.updated_at = from_millis(2_000);
        let mut ordered = prompt("ordered", &[]);
        ordered.sort_order = -1;
        ordered.updated_at = from_millis(500);
        let mut pinned = prompt("pinned", &[]);
        pinned.pinned = true;
        pinned.sort_order = 10;
        pinned.updated_at = from_millis(100);

        for p in [&older, &newer, &ordered, &pinned] {
            repo.insert(p).unwrap();
        }

        let titles = repo
            .list(&ListQuery::default())
            .unwrap()
            .into_iter()
            .map(|p| p.title)
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["pinned", "ordered", "newer", "older"]);
    }

    #[test]
    fn test_list_excludes_archived() {
        let db = setup();
        let repo = SqlitePromptRepository::new(db.connection());

        let active = prompt("active", &["x"]);
        let mut archived = prompt("archived", &["x"]);
        archived.archived_at = Some(crate::util::now());
        repo.insert(&active).unwrap();
        repo.insert(&archived).unwrap();

        let listed = repo.list(&ListQuery::default()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, active.id);

        let all = repo
            .list(&ListQuery {
                include_archived: true,
                ..ListQuery::default()
            })
            .unwrap();
        assert_eq!(all.len(), 2);

        let tags = repo.list_tags().unwrap();
        assert_eq!(
            tags,
            vec![TagCount {
                name: "x".to_string(),
                count: 1
            }]
        );
    }

    #[test]
    fn test_list_by_tag_and_limit() {
        let db = setup();
        let repo = SqlitePromptRepository::new(db.connection());

        repo.insert(&prompt("a", &["rust"])).unwrap();
        repo.insert(&prompt("b", &["rust", "ai"])).unwrap();
        repo.insert(&prompt("c", &["ai"])).unwrap();

        let rust = repo
            .list(&ListQuery {
                tag: Some("Rust".to_string()),
                ..ListQuery::default()
            })
            .unwrap();
        assert_eq!(rust.len(), 2);

        assert_eq!(repo.list(&ListQuery::with_limit(1)).unwrap().len(), 1);
    }

    #[test]
    fn test_replace_tags_is_full_replacement() {
        let db = setup();
        let repo = SqlitePromptRepository::new(db.connection());

        let mut p = prompt("a", &["one", "two"]);
        repo.insert(&p).unwrap();

        p.tags = normalize_tags(["two", "three"]);
        repo.replace_tags(&p.id, &p.owner_id, &p.tags).unwrap();

        let fetched = repo.get(&p.id).unwrap().unwrap();
        assert_eq!(fetched.tags, normalize_tags(["three", "two"]));
    }

    #[test]
    fn test_tag_creation_tolerates_existing_tag() {
        let db = setup();
        let repo = SqlitePromptRepository::new(db.connection());

        let first = repo.get_or_create_tag(LOCAL_OWNER, "shared").unwrap();
        let second = repo.get_or_create_tag(LOCAL_OWNER, "SHARED").unwrap();
        assert_eq!(first, second);

        let other_owner = repo.get_or_create_tag("someone", "shared").unwrap();
        assert_ne!(first, other_owner);
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let db = setup();
        let repo = SqlitePromptRepository::new(db.connection());
        let p = prompt("ghost", &[]);
        assert!(matches!(repo.update(&p), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_find_by_checksum_is_case_insensitive() {
        let db = setup();
        let repo = SqlitePromptRepository::new(db.connection());
        let p = prompt("hash me", &[]);
        repo.insert(&p).unwrap();

        let found = repo.find_by_checksum(&p.checksum.to_uppercase()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, p.id);
    }

    #[test]
    fn test_purge_archived_before() {
        let db = setup();
        let repo = SqlitePromptRepository::new(db.connection());

        let mut old = prompt("old", &[]);
        old.archived_at = Some(from_millis(1_000));
        let mut recent = prompt("recent", &[]);
        recent.archived_at = Some(from_millis(5_000));
        repo.insert(&old).unwrap();
        repo.insert(&recent).unwrap();
        repo.insert(&prompt("live", &[])).unwrap();

        assert_eq!(repo.purge_archived_before(from_millis(2_000)).unwrap(), 1);
        assert!(repo.get(&old.id).unwrap().is_none());
        assert!(repo.get(&recent.id).unwrap().is_some());
    }

    #[test]
    fn test_reassign_owner_moves_tags() {
        let db = setup();
        let repo = SqlitePromptRepository::new(db.connection());

        let p = prompt("mine", &["keep"]);
        repo.insert(&p).unwrap();

        assert_eq!(repo.reassign_owner(LOCAL_OWNER, "user-1").unwrap(), 1);
        let fetched = repo.get(&p.id).unwrap().unwrap();
        assert_eq!(fetched.owner_id, "user-1");
        assert_eq!(fetched.tags, normalize_tags(["keep"]));

        let stale: i64 = db
            .connection()
            .query_row(
                "SELECT COUNT(*) FROM tags WHERE owner_id = ?1",
                params![LOCAL_OWNER],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(stale, 0);
    }
}
