//! The discovery store proper.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, params};

/// Unique identifier for a stored fact.
pub type FactId = i64;

/// A discovery that has been served to the user.
#[derive(Debug, Clone)]
pub struct KnownFact {
    pub id: FactId,
    pub text: String,
    /// Short paraphrase used when embedding history into prompts. Absent
    /// until a compaction round has covered this fact.
    pub compacted: Option<String>,
    pub discovered_at: String,
}

impl KnownFact {
    /// The form of this fact that goes into prompts.
    #[must_use]
    pub fn prompt_text(&self) -> &str {
        match &self.compacted {
            Some(compacted) if !compacted.trim().is_empty() => compacted,
            _ => &self.text,
        }
    }
}

/// A generated fact waiting in the serve queue.
#[derive(Debug, Clone)]
pub struct PendingFact {
    pub id: FactId,
    pub text: String,
    pub created_at: String,
}

/// An interest or dislike. Same shape, separate tables.
#[derive(Debug, Clone)]
pub struct Preference {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

/// Persistent store for the discovery pipeline.
pub struct DiscoveryStore {
    db: Connection,
}

impl DiscoveryStore {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS interests (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS dislikes (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS known_facts (
            id INTEGER PRIMARY KEY,
            text TEXT NOT NULL,
            compacted TEXT,
            discovered_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pending_facts (
            id INTEGER PRIMARY KEY,
            text TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
    ";

    /// Open or create the discovery database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory {}", parent.display())
            })?;
        }

        let db = Connection::open(path)
            .with_context(|| format!("Failed to open discovery store at {}", path.display()))?;
        Self::initialize(db)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory store")?;
        Self::initialize(db)
    }

    fn initialize(db: Connection) -> Result<Self> {
        db.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;",
        )
        .context("Failed to set discovery store pragmas")?;
        db.execute_batch(Self::SCHEMA)
            .context("Failed to create discovery store schema")?;
        Ok(Self { db })
    }

    pub fn add_interest(&mut self, name: &str) -> Result<()> {
        self.db
            .execute(
                "INSERT INTO interests (name, created_at) VALUES (?1, ?2)",
                params![name, now_rfc3339()],
            )
            .context("Failed to insert interest")?;
        Ok(())
    }

    pub fn add_dislike(&mut self, name: &str) -> Result<()> {
        self.db
            .execute(
                "INSERT INTO dislikes (name, created_at) VALUES (?1, ?2)",
                params![name, now_rfc3339()],
            )
            .context("Failed to insert dislike")?;
        Ok(())
    }

    pub fn interests(&self) -> Result<Vec<Preference>> {
        self.preferences("interests")
    }

    pub fn dislikes(&self) -> Result<Vec<Preference>> {
        self.preferences("dislikes")
    }

    fn preferences(&self, table: &str) -> Result<Vec<Preference>> {
        let mut stmt = self
            .db
            .prepare(&format!(
                "SELECT id, name, created_at FROM {table} ORDER BY id ASC"
            ))
            .context("Failed to prepare preference query")?;

        let rows = stmt
            .query_map([], |row| {
                Ok(Preference {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })
            .context("Failed to query preferences")?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to read preference row")
    }

    /// All served discoveries, oldest first.
    pub fn known_facts(&self) -> Result<Vec<KnownFact>> {
        let mut stmt = self
            .db
            .prepare(
                "SELECT id, text, compacted, discovered_at
                 FROM known_facts
                 ORDER BY id ASC",
            )
            .context("Failed to prepare known facts query")?;

        let rows = stmt
            .query_map([], |row| {
                Ok(KnownFact {
                    id: row.get(0)?,
                    text: row.get(1)?,
                    compacted: row.get(2)?,
                    discovered_at: row.get(3)?,
                })
            })
            .context("Failed to query known facts")?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to read known fact row")
    }

    /// Inserts a fact directly into the served history.
    pub fn add_known_fact(&mut self, text: &str) -> Result<FactId> {
        self.db
            .execute(
                "INSERT INTO known_facts (text, discovered_at) VALUES (?1, ?2)",
                params![text, now_rfc3339()],
            )
            .context("Failed to insert known fact")?;
        Ok(self.db.last_insert_rowid())
    }

    /// The serve queue, oldest first.
    pub fn pending_facts(&self) -> Result<Vec<PendingFact>> {
        let mut stmt = self
            .db
            .prepare(
                "SELECT id, text, created_at
                 FROM pending_facts
                 ORDER BY id ASC",
            )
            .context("Failed to prepare pending facts query")?;

        let rows = stmt
            .query_map([], |row| {
                Ok(PendingFact {
                    id: row.get(0)?,
                    text: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })
            .context("Failed to query pending facts")?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to read pending fact row")
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.db
            .query_row("SELECT COUNT(*) FROM pending_facts", [], |row| {
                row.get::<_, i64>(0)
            })
            .unwrap_or(0) as usize
    }

    /// Appends generated facts to the serve queue.
    pub fn append_pending(&mut self, lines: &[String]) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let created_at = now_rfc3339();
        let tx = self
            .db
            .transaction()
            .context("Failed to start pending append transaction")?;
        for line in lines {
            tx.execute(
                "INSERT INTO pending_facts (text, created_at) VALUES (?1, ?2)",
                params![line, &created_at],
            )
            .context("Failed to insert pending fact")?;
        }
        tx.commit().context("Failed to commit pending append")?;
        Ok(())
    }

    /// Replaces the whole serve queue in one transaction. Used after
    /// re-evaluating a queue that predates a profile change.
    pub fn replace_pending(&mut self, lines: &[String]) -> Result<()> {
        let created_at = now_rfc3339();
        let tx = self
            .db
            .transaction()
            .context("Failed to start pending replace transaction")?;
        tx.execute("DELETE FROM pending_facts", [])
            .context("Failed to clear pending facts")?;
        for line in lines {
            tx.execute(
                "INSERT INTO pending_facts (text, created_at) VALUES (?1, ?2)",
                params![line, &created_at],
            )
            .context("Failed to insert pending fact")?;
        }
        tx.commit().context("Failed to commit pending replace")?;
        tracing::debug!(count = lines.len(), "pending queue replaced");
        Ok(())
    }

    /// Takes the oldest pending fact, moves it into the served history, and
    /// returns its text. One transaction, so a crash cannot lose the fact
    /// or serve it twice.
    pub fn promote_next_pending(&mut self) -> Result<Option<String>> {
        let tx = self
            .db
            .transaction()
            .context("Failed to start promote transaction")?;

        let next: Option<(FactId, String)> = tx
            .query_row(
                "SELECT id, text FROM pending_facts ORDER BY id ASC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map(Some)
            .or_else(|err| {
                if err == rusqlite::Error::QueryReturnedNoRows {
                    Ok(None)
                } else {
                    Err(err)
                }
            })
            .context("Failed to read next pending fact")?;

        let Some((id, text)) = next else {
            return Ok(None);
        };

        tx.execute(
            "INSERT INTO known_facts (text, discovered_at) VALUES (?1, ?2)",
            params![&text, now_rfc3339()],
        )
        .context("Failed to record discovery")?;
        tx.execute("DELETE FROM pending_facts WHERE id = ?1", params![id])
            .context("Failed to dequeue pending fact")?;
        tx.commit().context("Failed to commit promote")?;

        Ok(Some(text))
    }

    /// Served facts that no compaction round has paraphrased yet.
    pub fn facts_missing_compacted(&self) -> Result<Vec<KnownFact>> {
        let mut stmt = self
            .db
            .prepare(
                "SELECT id, text, compacted, discovered_at
                 FROM known_facts
                 WHERE compacted IS NULL OR TRIM(compacted) = ''
                 ORDER BY id ASC",
            )
            .context("Failed to prepare missing-compacted query")?;

        let rows = stmt
            .query_map([], |row| {
                Ok(KnownFact {
                    id: row.get(0)?,
                    text: row.get(1)?,
                    compacted: row.get(2)?,
                    discovered_at: row.get(3)?,
                })
            })
            .context("Failed to query facts missing compacted text")?;

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to read missing-compacted row")
    }

    /// Writes one compaction batch. Called per batch so partial progress
    /// survives an interrupted cycle.
    pub fn store_compacted(&mut self, pairs: &[(FactId, String)]) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let tx = self
            .db
            .transaction()
            .context("Failed to start compaction transaction")?;
        for (id, compacted) in pairs {
            tx.execute(
                "UPDATE known_facts SET compacted = ?1 WHERE id = ?2",
                params![compacted, id],
            )
            .context("Failed to store compacted text")?;
        }
        tx.commit().context("Failed to commit compaction batch")?;
        Ok(())
    }

    /// Whether any queued fact predates the latest profile change. Such
    /// facts were generated against an outdated profile and need
    /// re-evaluation before being served.
    pub fn has_stale_pending(&self) -> Result<bool> {
        let stale: i64 = self
            .db
            .query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM pending_facts
                    WHERE created_at < (
                        SELECT IFNULL(MAX(created_at), '')
                        FROM (
                            SELECT created_at FROM interests
                            UNION ALL
                            SELECT created_at FROM dislikes
                        )
                    )
                )",
                [],
                |row| row.get(0),
            )
            .context("Failed to probe pending staleness")?;
        Ok(stale != 0)
    }
}

/// Timestamps are stored as fixed-width RFC 3339 UTC text; lexicographic
/// order matches chronological order, which the staleness probe relies on.
fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preferences_round_trip() {
        let mut store = DiscoveryStore::open_in_memory().expect("open store");
        store.add_interest("space exploration").expect("add interest");
        store.add_interest("deep sea life").expect("add interest");
        store.add_dislike("sports trivia").expect("add dislike");

        let interests = store.interests().expect("interests");
        assert_eq!(interests.len(), 2);
        assert_eq!(interests[0].name, "space exploration");

        let dislikes = store.dislikes().expect("dislikes");
        assert_eq!(dislikes.len(), 1);
        assert_eq!(dislikes[0].name, "sports trivia");
    }

    #[test]
    fn append_and_promote_pending() {
        let mut store = DiscoveryStore::open_in_memory().expect("open store");
        store
            .append_pending(&["first fact".to_string(), "second fact".to_string()])
            .expect("append");
        assert_eq!(store.pending_count(), 2);

        let served = store.promote_next_pending().expect("promote");
        assert_eq!(served.as_deref(), Some("first fact"));
        assert_eq!(store.pending_count(), 1);

        let known = store.known_facts().expect("known");
        assert_eq!(known.len(), 1);
        assert_eq!(known[0].text, "first fact");
    }

    #[test]
    fn promote_on_empty_queue_is_none() {
        let mut store = DiscoveryStore::open_in_memory().expect("open store");
        assert!(store.promote_next_pending().expect("promote").is_none());
    }

    #[test]
    fn replace_pending_swaps_the_queue() {
        let mut store = DiscoveryStore::open_in_memory().expect("open store");
        store
            .append_pending(&["old fact".to_string()])
            .expect("append");
        store
            .replace_pending(&["new fact one".to_string(), "new fact two".to_string()])
            .expect("replace");

        let pending = store.pending_facts().expect("pending");
        let texts: Vec<&str> = pending.iter().map(|fact| fact.text.as_str()).collect();
        assert_eq!(texts, ["new fact one", "new fact two"]);
    }

    #[test]
    fn missing_compacted_filter_and_batch_update() {
        let mut store = DiscoveryStore::open_in_memory().expect("open store");
        let first = store.add_known_fact("Honey never spoils.").expect("add");
        let second = store
            .add_known_fact("Octopuses have three hearts.")
            .expect("add");

        assert_eq!(store.facts_missing_compacted().expect("missing").len(), 2);

        store
            .store_compacted(&[(first, "honey longevity".to_string())])
            .expect("compact");

        let missing = store.facts_missing_compacted().expect("missing");
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, second);
    }

    #[test]
    fn prompt_text_prefers_compacted() {
        let fact = KnownFact {
            id: 1,
            text: "Honey never spoils even after millennia.".to_string(),
            compacted: Some("honey longevity".to_string()),
            discovered_at: String::new(),
        };
        assert_eq!(fact.prompt_text(), "honey longevity");

        let blank = KnownFact {
            compacted: Some("   ".to_string()),
            ..fact.clone()
        };
        assert_eq!(blank.prompt_text(), blank.text);
    }

    #[test]
    fn staleness_tracks_profile_changes() {
        let mut store = DiscoveryStore::open_in_memory().expect("open store");
        store
            .append_pending(&["generated before any profile".to_string()])
            .expect("append");
        assert!(!store.has_stale_pending().expect("probe"));

        // A later profile change outdates the queued fact. Timestamps are
        // second-resolution at worst, so nudge the clock apart.
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.add_interest("volcanoes").expect("interest");
        assert!(store.has_stale_pending().expect("probe"));

        store
            .replace_pending(&["re-evaluated fact".to_string()])
            .expect("replace");
        assert!(!store.has_stale_pending().expect("probe"));
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("edify.db");
        let mut store = DiscoveryStore::open(&path).expect("open");
        store.add_interest("caves").expect("insert");
        drop(store);

        let reopened = DiscoveryStore::open(&path).expect("reopen");
        assert_eq!(reopened.interests().expect("interests").len(), 1);
    }
}
