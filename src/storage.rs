//! Local engram storage: per-engram JSON files, an SQLite index for listing
//! and search, and the durable pending-signal queue feeding the batch
//! processor.
//!
//! The queue is single-producer/single-consumer and survives crashes: each
//! pending signal is one NDJSON line, removed only after a successful drain.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::graph::{now_ts, Engram};

/// A queued text artifact awaiting decision extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSignal {
    pub id: String,
    pub content: String,
    pub source: String,
    pub created_at: i64,
}

impl PendingSignal {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: format!("sig_{}", &Uuid::new_v4().simple().to_string()[..12]),
            content: content.into(),
            source: source.into(),
            created_at: now_ts(),
        }
    }
}

/// An index row describing one stored engram.
#[derive(Debug, Clone, Serialize)]
pub struct EngramIndexEntry {
    pub engram_id: String,
    pub session_id: String,
    pub commit_sha: Option<String>,
    pub branch: Option<String>,
    pub timestamp: i64,
    pub intent: Option<String>,
    pub file_path: String,
}

/// Manages persistent storage of engrams and the pending-signal queue.
pub struct EngramStorage {
    pending_dir: PathBuf,
    queue_path: PathBuf,
    index: Mutex<Connection>,
    soft_cap: usize,
    hard_cap: usize,
}

impl EngramStorage {
    /// Open (creating if needed) storage rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>, soft_cap: usize, hard_cap: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let pending_dir = dir.join("pending");
        fs::create_dir_all(&pending_dir)?;

        let index = Connection::open(dir.join("index.db"))?;
        index.execute(
            "CREATE TABLE IF NOT EXISTS engrams (
                engram_id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                commit_sha TEXT,
                branch TEXT,
                timestamp INTEGER NOT NULL,
                intent TEXT,
                file_path TEXT NOT NULL
            )",
            [],
        )?;
        index.execute(
            "CREATE INDEX IF NOT EXISTS idx_engrams_timestamp ON engrams(timestamp DESC)",
            [],
        )?;
        index.execute(
            "CREATE INDEX IF NOT EXISTS idx_engrams_branch ON engrams(branch)",
            [],
        )?;

        Ok(Self {
            queue_path: pending_dir.join("signals.ndjson"),
            pending_dir,
            index: Mutex::new(index),
            soft_cap,
            hard_cap,
        })
    }

    fn with_index<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .index
            .lock()
            .map_err(|_| Error::Storage("engram index mutex poisoned".into()))?;
        f(&conn).map_err(|e| Error::Storage(e.to_string()))
    }

    /// Save an engram as a JSON file and index it.
    pub fn save_engram(&self, engram: &Engram) -> Result<()> {
        let file_path = self.pending_dir.join(format!("{}.json", engram.id));
        fs::write(&file_path, serde_json::to_string_pretty(engram)?)?;

        let path_str = file_path.display().to_string();
        self.with_index(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO engrams
                    (engram_id, session_id, commit_sha, branch, timestamp, intent, file_path)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    engram.id,
                    engram.session_id,
                    engram.commit_sha,
                    engram.branch,
                    engram.created_at,
                    engram.intent,
                    path_str,
                ],
            )?;
            Ok(())
        })?;
        tracing::info!(target: "membria::storage", engram_id = %engram.id, "engram saved");
        Ok(())
    }

    /// Load an engram back from its JSON file.
    pub fn load_engram(&self, engram_id: &str) -> Result<Option<Engram>> {
        let file_path: Option<String> = self.with_index(|conn| {
            conn.query_row(
                "SELECT file_path FROM engrams WHERE engram_id = ?1",
                params![engram_id],
                |row| row.get(0),
            )
            .optional()
        })?;
        let Some(file_path) = file_path else {
            return Ok(None);
        };
        let raw = fs::read_to_string(file_path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Recent engrams, optionally filtered by branch.
    pub fn list_engrams(&self, limit: usize, branch: Option<&str>) -> Result<Vec<EngramIndexEntry>> {
        self.with_index(|conn| {
            let mut sql = String::from(
                "SELECT engram_id, session_id, commit_sha, branch, timestamp, intent, file_path
                 FROM engrams WHERE 1=1",
            );
            if branch.is_some() {
                sql.push_str(" AND branch = ?1");
            }
            sql.push_str(" ORDER BY timestamp DESC LIMIT ?");
            let mut stmt = conn.prepare(&sql)?;
            let limit = limit as i64;
            let rows = if let Some(branch) = branch {
                stmt.query_map(params![branch, limit], index_entry_from_row)?
                    .filter_map(|r| r.ok())
                    .collect()
            } else {
                stmt.query_map(params![limit], index_entry_from_row)?
                    .filter_map(|r| r.ok())
                    .collect()
            };
            Ok(rows)
        })
    }

    /// Substring search over session id and intent.
    pub fn search_engrams(&self, query: &str, limit: usize) -> Result<Vec<EngramIndexEntry>> {
        let pattern = format!("%{}%", query.replace('%', "").replace('_', ""));
        self.with_index(|conn| {
            let mut stmt = conn.prepare(
                "SELECT engram_id, session_id, commit_sha, branch, timestamp, intent, file_path
                 FROM engrams
                 WHERE session_id LIKE ?1 OR intent LIKE ?1
                 ORDER BY timestamp DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![pattern, limit as i64], index_entry_from_row)?
                .filter_map(|r| r.ok())
                .collect();
            Ok(rows)
        })
    }

    // ==================== Pending-signal queue ====================

    /// Number of signals waiting for extraction.
    pub fn pending_count(&self) -> Result<usize> {
        if !self.queue_path.exists() {
            return Ok(0);
        }
        let raw = fs::read_to_string(&self.queue_path)?;
        Ok(raw.lines().filter(|l| !l.trim().is_empty()).count())
    }

    /// Whether the queue has crossed its soft cap (run extraction sooner).
    pub fn over_soft_cap(&self) -> Result<bool> {
        Ok(self.pending_count()? > self.soft_cap)
    }

    /// Append a signal to the durable queue. Rejects with a backpressure
    /// error past the hard cap; the caller surfaces it without retrying.
    pub fn enqueue_signal(&self, signal: &PendingSignal) -> Result<()> {
        let count = self.pending_count()?;
        if count >= self.hard_cap {
            return Err(Error::Backpressure(format!(
                "pending-signal queue at hard cap ({})",
                self.hard_cap
            )));
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.queue_path)?;
        let line = serde_json::to_string(signal)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Remove and return up to `max` signals, oldest first. Unparseable
    /// lines are dropped with a warning.
    pub fn drain_signals(&self, max: usize) -> Result<Vec<PendingSignal>> {
        if !self.queue_path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.queue_path)?;
        let mut drained = Vec::new();
        let mut remaining = String::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if drained.len() >= max {
                remaining.push_str(line);
                remaining.push('\n');
                continue;
            }
            match serde_json::from_str::<PendingSignal>(line) {
                Ok(signal) => drained.push(signal),
                Err(e) => {
                    tracing::warn!(target: "membria::storage", error = %e, "dropping bad signal line");
                }
            }
        }
        // Rewrite the remainder atomically so a crash cannot duplicate work.
        let tmp = self.queue_path.with_extension("ndjson.tmp");
        fs::write(&tmp, remaining)?;
        fs::rename(&tmp, &self.queue_path)?;
        Ok(drained)
    }
}

fn index_entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<EngramIndexEntry> {
    Ok(EngramIndexEntry {
        engram_id: row.get(0)?,
        session_id: row.get(1)?,
        commit_sha: row.get(2)?,
        branch: row.get(3)?,
        timestamp: row.get(4)?,
        intent: row.get(5)?,
        file_path: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, EngramStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = EngramStorage::open(dir.path(), 5, 10).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_save_and_load_engram() {
        let (_dir, storage) = storage();
        let mut engram = Engram::new("sess-1");
        engram.branch = Some("main".into());
        engram.intent = Some("refactor auth".into());
        storage.save_engram(&engram).unwrap();

        let loaded = storage.load_engram(&engram.id).unwrap().unwrap();
        assert_eq!(loaded.session_id, "sess-1");
        assert_eq!(loaded.intent.as_deref(), Some("refactor auth"));
        assert!(storage.load_engram("eng_ghost").unwrap().is_none());
    }

    #[test]
    fn test_list_and_search() {
        let (_dir, storage) = storage();
        for (session, branch, intent) in [
            ("s1", "main", "fix login"),
            ("s2", "feature/x", "add billing"),
            ("s3", "main", "tune queries"),
        ] {
            let mut engram = Engram::new(session);
            engram.branch = Some(branch.into());
            engram.intent = Some(intent.into());
            storage.save_engram(&engram).unwrap();
        }

        assert_eq!(storage.list_engrams(10, None).unwrap().len(), 3);
        assert_eq!(storage.list_engrams(10, Some("main")).unwrap().len(), 2);
        let hits = storage.search_engrams("billing", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].session_id, "s2");
    }

    #[test]
    fn test_signal_queue_fifo() {
        let (_dir, storage) = storage();
        for i in 0..3 {
            storage
                .enqueue_signal(&PendingSignal::new(format!("signal {}", i), "test"))
                .unwrap();
        }
        assert_eq!(storage.pending_count().unwrap(), 3);

        let drained = storage.drain_signals(2).unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].content, "signal 0");
        assert_eq!(storage.pending_count().unwrap(), 1);

        let rest = storage.drain_signals(10).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].content, "signal 2");
        assert_eq!(storage.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_hard_cap_backpressure() {
        let (_dir, storage) = storage();
        for i in 0..10 {
            storage
                .enqueue_signal(&PendingSignal::new(format!("s{}", i), "test"))
                .unwrap();
        }
        let err = storage.enqueue_signal(&PendingSignal::new("overflow", "test"));
        assert!(matches!(err, Err(Error::Backpressure(_))));
    }

    #[test]
    fn test_soft_cap_flag() {
        let (_dir, storage) = storage();
        assert!(!storage.over_soft_cap().unwrap());
        for i in 0..6 {
            storage
                .enqueue_signal(&PendingSignal::new(format!("s{}", i), "test"))
                .unwrap();
        }
        assert!(storage.over_soft_cap().unwrap());
    }

    #[test]
    fn test_queue_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let storage = EngramStorage::open(dir.path(), 5, 10).unwrap();
            storage
                .enqueue_signal(&PendingSignal::new("durable", "test"))
                .unwrap();
        }
        let storage = EngramStorage::open(dir.path(), 5, 10).unwrap();
        assert_eq!(storage.pending_count().unwrap(), 1);
    }
}
