//! Peerage persistence: the last known state of every declared resource,
//! keyed by resource type and id, in a small SQLite file.

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub resource: String,
    pub id: String,
    /// Seconds since epoch of the last write.
    pub ts: i64,
    pub state: serde_json::Value,
}

pub trait StateStore: Send + Sync {
    fn put(&self, resource: &str, id: &str, state: &serde_json::Value) -> Result<()>;
    fn get(&self, resource: &str, id: &str) -> Result<Option<ResourceState>>;
    /// Returns whether a row was removed.
    fn remove(&self, resource: &str, id: &str) -> Result<bool>;
    /// All rows, optionally restricted to one resource type, newest first.
    fn list(&self, resource: Option<&str>) -> Result<Vec<ResourceState>>;
}

/// SQLite-backed state file. Synchronous; calls are short and rare.
pub struct SqliteStore {
    db: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    /// `PEERAGE_DB_PATH`, else `~/.peerage/state.db`.
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("PEERAGE_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.execute(
            "CREATE TABLE IF NOT EXISTS resource_state (
                resource TEXT NOT NULL,
                id       TEXT NOT NULL,
                ts       INTEGER NOT NULL,
                state    TEXT NOT NULL,
                PRIMARY KEY (resource, id)
            )",
            [],
        )
        .context("creating resource_state table")?;
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(path = %path, "persist: opened");
        Ok(Self { db: Mutex::new(db) })
    }

    pub fn in_memory() -> Result<Self> { Self::open(":memory:") }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> { self.db.lock().unwrap_or_else(PoisonError::into_inner) }
}

fn row_to_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, i64, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode((resource, id, ts, state): (String, String, i64, String)) -> Result<ResourceState> {
    let state = serde_json::from_str(&state).with_context(|| format!("decoding stored state of {} {}", resource, id))?;
    Ok(ResourceState { resource, id, ts, state })
}

impl StateStore for SqliteStore {
    fn put(&self, resource: &str, id: &str, state: &serde_json::Value) -> Result<()> {
        let started = std::time::Instant::now();
        let body = serde_json::to_string(state).context("encoding state")?;
        self.conn()
            .execute(
                "INSERT INTO resource_state(resource, id, ts, state) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(resource, id) DO UPDATE SET ts = excluded.ts, state = excluded.state",
                (resource, id, now_ts(), &body),
            )
            .with_context(|| format!("writing state of {} {}", resource, id))?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(())
    }

    fn get(&self, resource: &str, id: &str) -> Result<Option<ResourceState>> {
        let db = self.conn();
        let mut stmt = db.prepare("SELECT resource, id, ts, state FROM resource_state WHERE resource = ?1 AND id = ?2")?;
        let mut rows = stmt.query((resource, id))?;
        let found = match rows.next()? {
            Some(row) => Some(decode(row_to_state(row)?)?),
            None => None,
        };
        Ok(found)
    }

    fn remove(&self, resource: &str, id: &str) -> Result<bool> {
        let n = self
            .conn()
            .execute("DELETE FROM resource_state WHERE resource = ?1 AND id = ?2", (resource, id))
            .with_context(|| format!("removing state of {} {}", resource, id))?;
        Ok(n > 0)
    }

    fn list(&self, resource: Option<&str>) -> Result<Vec<ResourceState>> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT resource, id, ts, state FROM resource_state
             WHERE ?1 IS NULL OR resource = ?1
             ORDER BY ts DESC, resource, id",
        )?;
        let mut rows = stmt.query([resource])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(decode(row_to_state(row)?)?);
        }
        Ok(out)
    }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".peerage");
        let _ = std::fs::create_dir_all(&p);
        p.push("state.db");
        return p.to_string_lossy().to_string();
    }
    "peerage-state.db".to_string()
}

pub fn now_ts() -> i64 { chrono::Utc::now().timestamp() }
