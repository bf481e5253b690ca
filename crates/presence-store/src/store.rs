//! SQLite-backed identity store.
//!
//! Two tables: `users` (one row per registered identity; the rowid doubles
//! as the recognition model's label id) and `attendance` (one row per
//! logged event). The unique index on `(user_id, date(timestamp))` is the
//! authoritative once-per-day guard; the in-lock application check only
//! turns the common repeat into a friendly outcome.

use crate::mirror::{self, MirrorConfig, OutboundEvent};
use chrono::Local;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    employee_id TEXT UNIQUE NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS attendance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    name TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0
);
-- One attendance event per user per local calendar day.
CREATE UNIQUE INDEX IF NOT EXISTS attendance_user_day
    ON attendance (user_id, date(timestamp));
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("employee id {0:?} already exists")]
    DuplicateEmployeeId(String),
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// A registered identity. The id is assigned by the store and is also the
/// recognition model's label for this person; it is never reassigned.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub employee_id: String,
    pub created_at: String,
}

/// One logged attendance event. Immutable once created, except for the
/// `synced` flag the mirror worker flips on confirmed remote delivery.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceEvent {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub timestamp: String,
    pub synced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_users: u64,
    pub attendance_today: u64,
}

/// Outcome of an attendance log attempt. `AlreadyLoggedToday` is a normal
/// result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutcome {
    Logged { event_id: i64 },
    AlreadyLoggedToday,
}

pub struct IdentityStore {
    conn: Arc<Mutex<Connection>>,
    mirror: Option<UnboundedSender<OutboundEvent>>,
}

impl IdentityStore {
    /// Open (creating if needed) the database at `path`. When a mirror
    /// config is given, a background worker is started that pushes each
    /// logged event to the remote store.
    pub fn open(path: &Path, mirror: Option<MirrorConfig>) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        Self::with_connection(Connection::open(path)?, mirror)
    }

    /// In-memory database; nothing survives the process. Mainly useful in
    /// tests and tooling.
    pub fn open_in_memory(mirror: Option<MirrorConfig>) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, mirror)
    }

    fn with_connection(conn: Connection, mirror: Option<MirrorConfig>) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        let conn = Arc::new(Mutex::new(conn));

        let mirror = mirror.map(|cfg| {
            tracing::info!(endpoint = %cfg.endpoint, "remote mirror enabled");
            mirror::spawn(cfg, Arc::clone(&conn))
        });

        Ok(Self { conn, mirror })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Register a new identity. The returned id is the classifier label;
    /// this is the single place where that id is allocated.
    pub fn create_user(&self, name: &str, employee_id: &str) -> Result<i64, StoreError> {
        let conn = self.conn()?;

        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM users WHERE employee_id = ?1",
                params![employee_id],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(StoreError::DuplicateEmployeeId(employee_id.to_string()));
        }

        let created_at = local_timestamp();
        match conn.execute(
            "INSERT INTO users (name, employee_id, created_at) VALUES (?1, ?2, ?3)",
            params![name, employee_id, created_at],
        ) {
            Ok(_) => {
                let id = conn.last_insert_rowid();
                tracing::info!(user_id = id, employee_id, "user created");
                Ok(id)
            }
            Err(e) if is_unique_violation(&e) => {
                Err(StoreError::DuplicateEmployeeId(employee_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read-only duplicate check used by enrollment validation, before any
    /// sample processing happens.
    pub fn employee_id_exists(&self, employee_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM users WHERE employee_id = ?1",
                params![employee_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(existing.is_some())
    }

    /// Remove a provisional user row. Only called by enrollment rollback,
    /// before any attendance event can reference the row.
    pub fn delete_user(&self, user_id: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
        tracing::info!(user_id, "provisional user rolled back");
        Ok(())
    }

    /// Log attendance for a recognized user, at most once per local
    /// calendar day. The check and insert run under the connection lock,
    /// and the unique index catches anything that slips past the check.
    pub fn log_attendance(&self, user_id: i64, name: &str) -> Result<LogOutcome, StoreError> {
        let (event_id, timestamp) = {
            let conn = self.conn()?;

            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM attendance
                     WHERE user_id = ?1 AND date(timestamp) = date('now', 'localtime')
                     LIMIT 1",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Ok(LogOutcome::AlreadyLoggedToday);
            }

            let timestamp = local_timestamp();
            match conn.execute(
                "INSERT INTO attendance (user_id, name, timestamp) VALUES (?1, ?2, ?3)",
                params![user_id, name, timestamp],
            ) {
                Ok(_) => (conn.last_insert_rowid(), timestamp),
                Err(e) if is_unique_violation(&e) => return Ok(LogOutcome::AlreadyLoggedToday),
                Err(e) => return Err(e.into()),
            }
        };

        tracing::info!(user_id, event_id, "attendance recorded");

        // Fire-and-forget: a full or closed queue never affects the local
        // commit that already happened.
        if let Some(tx) = &self.mirror {
            let _ = tx.send(OutboundEvent {
                event_id,
                user_id,
                name: name.to_string(),
                timestamp,
            });
        }

        Ok(LogOutcome::Logged { event_id })
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.conn()?;
        let total_users: u64 =
            conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        let attendance_today: u64 = conn.query_row(
            "SELECT COUNT(*) FROM attendance WHERE date(timestamp) = date('now', 'localtime')",
            [],
            |row| row.get(0),
        )?;
        Ok(StoreStats {
            total_users,
            attendance_today,
        })
    }

    /// Most recent attendance events, newest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<AttendanceEvent>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, timestamp, synced FROM attendance
             ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(AttendanceEvent {
                id: row.get(0)?,
                user_id: row.get(1)?,
                name: row.get(2)?,
                timestamp: row.get(3)?,
                synced: row.get::<_, i64>(4)? != 0,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

/// Flip an event's `synced` flag after a confirmed remote delivery.
pub(crate) fn mark_synced(conn: &Mutex<Connection>, event_id: i64) -> Result<(), StoreError> {
    let conn = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
    conn.execute(
        "UPDATE attendance SET synced = 1 WHERE id = ?1",
        params![event_id],
    )?;
    Ok(())
}

/// Local wall-clock timestamp at second precision; day boundaries for the
/// dedup window follow this, not UTC.
fn local_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
