//! SQLite-backed [`AnalysisStore`].
//!
//! Single-connection store behind a mutex. The pipeline's write pattern is
//! a handful of rows per run, so a pool buys nothing here; the mutex also
//! serializes writers the way the orchestrator already assumes.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, instrument};

use reverie_core::role::Role;

use crate::errors::StoreError;
use crate::store::AnalysisStore;
use crate::types::{AnalysisRow, NewAnalysis, SubjectRow};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS subjects (
    id          INTEGER PRIMARY KEY,
    content     TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS analyses (
    id          INTEGER PRIMARY KEY,
    subject_id  INTEGER NOT NULL REFERENCES subjects(id) ON DELETE CASCADE,
    role        TEXT NOT NULL,
    agent_kind  TEXT NOT NULL,
    model       TEXT NOT NULL,
    content     TEXT NOT NULL,
    score       INTEGER,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_analyses_subject ON analyses(subject_id);
";

/// SQLite store. Cheap to share behind an `Arc`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) a store at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    /// An in-memory store, mostly for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        debug!("sqlite store ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn analysis_from_row(row: &Row<'_>) -> Result<AnalysisRow, StoreError> {
    let role_tag: String = row.get("role")?;
    let role = Role::parse(&role_tag).ok_or(StoreError::InvalidRole(role_tag))?;
    Ok(AnalysisRow {
        id: row.get("id")?,
        subject_id: row.get("subject_id")?,
        role,
        agent_kind: role.kind(),
        model: row.get("model")?,
        content: row.get("content")?,
        score: row.get("score")?,
        created_at: row.get("created_at")?,
    })
}

impl AnalysisStore for SqliteStore {
    fn create_subject(&self, content: &str) -> Result<SubjectRow, StoreError> {
        let created_at = now();
        let conn = self.conn.lock();
        let _ = conn.execute(
            "INSERT INTO subjects (content, created_at) VALUES (?1, ?2)",
            params![content, created_at],
        )?;
        Ok(SubjectRow {
            id: conn.last_insert_rowid(),
            content: content.to_string(),
            created_at,
        })
    }

    fn get_subject(&self, subject_id: i64) -> Result<Option<SubjectRow>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT id, content, created_at FROM subjects WHERE id = ?1",
                params![subject_id],
                |row| {
                    Ok(SubjectRow {
                        id: row.get(0)?,
                        content: row.get(1)?,
                        created_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn list_subjects(&self) -> Result<Vec<SubjectRow>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, content, created_at FROM subjects ORDER BY id DESC")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SubjectRow {
                    id: row.get(0)?,
                    content: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn create_analysis(&self, new: &NewAnalysis<'_>) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        let _ = conn.execute(
            "INSERT INTO analyses (subject_id, role, agent_kind, model, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.subject_id,
                new.role.as_str(),
                new.role.kind().as_str(),
                new.model,
                new.content,
                now(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, role = %new.role, "analysis persisted");
        Ok(id)
    }

    fn update_score(&self, analysis_id: i64, score: u8) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE analyses SET score = ?1 WHERE id = ?2",
            params![score, analysis_id],
        )?;
        if changed == 0 {
            return Err(StoreError::AnalysisNotFound(analysis_id));
        }
        debug!(analysis_id, score, "score attached");
        Ok(())
    }

    fn list_for_subject(&self, subject_id: i64) -> Result<Vec<AnalysisRow>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, subject_id, role, agent_kind, model, content, score, created_at
             FROM analyses WHERE subject_id = ?1 ORDER BY id ASC",
        )?;
        let mut rows = Vec::new();
        let mut raw = stmt.query(params![subject_id])?;
        while let Some(row) = raw.next()? {
            rows.push(analysis_from_row(row)?);
        }
        Ok(rows)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use crate::store::contract;

    use super::*;

    #[test]
    fn satisfies_store_contract() {
        let store = SqliteStore::in_memory().unwrap();
        contract::exercise(&store);
    }

    #[test]
    fn survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reverie.db");

        let subject_id = {
            let store = SqliteStore::open(&path).unwrap();
            let subject = store.create_subject("persisted dream").unwrap();
            let _ = store
                .create_analysis(&NewAnalysis {
                    subject_id: subject.id,
                    role: Role::Generalist,
                    model: "m",
                    content: "kept",
                })
                .unwrap();
            subject.id
        };

        let store = SqliteStore::open(&path).unwrap();
        let rows = store.list_for_subject(subject_id).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "kept");
    }

    #[test]
    fn score_round_trips() {
        let store = SqliteStore::in_memory().unwrap();
        let subject = store.create_subject("d").unwrap();
        let id = store
            .create_analysis(&NewAnalysis {
                subject_id: subject.id,
                role: Role::Theme,
                model: "m",
                content: "themes",
            })
            .unwrap();

        store.update_score(id, 5).unwrap();
        let rows = store.list_for_subject(subject.id).unwrap();
        assert_eq!(rows[0].score, Some(5));
    }
}
