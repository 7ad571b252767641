//! In-memory [`AnalysisStore`] for tests and embedding.

use parking_lot::Mutex;

use crate::errors::StoreError;
use crate::store::AnalysisStore;
use crate::types::{AnalysisRow, NewAnalysis, SubjectRow};

/// In-memory store with the same observable behavior as the SQLite backend.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

struct Inner {
    subjects: Vec<SubjectRow>,
    analyses: Vec<AnalysisRow>,
    next_subject_id: i64,
    next_analysis_id: i64,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            subjects: Vec::new(),
            analyses: Vec::new(),
            next_subject_id: 1,
            next_analysis_id: 1,
        }
    }
}

impl MemoryStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

impl AnalysisStore for MemoryStore {
    fn create_subject(&self, content: &str) -> Result<SubjectRow, StoreError> {
        let mut inner = self.inner.lock();
        let row = SubjectRow {
            id: inner.next_subject_id,
            content: content.to_string(),
            created_at: now(),
        };
        inner.next_subject_id += 1;
        inner.subjects.push(row.clone());
        Ok(row)
    }

    fn get_subject(&self, subject_id: i64) -> Result<Option<SubjectRow>, StoreError> {
        Ok(self
            .inner
            .lock()
            .subjects
            .iter()
            .find(|s| s.id == subject_id)
            .cloned())
    }

    fn list_subjects(&self) -> Result<Vec<SubjectRow>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner.subjects.iter().rev().cloned().collect())
    }

    fn create_analysis(&self, new: &NewAnalysis<'_>) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock();
        let id = inner.next_analysis_id;
        inner.next_analysis_id += 1;
        inner.analyses.push(AnalysisRow {
            id,
            subject_id: new.subject_id,
            role: new.role,
            agent_kind: new.role.kind(),
            model: new.model.to_string(),
            content: new.content.to_string(),
            score: None,
            created_at: now(),
        });
        Ok(id)
    }

    fn update_score(&self, analysis_id: i64, score: u8) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let row = inner
            .analyses
            .iter_mut()
            .find(|a| a.id == analysis_id)
            .ok_or(StoreError::AnalysisNotFound(analysis_id))?;
        row.score = Some(score);
        Ok(())
    }

    fn list_for_subject(&self, subject_id: i64) -> Result<Vec<AnalysisRow>, StoreError> {
        Ok(self
            .inner
            .lock()
            .analyses
            .iter()
            .filter(|a| a.subject_id == subject_id)
            .cloned()
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
