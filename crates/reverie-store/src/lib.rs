//! # reverie-store
//!
//! The persistence gateway the pipeline writes through. The contract is
//! deliberately small:
//!
//! - `create_analysis` — full text known before the row exists, never partial
//! - `update_score` — the rating stage's two-phase write (create-then-update)
//! - `list_for_subject` — creation-ordered history, used to recover a
//!   pre-supplied first pass across process boundaries
//!
//! Two backends: [`sqlite::SqliteStore`] for real runs and
//! [`memory::MemoryStore`] for tests and embedding. Both satisfy the same
//! contract tests.

#![deny(unsafe_code)]

pub mod errors;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod types;

pub use errors::StoreError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::AnalysisStore;
pub use types::{AnalysisRow, NewAnalysis, SubjectRow};
