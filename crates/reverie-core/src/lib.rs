//! # reverie-core
//!
//! Foundation types for the Reverie dream-analysis pipeline.
//!
//! This crate provides the shared vocabulary that all other Reverie crates
//! depend on:
//!
//! - **Roles**: [`role::Role`] tags for every pipeline stage, plus the coarser
//!   [`role::AgentKind`] recorded alongside persisted analyses
//! - **Quality scores**: [`score::QualityScore`] with the total, never-failing
//!   parser for judge output
//! - **Events**: [`event::PipelineEvent`] — the fan-in event contract between
//!   the orchestrator and its streaming consumers
//! - **Text**: [`text::preview`] for log-safe output excerpts
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other reverie crates.

#![deny(unsafe_code)]

pub mod event;
pub mod role;
pub mod score;
pub mod text;
