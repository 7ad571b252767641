//! # reverie-agents
//!
//! The closed set of language-model agents the pipeline sequences:
//!
//! - **[`Agent`]**: one tagged variant per analysis role — generalist, the
//!   three specialists, synthesizer — all sharing a single contract over the
//!   generation capability
//! - **[`Judge`]**: the distinct rating contract — scores a candidate
//!   analysis on three axes, never fails the run on bad output
//! - **[`prompts`]**: per-role system prompts and prompt builders, including
//!   the fixed-order synthesis context blob
//!
//! Variants are constructed through named constructors, not open
//! subclassing, so the pipeline's stage wiring stays a reviewable list.
//!
//! [`Agent`]: agent::Agent
//! [`Judge`]: judge::Judge

#![deny(unsafe_code)]

pub mod agent;
pub mod judge;
pub mod prompts;

pub use agent::Agent;
pub use judge::Judge;
